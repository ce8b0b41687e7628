use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::logger::SessionLogger;
use crate::presenter::Presenter;
use crate::router::AutoRouter;
use crate::runner::{ResumeLockPool, Runner, RunnerRegistry};
use crate::scheduler::ThreadScheduler;
use crate::tracker::{ProgressState, Tracker};
use crate::transport::{IncomingMessage, MessageRef, Transport};

/// End-to-end per-message pipeline: route, send a placeholder progress
/// message, run the chosen engine, fold its event stream through the
/// tracker while publishing coalesced edits, then close with a synchronous
/// final render. One `Handler` instance serves every thread; per-thread
/// ordering is the scheduler's job, not this struct's.
pub struct Handler {
    transport: Arc<dyn Transport>,
    router: AutoRouter,
    registry: Arc<RunnerRegistry>,
    resume_locks: Arc<ResumeLockPool>,
    scheduler: Arc<ThreadScheduler>,
    presenter: Presenter,
    /// Cancellation tokens for in-flight runs, keyed by the progress
    /// message's `MessageRef` so a `/cancel` reply can find its target.
    cancels: DashMap<MessageRef, CancellationToken>,
}

impl Handler {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<RunnerRegistry>,
        default_engine: crate::engine::EngineId,
    ) -> Arc<Self> {
        let router = AutoRouter::new(registry.clone(), default_engine);
        Arc::new(Self {
            transport,
            router,
            registry,
            resume_locks: ResumeLockPool::new(),
            scheduler: ThreadScheduler::new(),
            presenter: Presenter::default(),
            cancels: DashMap::new(),
        })
    }

    /// Drive the transport's inbound stream, dispatching each message onto
    /// its thread's FIFO queue. Runs until the stream ends (transport
    /// shutdown or fatal error upstream).
    pub async fn run(self: &Arc<Self>) -> crate::error::Result<()> {
        let mut incoming = self.transport.poll().await?;
        while let Some(message) = incoming.next().await {
            if self.try_handle_cancel(&message).await {
                continue;
            }
            let handler = self.clone();
            let thread_id = message.thread_id;
            self.scheduler
                .submit(thread_id, Box::pin(async move { handler.handle_message(message).await }));
        }
        Ok(())
    }

    async fn try_handle_cancel(&self, message: &IncomingMessage) -> bool {
        if message.text.trim() != "/cancel" {
            return false;
        }
        let Some(reply_id) = message.reply_to_message_id else {
            return false;
        };
        let target = MessageRef {
            thread_id: message.thread_id,
            message_id: reply_id,
        };
        if let Some((_, token)) = self.cancels.remove(&target) {
            token.cancel();
        }
        true
    }

    async fn handle_message(self: Arc<Self>, message: IncomingMessage) {
        let route = match self.router.route(&message.text, message.reply_to_text.as_deref()) {
            Ok(route) => route,
            Err(e) => {
                let rendered = crate::presenter::RenderedMessage {
                    text: format!("couldn't route that message: {e}"),
                };
                let _ = self.transport.send(message.thread_id, &rendered).await;
                return;
            }
        };

        let Some(runner) = self.registry.get(&route.engine_id) else {
            let rendered = crate::presenter::RenderedMessage {
                text: format!("engine `{}` is not registered", route.engine_id),
            };
            let _ = self.transport.send(message.thread_id, &rendered).await;
            return;
        };

        let placeholder = self.presenter.render(&ProgressState::new());
        let message_ref = match self.transport.send(message.thread_id, &placeholder).await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "failed to send placeholder progress message");
                return;
            }
        };

        let cancel = CancellationToken::new();
        self.cancels.insert(message_ref.clone(), cancel.clone());

        let _resume_guard = match &route.resume {
            Some(token) => Some(self.resume_locks.acquire(token).await),
            None => None,
        };

        let edits = crate::edits::EditsWorker::spawn(
            self.transport.clone(),
            message_ref.clone(),
            Presenter::default(),
        );

        let session_id = format!("{}-{}-{}", message.thread_id, message_ref.message_id, crate::event::now_ms());
        let mut logger = SessionLogger::new(&session_id, route.engine_id.clone(), message.thread_id, &route.prompt)
            .map_err(|e| tracing::warn!(error = %e, "failed to open session log"))
            .ok();

        let mut state = ProgressState::new();
        match runner.run(&route.prompt, route.resume.clone(), cancel).await {
            Ok(mut stream) => {
                while let Some(event) = stream.next().await {
                    if let Some(logger) = logger.as_mut() {
                        logger.log_event(&event);
                    }
                    state = Tracker::note_event(state, event);
                    edits.publish(state.clone()).await;
                    if state.finished {
                        break;
                    }
                }
            }
            Err(e) => {
                state.error = Some(e.to_string());
                state.ok = Some(false);
                state.finished = true;
            }
        }

        if let Some(logger) = logger.as_mut() {
            logger.finalize(state.ok.unwrap_or(false), Some(state.elapsed().as_millis() as u64));
        }

        let rendered = self.presenter.render(&state);
        if let Err(e) = self.transport.edit(&message_ref, &rendered).await {
            tracing::warn!(error = %e, "failed to send final progress edit");
        }

        self.cancels.remove(&message_ref);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::mock::MockRunner;
    use crate::engine::EngineId;
    use crate::runner::RunnerRegistry;
    use crate::transport::mock::MockTransport;

    fn registry() -> Arc<RunnerRegistry> {
        let mut reg = RunnerRegistry::new();
        reg.register(Arc::new(MockRunner::new()));
        Arc::new(reg)
    }

    #[tokio::test]
    async fn happy_path_ends_with_final_edit_containing_answer() {
        let transport = Arc::new(MockTransport::new());
        let handler = Handler::new(transport.clone(), registry(), EngineId::new("mock").unwrap());

        let mut incoming = transport.poll().await.unwrap();
        transport
            .inject(IncomingMessage {
                thread_id: 1,
                message_id: 10,
                text: "hello there".into(),
                reply_to_text: None,
                reply_to_message_id: None,
            })
            .await;

        let message = incoming.next().await.unwrap();
        handler.clone().handle_message(message).await;

        let message_ref = MessageRef { thread_id: 1, message_id: 1 };
        let text = transport.last_text(&message_ref).unwrap();
        assert!(text.contains("hello there"));
        assert!(transport.edit_count(&message_ref) >= 1);
    }

    #[tokio::test]
    async fn unroutable_message_sends_error_without_progress_message() {
        let transport = Arc::new(MockTransport::new());
        let empty_registry = Arc::new(RunnerRegistry::new());
        let handler = Handler::new(transport.clone(), empty_registry, EngineId::new("mock").unwrap());

        handler
            .clone()
            .handle_message(IncomingMessage {
                thread_id: 1,
                message_id: 10,
                text: "anything".into(),
                reply_to_text: None,
                reply_to_message_id: None,
            })
            .await;

        let message_ref = MessageRef { thread_id: 1, message_id: 1 };
        let text = transport.last_text(&message_ref).unwrap();
        assert!(text.contains("couldn't route"));
    }
}
