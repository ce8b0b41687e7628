use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::engine::{self, EngineId};
use crate::error::Result;
use crate::event::{
    ActionCompletedEvent, ActionEvent, ActionStartedEvent, ActionStatus, CompletedEvent, Event,
    StartedEvent,
};
use crate::runner::{EventStream, ResumeToken, Runner};

/// In-process runner with no subprocess, used by tests and the scripted
/// "happy path" scenario. Emits a fixed `Started -> Action -> ActionStarted ->
/// ActionCompleted -> Completed` sequence; echoes the prompt back as the
/// final answer so callers can assert on it.
pub struct MockRunner {
    id: EngineId,
    counter: AtomicU64,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRunner {
    pub fn new() -> Self {
        Self {
            id: EngineId::new(engine::MOCK).unwrap(),
            counter: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Runner for MockRunner {
    fn engine_id(&self) -> &EngineId {
        &self.id
    }

    fn is_available(&self) -> bool {
        true
    }

    fn resolve_resume(&self, text: &str) -> Option<ResumeToken> {
        text.lines().find_map(|line| {
            let trimmed = line.trim();
            let rest = trimmed.strip_prefix("mock resume ")?;
            let id = rest.split_whitespace().next()?;
            Some(
                ResumeToken::new(self.id.clone(), trimmed.to_string())
                    .with_session_id(id.to_string()),
            )
        })
    }

    async fn run(
        &self,
        prompt: &str,
        resume: Option<ResumeToken>,
        cancel: CancellationToken,
    ) -> Result<EventStream> {
        let run_id = self.counter.fetch_add(1, Ordering::SeqCst);
        let engine_id = self.id.clone();
        let prompt = prompt.to_string();
        let resume_token = Some(
            resume.unwrap_or_else(|| {
                ResumeToken::new(engine_id.clone(), format!("mock resume run-{run_id}"))
                    .with_session_id(format!("run-{run_id}"))
            }),
        );

        let (tx, rx) = mpsc::channel::<Event>(16);

        tokio::spawn(async move {
            let steps: Vec<Event> = vec![
                Event::Started(StartedEvent {
                    engine_id: engine_id.clone(),
                    resume_known: true,
                    resume_token: resume_token.clone(),
                    timestamp_ms: 0,
                }),
                Event::Action(ActionEvent {
                    engine_id: engine_id.clone(),
                    text: "thinking".to_string(),
                    resume_token: resume_token.clone(),
                    timestamp_ms: 0,
                }),
                Event::ActionStarted(ActionStartedEvent {
                    engine_id: engine_id.clone(),
                    id: "mock-1".to_string(),
                    kind: "tool".to_string(),
                    title: "echo".to_string(),
                    resume_token: resume_token.clone(),
                    timestamp_ms: 0,
                }),
                Event::ActionCompleted(ActionCompletedEvent {
                    engine_id: engine_id.clone(),
                    id: "mock-1".to_string(),
                    status: ActionStatus::Done,
                    detail: Some(prompt.clone()),
                    resume_token: resume_token.clone(),
                    timestamp_ms: 0,
                }),
                Event::Completed(CompletedEvent {
                    engine_id,
                    ok: true,
                    answer: Some(prompt),
                    error: None,
                    resume_token,
                    timestamp_ms: 0,
                }),
            ];

            for event in steps {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    send = tx.send(event.stamp()) => {
                        if send.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn emits_full_sequence_ending_in_completed() {
        let runner = MockRunner::new();
        let mut stream = runner.run("hello", None, CancellationToken::new()).await.unwrap();

        let mut events = Vec::new();
        while let Some(e) = stream.next().await {
            events.push(e);
        }

        assert!(matches!(events.first(), Some(Event::Started(_))));
        match events.last() {
            Some(Event::Completed(c)) => assert_eq!(c.answer.as_deref(), Some("hello")),
            other => panic!("expected trailing Completed, got {other:?}"),
        }
    }

    #[test]
    fn resolve_resume_matches_mock_syntax() {
        let runner = MockRunner::new();
        let token = runner.resolve_resume("mock resume run-3\ngo").unwrap();
        assert_eq!(token.session_id.as_deref(), Some("run-3"));
    }
}
