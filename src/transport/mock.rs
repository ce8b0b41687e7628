use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::Result;
use crate::presenter::RenderedMessage;

use super::{IncomingMessage, IncomingStream, MessageRef, Transport};

/// In-memory transport used by tests and the `mock` engine scenario. Tracks
/// every sent/edited message plus an edit counter per `MessageRef` so tests
/// can assert on the edits-worker's coalescing behavior.
pub struct MockTransport {
    next_message_id: AtomicI64,
    sent: DashMap<(i64, i64), String>,
    edit_counts: DashMap<(i64, i64), usize>,
    incoming_tx: Mutex<Option<mpsc::Sender<IncomingMessage>>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            next_message_id: AtomicI64::new(1),
            sent: DashMap::new(),
            edit_counts: DashMap::new(),
            incoming_tx: Mutex::new(None),
        }
    }

    pub fn edit_count(&self, message_ref: &MessageRef) -> usize {
        self.edit_counts
            .get(&(message_ref.thread_id, message_ref.message_id))
            .map(|v| *v)
            .unwrap_or(0)
    }

    pub fn last_text(&self, message_ref: &MessageRef) -> Option<String> {
        self.sent
            .get(&(message_ref.thread_id, message_ref.message_id))
            .map(|v| v.clone())
    }

    /// Inject an inbound message as if it arrived from the chat.
    pub async fn inject(&self, message: IncomingMessage) {
        let tx = self.incoming_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(message).await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, thread_id: i64, rendered: &RenderedMessage) -> Result<MessageRef> {
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        self.sent.insert((thread_id, message_id), rendered.text.clone());
        Ok(MessageRef { thread_id, message_id })
    }

    async fn edit(&self, message_ref: &MessageRef, rendered: &RenderedMessage) -> Result<()> {
        let key = (message_ref.thread_id, message_ref.message_id);
        self.sent.insert(key, rendered.text.clone());
        *self.edit_counts.entry(key).or_insert(0) += 1;
        Ok(())
    }

    async fn delete(&self, message_ref: &MessageRef) -> Result<()> {
        self.sent.remove(&(message_ref.thread_id, message_ref.message_id));
        Ok(())
    }

    async fn poll(&self) -> Result<IncomingStream> {
        let (tx, rx) = mpsc::channel(32);
        *self.incoming_tx.lock().unwrap() = Some(tx);
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
