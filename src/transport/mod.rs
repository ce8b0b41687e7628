pub mod mock;
pub mod telegram;

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::error::Result;
use crate::presenter::RenderedMessage;

/// Transport-agnostic handle to a sent progress message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub thread_id: i64,
    pub message_id: i64,
}

/// An inbound chat message, normalized across transports.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub thread_id: i64,
    pub message_id: i64,
    pub text: String,
    pub reply_to_text: Option<String>,
    /// The `MessageRef` of the progress message this reply targets, if the
    /// message is a reply (used to match `/cancel`).
    pub reply_to_message_id: Option<i64>,
}

pub type IncomingStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// Transport interface consumed by the message handler. Implementations must
/// be safe for concurrent use — the handler may call `edit` from many
/// concurrently-running threads' edit workers while `poll` drives a single
/// long-lived receive loop.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, thread_id: i64, rendered: &RenderedMessage) -> Result<MessageRef>;
    async fn edit(&self, message_ref: &MessageRef, rendered: &RenderedMessage) -> Result<()>;
    async fn delete(&self, message_ref: &MessageRef) -> Result<()>;

    /// Begin receiving inbound messages. Implementations should return a
    /// stream suitable for being driven by a single long-lived task.
    async fn poll(&self) -> Result<IncomingStream>;
}
