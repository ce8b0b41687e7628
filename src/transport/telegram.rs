use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ChatId;

use crate::error::{Error, Result};
use crate::presenter::RenderedMessage;

use super::{IncomingMessage, IncomingStream, MessageRef, Transport};

/// Telegram transport backed by `teloxide`. `poll` drives long-polling update
/// dispatch; the other three operations are thin wrappers over the bot API.
pub struct TelegramTransport {
    bot: Bot,
    allowed_chat_ids: Vec<i64>,
}

impl TelegramTransport {
    pub fn new(token: String, allowed_chat_ids: Vec<i64>) -> Self {
        Self {
            bot: Bot::new(token),
            allowed_chat_ids,
        }
    }

    fn chat_allowed(&self, chat_id: i64) -> bool {
        self.allowed_chat_ids.is_empty() || self.allowed_chat_ids.contains(&chat_id)
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send(&self, thread_id: i64, rendered: &RenderedMessage) -> Result<MessageRef> {
        let message = self
            .bot
            .send_message(ChatId(thread_id), &rendered.text)
            .await
            .map_err(|e| Error::TransportTransient(e.to_string()))?;
        Ok(MessageRef {
            thread_id,
            message_id: message.id.0 as i64,
        })
    }

    async fn edit(&self, message_ref: &MessageRef, rendered: &RenderedMessage) -> Result<()> {
        self.bot
            .edit_message_text(
                ChatId(message_ref.thread_id),
                teloxide::types::MessageId(message_ref.message_id as i32),
                &rendered.text,
            )
            .await
            .map_err(|e| Error::TransportTransient(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, message_ref: &MessageRef) -> Result<()> {
        self.bot
            .delete_message(
                ChatId(message_ref.thread_id),
                teloxide::types::MessageId(message_ref.message_id as i32),
            )
            .await
            .map_err(|e| Error::TransportTransient(e.to_string()))?;
        Ok(())
    }

    async fn poll(&self) -> Result<IncomingStream> {
        let bot = self.bot.clone();
        let allowed = self.allowed_chat_ids.clone();
        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut offset: i32 = 0;
            loop {
                let updates = match bot
                    .get_updates()
                    .offset(offset)
                    .timeout(30)
                    .send()
                    .await
                {
                    Ok(updates) => updates,
                    Err(e) => {
                        tracing::warn!(error = %e, "telegram getUpdates failed, retrying");
                        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                        continue;
                    }
                };

                for update in updates {
                    offset = offset.max(update.id.0 as i32 + 1);
                    let UpdateKind::Message(message) = update.kind else {
                        continue;
                    };
                    let chat_id = message.chat.id.0;
                    if !allowed.is_empty() && !allowed.contains(&chat_id) {
                        continue;
                    }
                    let Some(text) = message.text() else { continue };

                    let reply_to_text = message
                        .reply_to_message()
                        .and_then(|m| m.text())
                        .map(|s| s.to_string());
                    let reply_to_message_id =
                        message.reply_to_message().map(|m| m.id.0 as i64);

                    let incoming = IncomingMessage {
                        thread_id: chat_id,
                        message_id: message.id.0 as i64,
                        text: text.to_string(),
                        reply_to_text,
                        reply_to_message_id,
                    };
                    if tx.send(incoming).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }
}
