use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;
use teloxide::prelude::*;
use tracing::{info, warn};

use cadence_core::config::TelegramConfig;
use cadence_scheduler::types::MessagePayload;
use cadence_scheduler::{db::lock, TaskHandler};
use cadence_users::subscriber;

use crate::error::TelegramError;
use crate::send::send_text;

/// Handler for the `send_message` target.
///
/// The subscriber row is re-read at delivery time: an inactive or deleted
/// subscriber gets nothing, and the stored text wins over the text captured
/// in the payload when the job was scheduled.
pub struct TelegramDelivery {
    bot: Bot,
    db: Arc<Mutex<Connection>>,
}

/// What a delivery resolved to before any network call.
#[derive(Debug, PartialEq, Eq)]
enum Resolved {
    Send { chat_id: ChatId, text: String },
    Skip(&'static str),
}

impl TelegramDelivery {
    pub fn new(bot: Bot, db: Arc<Mutex<Connection>>) -> Self {
        Self { bot, db }
    }

    pub fn from_config(
        config: Option<&TelegramConfig>,
        db: Arc<Mutex<Connection>>,
    ) -> Result<Self, TelegramError> {
        let token = config
            .map(|c| c.bot_token.trim())
            .filter(|t| !t.is_empty())
            .ok_or(TelegramError::NoToken)?;
        Ok(Self::new(Bot::new(token), db))
    }

    fn resolve(&self, payload: MessagePayload) -> anyhow::Result<Resolved> {
        let chat_id: i64 = payload
            .chat_id
            .parse()
            .map_err(|_| TelegramError::InvalidChatId(payload.chat_id.clone()))?;

        let conn = lock(&self.db);
        let Some(sub) = subscriber::find_by_chat_id(&conn, &payload.chat_id)? else {
            return Ok(Resolved::Skip("subscriber not found"));
        };
        if !sub.active {
            return Ok(Resolved::Skip("subscriber is not active"));
        }
        let text = if sub.message_text.is_empty() {
            payload.message_text
        } else {
            sub.message_text
        };
        Ok(Resolved::Send {
            chat_id: ChatId(chat_id),
            text,
        })
    }
}

#[async_trait]
impl TaskHandler for TelegramDelivery {
    async fn run(&self, payload: serde_json::Value) -> anyhow::Result<()> {
        let payload: MessagePayload =
            serde_json::from_value(payload).map_err(TelegramError::Payload)?;
        let chat = payload.chat_id.clone();

        match self.resolve(payload)? {
            Resolved::Skip(reason) => {
                warn!(chat_id = %chat, "delivery skipped: {reason}");
                Ok(())
            }
            Resolved::Send { chat_id, text } => {
                info!(chat_id = %chat, "sending scheduled message");
                send_text(&self.bot, chat_id, &text).await?;
                Ok(())
            }
        }
    }
}
