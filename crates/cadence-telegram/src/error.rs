/// Errors produced while delivering a notification through Telegram.
#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("teloxide error: {0}")]
    Teloxide(#[from] teloxide::RequestError),

    #[error("no bot token configured")]
    NoToken,

    #[error("chat id is not numeric: {0}")]
    InvalidChatId(String),

    #[error("malformed send_message payload: {0}")]
    Payload(#[from] serde_json::Error),
}
