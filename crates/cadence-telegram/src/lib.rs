//! `cadence-telegram`: delivers `send_message` tasks through the Telegram Bot API.

pub mod delivery;
pub mod error;
pub mod send;

pub use delivery::TelegramDelivery;
pub use error::TelegramError;
