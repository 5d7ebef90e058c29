//! Plain-text sending with Telegram's message size limit.
//!
//! Subscriber texts are user-written, so no parse mode is applied.

use std::time::Duration;

use teloxide::prelude::*;

use crate::error::TelegramError;

/// Maximum bytes per Telegram message (limit is 4096 characters).
const CHUNK_MAX: usize = 4090;

/// Largest char boundary of `s` not past `max`.
fn floor_boundary(s: &str, max: usize) -> usize {
    let mut idx = max.min(s.len());
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Split `text` into chunks of at most `CHUNK_MAX` bytes, preferring line
/// breaks, then spaces.
pub fn split_chunks(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text;
    while remaining.len() > CHUNK_MAX {
        let limit = floor_boundary(remaining, CHUNK_MAX);
        let window = &remaining[..limit];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(limit);
        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }
    if !remaining.is_empty() || chunks.is_empty() {
        chunks.push(remaining.to_string());
    }
    chunks
}

/// Send `text` to `chat_id`, chunked, pausing briefly between chunks to stay
/// clear of rate limits. Stops at the first failed chunk.
pub async fn send_text(bot: &Bot, chat_id: ChatId, text: &str) -> Result<(), TelegramError> {
    let chunks = split_chunks(text);
    for (i, chunk) in chunks.iter().enumerate() {
        bot.send_message(chat_id, chunk.as_str()).await?;
        if i + 1 < chunks.len() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
    Ok(())
}
