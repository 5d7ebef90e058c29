use serde::{Deserialize, Serialize};

/// A chat that receives the recurring notification.
///
/// `interval_secs` is the period used whenever the subscriber is scheduled
/// without an explicit schedule definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: i64,
    /// External chat identifier, unique per subscriber.
    pub chat_id: String,
    pub active: bool,
    pub message_text: String,
    pub interval_secs: u32,
    /// RFC3339 creation timestamp.
    pub created_at: String,
    pub updated_at: String,
}

/// Partial settings change. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriberUpdate {
    pub message_text: Option<String>,
    pub interval_secs: Option<u32>,
}
