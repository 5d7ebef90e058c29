//! `cadence-users`: chat subscribers that own a recurring notification job.

pub mod db;
pub mod error;
pub mod subscriber;
pub mod types;

pub use error::{Result, UserError};
pub use types::{Subscriber, SubscriberUpdate};
