pub mod bot;
pub mod error;
pub mod health;
pub mod projects;
pub mod schedule;
pub mod scheduler;
