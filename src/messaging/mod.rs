// src/messaging/mod.rs
// User inbox messaging built on the connection manager's units of work

pub mod types;
pub mod user_inbox;

pub use types::{user_inbox_queue, UserId};
pub use user_inbox::UserMessageManager;
