//! Conversation state and the consumer-facing chat surface: an ordered
//! message log fed incrementally by streaming responses.

mod log;
mod service;

pub use log::{ChatError, ChatLog, ChatMessage, MessageStatus};
pub use service::ChatService;
