//! Canonical event topic constants.
//!
//! Centralized so publishers and subscribers stay in sync. Keep the list
//! alphabetized within sections and favor dot.case names.

// Chat
pub const TOPIC_CHAT_MESSAGE: &str = "chat.message";

// Models / loading
pub const TOPIC_LOAD_COMPLETED: &str = "models.load.completed";
pub const TOPIC_LOAD_FAILED: &str = "models.load.failed";
pub const TOPIC_LOAD_PROGRESS: &str = "models.load.progress";
pub const TOPIC_MODELS_CHANGED: &str = "models.changed";
pub const TOPIC_MODEL_ACTIVATED: &str = "models.activated";
