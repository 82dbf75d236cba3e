use std::sync::Arc;

use hearth_engine::{ChatTurn, TokenUsage, TurnRole};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

/// Display history kept in memory; oldest entries are dropped past this.
const HISTORY_LIMIT: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message text is empty")]
    EmptyInput,
    #[error("no model is active")]
    NoActiveEngine,
    #[error("unknown message id `{0}`")]
    UnknownMessage(String),
    #[error("message `{0}` already reached a terminal status")]
    AlreadyFinal(String),
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Waiting on a blocking response.
    Loading,
    /// Accumulating streamed fragments.
    Streaming,
    Completed,
    Errored,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Loading => "loading",
            MessageStatus::Streaming => "streaming",
            MessageStatus::Completed => "completed",
            MessageStatus::Errored => "errored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Completed | MessageStatus::Errored)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: TurnRole,
    pub content: String,
    pub status: MessageStatus,
    pub ts_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ChatMessage {
    fn new(role: TurnRole, content: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            status,
            ts_ms: now_ms(),
            usage: None,
        }
    }
}

/// Ordered conversation log. Sole owner of its messages: placeholders are
/// created here, mutated only through the transition methods below, and
/// frozen once they reach a terminal status.
#[derive(Clone, Default)]
pub struct ChatLog {
    inner: Arc<Mutex<Vec<ChatMessage>>>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a completed user message. Rejects input that is blank after
    /// trimming, before any state changes.
    pub async fn append_user(&self, text: &str) -> Result<ChatMessage, ChatError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ChatError::EmptyInput);
        }
        let message = ChatMessage::new(TurnRole::User, trimmed, MessageStatus::Completed);
        let mut messages = self.inner.lock().await;
        messages.push(message.clone());
        prune(&mut messages);
        Ok(message)
    }

    /// Append an assistant placeholder and return its id. `streaming`
    /// placeholders accept deltas; non-streaming ones sit in `Loading` until
    /// finalized.
    pub async fn begin_assistant(&self, streaming: bool) -> String {
        let status = if streaming {
            MessageStatus::Streaming
        } else {
            MessageStatus::Loading
        };
        let message = ChatMessage::new(TurnRole::Assistant, "", status);
        let id = message.id.clone();
        let mut messages = self.inner.lock().await;
        messages.push(message);
        prune(&mut messages);
        id
    }

    /// Append a streamed fragment to a `Streaming` message. A silent no-op
    /// for any other target: late chunks arriving after finalize/error (or
    /// after `clear`) must not corrupt the log.
    pub async fn append_delta(&self, id: &str, fragment: &str) {
        let mut messages = self.inner.lock().await;
        match messages.iter_mut().find(|message| message.id == id) {
            Some(message) if message.status == MessageStatus::Streaming => {
                message.content.push_str(fragment);
            }
            _ => {
                debug!(target: "hearth::chat", message = %id, "dropped delta for non-streaming message");
            }
        }
    }

    /// Complete a placeholder with its final content and usage. Rejected for
    /// messages that already reached a terminal status.
    pub async fn finalize(
        &self,
        id: &str,
        content: String,
        usage: Option<TokenUsage>,
    ) -> Result<ChatMessage, ChatError> {
        let mut messages = self.inner.lock().await;
        let message = messages
            .iter_mut()
            .find(|message| message.id == id)
            .ok_or_else(|| ChatError::UnknownMessage(id.to_string()))?;
        if message.status.is_terminal() {
            return Err(ChatError::AlreadyFinal(id.to_string()));
        }
        message.status = MessageStatus::Completed;
        message.content = content;
        message.usage = usage;
        Ok(message.clone())
    }

    /// Transition a placeholder to `Errored`, replacing whatever partial
    /// content accumulated with `display_text`.
    pub async fn mark_error(
        &self,
        id: &str,
        display_text: &str,
    ) -> Result<ChatMessage, ChatError> {
        let mut messages = self.inner.lock().await;
        let message = messages
            .iter_mut()
            .find(|message| message.id == id)
            .ok_or_else(|| ChatError::UnknownMessage(id.to_string()))?;
        if message.status.is_terminal() {
            return Err(ChatError::AlreadyFinal(id.to_string()));
        }
        message.status = MessageStatus::Errored;
        message.content = display_text.to_string();
        message.usage = None;
        Ok(message.clone())
    }

    /// Drop the whole conversation. Loader and registry state are untouched.
    pub async fn clear(&self) {
        self.inner.lock().await.clear();
    }

    pub async fn history(&self) -> Vec<ChatMessage> {
        self.inner.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// The most recent completed turns, oldest first, as engine input.
    /// Placeholders and errored messages never reach the engine.
    pub async fn recent_turns(&self, limit: usize) -> Vec<ChatTurn> {
        let messages = self.inner.lock().await;
        let mut turns: Vec<ChatTurn> = messages
            .iter()
            .rev()
            .filter(|message| message.status == MessageStatus::Completed)
            .take(limit)
            .map(|message| ChatTurn::new(message.role, message.content.clone()))
            .collect();
        turns.reverse();
        turns
    }
}

fn prune(messages: &mut Vec<ChatMessage>) {
    if messages.len() > HISTORY_LIMIT {
        let drop_count = messages.len() - HISTORY_LIMIT;
        messages.drain(0..drop_count);
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now()
        .timestamp_millis()
        .try_into()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blank_input_is_rejected_before_any_mutation() {
        let log = ChatLog::new();
        assert!(matches!(
            log.append_user("   \n\t ").await,
            Err(ChatError::EmptyInput)
        ));
        assert!(log.is_empty().await);

        let message = log.append_user("  hello  ").await.expect("message");
        assert_eq!(message.content, "hello");
        assert_eq!(message.status, MessageStatus::Completed);
        assert_eq!(log.len().await, 1);
    }

    #[tokio::test]
    async fn deltas_only_land_on_streaming_messages() {
        let log = ChatLog::new();
        let streaming = log.begin_assistant(true).await;
        let loading = log.begin_assistant(false).await;

        log.append_delta(&streaming, "Hel").await;
        log.append_delta(&loading, "nope").await;
        log.append_delta("missing-id", "nope").await;

        let history = log.history().await;
        assert_eq!(history[0].content, "Hel");
        assert_eq!(history[1].content, "");
    }

    #[tokio::test]
    async fn finalize_is_rejected_after_terminal_status() {
        let log = ChatLog::new();
        let id = log.begin_assistant(true).await;
        log.finalize(&id, "done".into(), None).await.expect("first finalize");
        assert!(matches!(
            log.finalize(&id, "again".into(), None).await,
            Err(ChatError::AlreadyFinal(_))
        ));
        assert!(matches!(
            log.mark_error(&id, "late error").await,
            Err(ChatError::AlreadyFinal(_))
        ));
        // content of a completed message is immutable
        assert_eq!(log.history().await[0].content, "done");
    }

    #[tokio::test]
    async fn late_deltas_after_finalize_are_dropped() {
        let log = ChatLog::new();
        let id = log.begin_assistant(true).await;
        log.append_delta(&id, "Hello").await;
        log.finalize(&id, "Hello".into(), None).await.expect("finalize");
        log.append_delta(&id, " world").await;
        assert_eq!(log.history().await[0].content, "Hello");
    }

    #[tokio::test]
    async fn overlapping_placeholders_stay_isolated() {
        let log = ChatLog::new();
        let first = log.begin_assistant(true).await;
        let second = log.begin_assistant(true).await;

        log.append_delta(&first, "aaa").await;
        log.append_delta(&second, "bbb").await;
        log.finalize(&first, "aaa".into(), None).await.expect("finalize");
        log.append_delta(&first, "late").await;
        log.append_delta(&second, "bbb").await;

        let history = log.history().await;
        assert_eq!(history[0].content, "aaa");
        assert_eq!(history[1].content, "bbbbbb");
        assert_eq!(history[1].status, MessageStatus::Streaming);
    }

    #[tokio::test]
    async fn mark_error_replaces_partial_content() {
        let log = ChatLog::new();
        let id = log.begin_assistant(true).await;
        log.append_delta(&id, "half a rep").await;
        let message = log.mark_error(&id, "Something went wrong.").await.expect("error");
        assert_eq!(message.status, MessageStatus::Errored);
        assert_eq!(message.content, "Something went wrong.");
        assert!(message.usage.is_none());
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let log = ChatLog::new();
        log.append_user("hi").await.expect("user");
        log.begin_assistant(true).await;
        log.clear().await;
        assert!(log.is_empty().await);
    }

    #[tokio::test]
    async fn recent_turns_skip_placeholders_and_errors() {
        let log = ChatLog::new();
        log.append_user("one").await.expect("user");
        let errored = log.begin_assistant(true).await;
        log.mark_error(&errored, "oops").await.expect("error");
        log.append_user("two").await.expect("user");
        let pending = log.begin_assistant(true).await;

        let turns = log.recent_turns(16).await;
        let contents: Vec<&str> = turns.iter().map(|turn| turn.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);

        // bounded window keeps the most recent completed turns
        let turns = log.recent_turns(1).await;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].content, "two");
        assert_eq!(turns[0].role, TurnRole::User);

        log.finalize(&pending, "reply".into(), None).await.expect("finalize");
        let turns = log.recent_turns(16).await;
        assert_eq!(turns.len(), 3);
    }
}
