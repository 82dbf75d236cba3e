//! Engine vocabulary for the hearth core: model descriptors, load states,
//! progress reporting, the adapter seam to a concrete inference backend, and
//! the registry that owns initialized engine handles.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

mod catalog;
mod registry;

pub use catalog::{CatalogError, ModelCatalog, ModelDescriptor, SizeClass};
pub use registry::EngineRegistry;

/// Lifecycle of one catalog entry. `Loaded` and `Failed` are terminal: there
/// is no unload and no automatic retry within a session.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    Queued,
    Loading,
    Loaded,
    Failed(String),
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadState::Queued => "queued",
            LoadState::Loading => "loading",
            LoadState::Loaded => "loaded",
            LoadState::Failed(_) => "failed",
        }
    }

    pub fn display_label(&self) -> &'static str {
        match self {
            LoadState::Queued => "Queued",
            LoadState::Loading => "Loading",
            LoadState::Loaded => "Loaded",
            LoadState::Failed(_) => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadState::Loaded | LoadState::Failed(_))
    }
}

/// One progress report from an initialization task.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Completed fraction in `[0, 1]`.
    pub fraction: f64,
    pub text: String,
}

/// Handle an initialization task uses to report intermediate progress.
///
/// Decoupled from any re-render mechanism: the constructor decides where
/// reports go (loader snapshot, event bus, nowhere).
#[derive(Clone)]
pub struct ProgressSink {
    emit: Arc<dyn Fn(ProgressReport) + Send + Sync>,
}

impl ProgressSink {
    pub fn new(emit: impl Fn(ProgressReport) + Send + Sync + 'static) -> Self {
        Self {
            emit: Arc::new(emit),
        }
    }

    /// Sink that discards every report.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Report progress. Out-of-range or non-finite fractions are clamped so
    /// a misbehaving backend cannot produce a percent outside `[0, 100]`.
    pub fn report(&self, fraction: f64, text: impl Into<String>) {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        (self.emit)(ProgressReport {
            fraction,
            text: text.into(),
        });
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressSink")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("initialization failed: {0}")]
    Init(String),
    #[error("chat request failed: {0}")]
    Chat(String),
    #[error("response stream interrupted: {0}")]
    Interrupted(String),
    #[error("operation cancelled")]
    Cancelled,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

/// One entry of the transcript handed to an engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Sampling options for a chat call. Construct through [`ChatOptions::new`]
/// or use [`ChatOptions::clamped`] before handing untrusted values to an
/// engine; backends are not expected to re-validate.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatOptions {
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
}

impl ChatOptions {
    pub const MAX_TOKENS_CEILING: u32 = 4096;

    pub fn new(temperature: f64, max_tokens: u32, top_p: f64) -> Self {
        Self {
            temperature,
            max_tokens,
            top_p,
        }
        .clamped()
    }

    pub fn clamped(self) -> Self {
        Self {
            temperature: self.temperature.clamp(0.0, 1.0),
            max_tokens: self.max_tokens.clamp(1, Self::MAX_TOKENS_CEILING),
            top_p: self.top_p.clamp(0.0, 1.0),
        }
    }
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
            top_p: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// One incremental unit of a streaming response. The text fragment may be
/// empty; usage, when present, reflects the whole response so far and the
/// last value seen wins.
#[derive(Clone, Debug, Default)]
pub struct ChatChunk {
    pub delta: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Clone, Debug)]
pub struct ChatCompletion {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

/// Lazy, finite, non-restartable sequence of response chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, EngineError>> + Send>>;

/// Seam to a concrete inference backend: turns a descriptor into a usable
/// engine handle, reporting progress along the way. Initialization is the
/// expensive part of this system; implementations should poll the
/// cancellation token at their own suspension points and bail out with
/// [`EngineError::Cancelled`].
#[async_trait::async_trait]
pub trait EngineAdapter: Send + Sync {
    fn id(&self) -> &'static str;

    async fn initialize(
        &self,
        descriptor: &ModelDescriptor,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn ChatEngine>, EngineError>;
}

/// A fully initialized, usable model.
#[async_trait::async_trait]
pub trait ChatEngine: Send + Sync {
    async fn chat(
        &self,
        turns: &[ChatTurn],
        options: &ChatOptions,
    ) -> Result<ChatCompletion, EngineError>;

    async fn chat_stream(
        &self,
        turns: &[ChatTurn],
        options: &ChatOptions,
    ) -> Result<ChunkStream, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn load_state_labels_match_snake_case() {
        assert_eq!(LoadState::Queued.as_str(), "queued");
        assert_eq!(LoadState::Loading.as_str(), "loading");
        assert_eq!(LoadState::Loaded.as_str(), "loaded");
        assert_eq!(LoadState::Failed("boom".into()).as_str(), "failed");
        assert_eq!(LoadState::Loaded.display_label(), "Loaded");
        assert!(LoadState::Loaded.is_terminal());
        assert!(LoadState::Failed("x".into()).is_terminal());
        assert!(!LoadState::Loading.is_terminal());
    }

    #[test]
    fn progress_sink_clamps_out_of_range_fractions() {
        let seen: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink = ProgressSink::new(move |report| {
            seen_clone.lock().unwrap().push(report.fraction);
        });
        sink.report(-0.5, "below");
        sink.report(0.42, "inside");
        sink.report(7.0, "above");
        sink.report(f64::NAN, "nan");
        assert_eq!(*seen.lock().unwrap(), vec![0.0, 0.42, 1.0, 0.0]);
    }

    #[test]
    fn chat_options_clamp_to_documented_ranges() {
        let opts = ChatOptions::new(3.0, 0, 9.0);
        assert_eq!(opts.temperature, 1.0);
        assert_eq!(opts.max_tokens, 1);
        assert_eq!(opts.top_p, 1.0);

        let opts = ChatOptions::new(-1.0, 1_000_000, -0.2);
        assert_eq!(opts.temperature, 0.0);
        assert_eq!(opts.max_tokens, ChatOptions::MAX_TOKENS_CEILING);
        assert_eq!(opts.top_p, 0.0);

        let defaults = ChatOptions::default();
        assert_eq!(defaults.clamped(), defaults);
    }
}
