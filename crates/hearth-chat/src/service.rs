use std::sync::Arc;

use futures_util::StreamExt;
use hearth_engine::{ChatEngine, ChatOptions, ChunkStream, EngineError, TokenUsage};
use hearth_events::{topics, Bus};
use hearth_loader::{LoadProgress, ModelLoader, ModelOverview};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::log::{ChatError, ChatLog, ChatMessage};

/// Completed turns handed to the engine per request.
const ENGINE_TURNS_LIMIT: usize = 16;

/// Shown in place of a response that failed mid-generation. Partial output is
/// discarded rather than displayed as if it were final; the raw failure goes
/// to the log only.
const GENERIC_ERROR_TEXT: &str = "Sorry, an error occurred while generating a response.";
const CANCELLED_TEXT: &str = "Response cancelled.";

/// Consumer-facing surface over the loader, registry, and conversation log.
/// This is the in-process API boundary a rendering layer talks to; nothing
/// here knows about widgets or routes.
pub struct ChatService {
    loader: Arc<ModelLoader>,
    log: ChatLog,
    bus: Bus,
    options: ChatOptions,
}

impl ChatService {
    pub fn new(loader: Arc<ModelLoader>, bus: Bus) -> Self {
        Self {
            loader,
            log: ChatLog::new(),
            bus,
            options: ChatOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options.clamped();
        self
    }

    pub fn options(&self) -> ChatOptions {
        self.options
    }

    pub async fn list_models(&self) -> Vec<ModelOverview> {
        self.loader.overview().await
    }

    pub async fn progress_of(&self, id: &str) -> LoadProgress {
        self.loader.progress_of(id).await
    }

    pub async fn active_id(&self) -> Option<String> {
        self.loader.active_id().await
    }

    pub async fn switch_active(&self, id: &str) -> bool {
        self.loader.switch_active(id).await
    }

    pub async fn history(&self) -> Vec<ChatMessage> {
        self.log.history().await
    }

    /// Drop the conversation. Model loading and the active selection are
    /// untouched.
    pub async fn clear_conversation(&self) {
        self.log.clear().await;
        info!(target: "hearth::chat", "conversation cleared");
    }

    /// Blocking variant: one request, one complete response.
    pub async fn send_message(&self, text: &str) -> Result<ChatMessage, ChatError> {
        self.send_message_with_cancel(text, CancellationToken::new())
            .await
    }

    pub async fn send_message_with_cancel(
        &self,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<ChatMessage, ChatError> {
        let engine = self.active_engine().await?;
        let user = self.log.append_user(text).await?;
        self.bus.publish(topics::TOPIC_CHAT_MESSAGE, &user);

        let turns = self.log.recent_turns(ENGINE_TURNS_LIMIT).await;
        let placeholder = self.log.begin_assistant(false).await;
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            res = engine.chat(&turns, &self.options) => res,
        };
        let message = match result {
            Ok(completion) => {
                self.log
                    .finalize(&placeholder, completion.content, completion.usage)
                    .await?
            }
            Err(EngineError::Cancelled) => {
                info!(target: "hearth::chat", message = %placeholder, "response cancelled");
                self.log.mark_error(&placeholder, CANCELLED_TEXT).await?
            }
            Err(err) => {
                warn!(target: "hearth::chat", message = %placeholder, error = %err, "chat request failed");
                self.log.mark_error(&placeholder, GENERIC_ERROR_TEXT).await?
            }
        };
        self.bus.publish(topics::TOPIC_CHAT_MESSAGE, &message);
        Ok(message)
    }

    /// Streaming variant: the placeholder accumulates fragments as they
    /// arrive and is finalized with the full concatenation.
    pub async fn send_message_streaming(&self, text: &str) -> Result<ChatMessage, ChatError> {
        self.send_message_streaming_with_cancel(text, CancellationToken::new())
            .await
    }

    pub async fn send_message_streaming_with_cancel(
        &self,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<ChatMessage, ChatError> {
        let engine = self.active_engine().await?;
        let user = self.log.append_user(text).await?;
        self.bus.publish(topics::TOPIC_CHAT_MESSAGE, &user);

        let turns = self.log.recent_turns(ENGINE_TURNS_LIMIT).await;
        let placeholder = self.log.begin_assistant(true).await;
        let opened = tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            res = engine.chat_stream(&turns, &self.options) => res,
        };
        let message = match opened {
            Ok(chunks) => self.consume_stream(&placeholder, chunks, &cancel).await?,
            Err(EngineError::Cancelled) => {
                info!(target: "hearth::chat", message = %placeholder, "response cancelled");
                self.log.mark_error(&placeholder, CANCELLED_TEXT).await?
            }
            Err(err) => {
                warn!(target: "hearth::chat", message = %placeholder, error = %err, "chat stream failed to open");
                self.log.mark_error(&placeholder, GENERIC_ERROR_TEXT).await?
            }
        };
        self.bus.publish(topics::TOPIC_CHAT_MESSAGE, &message);
        Ok(message)
    }

    /// Apply chunks strictly in arrival order; the last usage seen wins.
    async fn consume_stream(
        &self,
        id: &str,
        mut chunks: ChunkStream,
        cancel: &CancellationToken,
    ) -> Result<ChatMessage, ChatError> {
        let mut content = String::new();
        let mut usage: Option<TokenUsage> = None;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => Some(Err(EngineError::Cancelled)),
                item = chunks.next() => item,
            };
            match next {
                Some(Ok(chunk)) => {
                    if !chunk.delta.is_empty() {
                        content.push_str(&chunk.delta);
                        self.log.append_delta(id, &chunk.delta).await;
                    }
                    if chunk.usage.is_some() {
                        usage = chunk.usage;
                    }
                }
                Some(Err(EngineError::Cancelled)) => {
                    info!(target: "hearth::chat", message = %id, "response cancelled mid-stream");
                    return self.log.mark_error(id, CANCELLED_TEXT).await;
                }
                Some(Err(err)) => {
                    warn!(target: "hearth::chat", message = %id, error = %err, "response stream interrupted");
                    return self.log.mark_error(id, GENERIC_ERROR_TEXT).await;
                }
                None => break,
            }
        }
        self.log.finalize(id, content, usage).await
    }

    /// The engine behind the active selection. Rejects before any
    /// conversation mutation when nothing finished loading yet.
    async fn active_engine(&self) -> Result<Arc<dyn ChatEngine>, ChatError> {
        let Some(id) = self.loader.active_id().await else {
            return Err(ChatError::NoActiveEngine);
        };
        self.loader
            .registry()
            .get(&id)
            .await
            .ok_or(ChatError::NoActiveEngine)
    }
}
