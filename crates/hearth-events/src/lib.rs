//! Broadcast event bus shared by the model loader and the chat surface.
//!
//! Consumers outside this workspace (progress bars, message panes) subscribe
//! to the bus instead of polling; every externally observable transition in
//! the core is published here as a JSON envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

pub mod topics;

/// Event envelope carried on the bus (RFC3339 time, dot.case kind).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Envelope {
    pub time: String,
    pub kind: String,
    pub payload: Value,
}

/// Broadcast bus for JSON-serializable events. Cheap to clone; all clones
/// share the same channel. Publishing never blocks and never fails: events
/// sent while no subscriber is attached are dropped.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Envelope>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Number of live subscribers; useful for deciding whether to build an
    /// expensive payload at all.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn publish<T: Serialize>(&self, kind: &str, payload: &T) {
        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(target: "hearth::events", kind, error = %err, "failed to serialize event payload");
                serde_json::json!({"_ser": "error"})
            }
        };
        let envelope = Envelope {
            time: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            kind: kind.to_string(),
            payload,
        };
        let _ = self.tx.send(envelope);
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(64)
    }
}
