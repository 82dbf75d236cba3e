use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use hearth_engine::{
    EngineAdapter, EngineError, EngineRegistry, LoadState, ModelCatalog, ModelDescriptor,
    ProgressSink,
};
use hearth_events::{topics, Bus};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::plan::LoadPlan;

static DEFAULT_DEBOUNCE_MS: Lazy<u64> = Lazy::new(|| {
    std::env::var("HEARTH_LOAD_DEBOUNCE_MS")
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(500)
});

#[derive(Clone, Debug)]
pub struct LoaderOptions {
    /// Settle delay between finishing one load and starting the next, so a
    /// drained queue never monopolizes the executor.
    pub debounce: Duration,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(*DEFAULT_DEBOUNCE_MS),
        }
    }
}

/// Answer to a progress query for one model.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct LoadProgress {
    pub in_progress: bool,
    pub percent: u8,
    pub status: String,
}

/// One catalog entry together with its current scheduling state.
#[derive(Clone, Debug, Serialize)]
pub struct ModelOverview {
    pub descriptor: ModelDescriptor,
    /// Absent until the queue has been seeded.
    pub state: Option<LoadState>,
    pub active: bool,
}

enum LoadOutcome {
    Continue,
    Halt,
}

/// Async driver around [`LoadPlan`]: runs initialization tasks one at a time
/// in catalog order, publishes progress, hands finished engines to the
/// registry, and keeps going past failures.
pub struct ModelLoader {
    catalog: ModelCatalog,
    adapter: Arc<dyn EngineAdapter>,
    registry: Arc<EngineRegistry>,
    bus: Bus,
    options: LoaderOptions,
    plan: Mutex<LoadPlan>,
    progress: Arc<StdMutex<HashMap<String, (u8, String)>>>,
    inflight_cancel: StdMutex<Option<(String, CancellationToken)>>,
}

impl ModelLoader {
    pub fn new(
        catalog: ModelCatalog,
        adapter: Arc<dyn EngineAdapter>,
        registry: Arc<EngineRegistry>,
        bus: Bus,
    ) -> Arc<Self> {
        Self::with_options(catalog, adapter, registry, bus, LoaderOptions::default())
    }

    pub fn with_options(
        catalog: ModelCatalog,
        adapter: Arc<dyn EngineAdapter>,
        registry: Arc<EngineRegistry>,
        bus: Bus,
        options: LoaderOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            adapter,
            registry,
            bus,
            options,
            plan: Mutex::new(LoadPlan::new()),
            progress: Arc::new(StdMutex::new(HashMap::new())),
            inflight_cancel: StdMutex::new(None),
        })
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    /// Seed the queue with every catalog id, in catalog order. Idempotent:
    /// later calls in the same session change nothing.
    pub async fn enqueue_all(&self) {
        let seeded = { self.plan.lock().await.seed(self.catalog.ids()) };
        if seeded {
            info!(
                target: "hearth::loader",
                models = self.catalog.len(),
                "load queue seeded"
            );
            self.bus.publish(
                topics::TOPIC_MODELS_CHANGED,
                &json!({"count": self.catalog.len()}),
            );
        }
    }

    /// Start loading the head of the queue. Does nothing while another load
    /// is in flight or the queue is empty. Subsequent queue items are picked
    /// up automatically after a settle delay; a fresh call is only needed
    /// after a cancellation.
    pub async fn process_next(self: &Arc<Self>) {
        let Some(job) = self.admit().await else {
            return;
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.drive(job).await;
        });
    }

    pub async fn active_id(&self) -> Option<String> {
        self.plan.lock().await.active().map(str::to_string)
    }

    pub async fn state_of(&self, id: &str) -> Option<LoadState> {
        self.plan.lock().await.state_of(id).cloned()
    }

    pub async fn is_idle(&self) -> bool {
        self.plan.lock().await.is_idle()
    }

    pub async fn progress_of(&self, id: &str) -> LoadProgress {
        let state = { self.plan.lock().await.state_of(id).cloned() };
        match state {
            Some(LoadState::Loading) => {
                let (percent, status) = self
                    .progress
                    .lock()
                    .expect("progress map lock poisoned")
                    .get(id)
                    .cloned()
                    .unwrap_or((0, "Starting load".to_string()));
                LoadProgress {
                    in_progress: true,
                    percent,
                    status,
                }
            }
            Some(LoadState::Loaded) => LoadProgress {
                in_progress: false,
                percent: 100,
                status: "Loaded".to_string(),
            },
            Some(LoadState::Queued) => LoadProgress {
                in_progress: false,
                percent: 0,
                status: "Queued".to_string(),
            },
            // failed models and ids never enqueued look the same to callers
            _ => LoadProgress {
                in_progress: false,
                percent: 0,
                status: "Not loaded".to_string(),
            },
        }
    }

    /// Every catalog entry with its current state and active flag, in
    /// catalog order.
    pub async fn overview(&self) -> Vec<ModelOverview> {
        let plan = self.plan.lock().await;
        self.catalog
            .iter()
            .map(|descriptor| ModelOverview {
                state: plan.state_of(&descriptor.id).cloned(),
                active: plan.active() == Some(descriptor.id.as_str()),
                descriptor: descriptor.clone(),
            })
            .collect()
    }

    /// Move the active selection to `id`. Succeeds only if that model is
    /// `Loaded`; otherwise returns false with no side effects.
    pub async fn switch_active(&self, id: &str) -> bool {
        let switched = { self.plan.lock().await.switch_active(id) };
        if switched {
            info!(target: "hearth::loader", model = %id, "model activated");
            self.bus
                .publish(topics::TOPIC_MODEL_ACTIVATED, &json!({"id": id}));
        } else {
            debug!(target: "hearth::loader", model = %id, "switch rejected: model not loaded");
        }
        switched
    }

    /// Cancel the load currently in flight, if any. The model returns to the
    /// head of the queue as `Queued`; the queue stays paused until the next
    /// `process_next` call.
    pub fn cancel_inflight(&self) -> bool {
        let guard = self
            .inflight_cancel
            .lock()
            .expect("cancel slot lock poisoned");
        match guard.as_ref() {
            Some((id, token)) => {
                info!(target: "hearth::loader", model = %id, "cancelling in-flight load");
                token.cancel();
                true
            }
            None => false,
        }
    }

    async fn admit(&self) -> Option<(String, CancellationToken)> {
        let id = { self.plan.lock().await.begin_next()? };
        // a new attempt always starts from zero
        self.progress
            .lock()
            .expect("progress map lock poisoned")
            .insert(id.clone(), (0, "Starting load".to_string()));
        let cancel = CancellationToken::new();
        *self
            .inflight_cancel
            .lock()
            .expect("cancel slot lock poisoned") = Some((id.clone(), cancel.clone()));
        info!(target: "hearth::loader", model = %id, "model load started");
        self.bus.publish(
            topics::TOPIC_LOAD_PROGRESS,
            &json!({"id": id, "percent": 0, "status": "Starting load"}),
        );
        Some((id, cancel))
    }

    async fn drive(self: Arc<Self>, first: (String, CancellationToken)) {
        let mut job = first;
        loop {
            let (id, cancel) = job;
            match self.load_one(&id, cancel).await {
                LoadOutcome::Halt => break,
                LoadOutcome::Continue => {}
            }
            if !self.plan.lock().await.has_queued() {
                info!(target: "hearth::loader", "load queue drained");
                break;
            }
            tokio::time::sleep(self.options.debounce).await;
            match self.admit().await {
                Some(next) => job = next,
                None => break,
            }
        }
    }

    async fn load_one(&self, id: &str, cancel: CancellationToken) -> LoadOutcome {
        let Some(descriptor) = self.catalog.get(id).cloned() else {
            // ids only enter the plan through the catalog, so this is a bug
            // upstream; record it as a failure and keep the queue moving
            self.finish_failure(id, "descriptor missing from catalog".to_string())
                .await;
            self.clear_inflight_cancel(id);
            return LoadOutcome::Continue;
        };
        let sink = self.progress_sink(id);
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            res = self.adapter.initialize(&descriptor, sink, cancel.clone()) => res,
        };
        self.clear_inflight_cancel(id);
        match result {
            Ok(engine) => {
                self.registry.register(id, engine).await;
                let effect = { self.plan.lock().await.complete(id) };
                self.progress
                    .lock()
                    .expect("progress map lock poisoned")
                    .insert(id.to_string(), (100, "Loaded".to_string()));
                info!(target: "hearth::loader", model = %id, "model load completed");
                self.bus
                    .publish(topics::TOPIC_LOAD_COMPLETED, &json!({"id": id}));
                if effect.activated {
                    info!(target: "hearth::loader", model = %id, "model activated");
                    self.bus
                        .publish(topics::TOPIC_MODEL_ACTIVATED, &json!({"id": id}));
                }
                LoadOutcome::Continue
            }
            Err(EngineError::Cancelled) => {
                self.plan.lock().await.cancel(id);
                self.progress
                    .lock()
                    .expect("progress map lock poisoned")
                    .remove(id);
                info!(target: "hearth::loader", model = %id, "model load cancelled; returned to queue");
                LoadOutcome::Halt
            }
            Err(err) => {
                warn!(target: "hearth::loader", model = %id, error = %err, "model load failed");
                self.finish_failure(id, err.to_string()).await;
                LoadOutcome::Continue
            }
        }
    }

    async fn finish_failure(&self, id: &str, reason: String) {
        self.plan.lock().await.fail(id, reason.clone());
        self.progress
            .lock()
            .expect("progress map lock poisoned")
            .remove(id);
        self.bus.publish(
            topics::TOPIC_LOAD_FAILED,
            &json!({"id": id, "reason": reason}),
        );
    }

    fn clear_inflight_cancel(&self, id: &str) {
        let mut guard = self
            .inflight_cancel
            .lock()
            .expect("cancel slot lock poisoned");
        if guard.as_ref().map(|(held, _)| held.as_str()) == Some(id) {
            *guard = None;
        }
    }

    fn progress_sink(&self, id: &str) -> ProgressSink {
        let progress = Arc::clone(&self.progress);
        let bus = self.bus.clone();
        let id = id.to_string();
        ProgressSink::new(move |report| {
            let percent = (report.fraction * 100.0).round() as u8;
            let mut guard = progress.lock().expect("progress map lock poisoned");
            let entry = guard.entry(id.clone()).or_insert((0, String::new()));
            // percent never moves backwards within one attempt
            let percent = percent.max(entry.0);
            *entry = (percent, report.text.clone());
            drop(guard);
            debug!(target: "hearth::loader", model = %id, percent, status = %report.text, "load progress");
            bus.publish(
                topics::TOPIC_LOAD_PROGRESS,
                &json!({"id": id, "percent": percent, "status": report.text}),
            );
        })
    }
}
