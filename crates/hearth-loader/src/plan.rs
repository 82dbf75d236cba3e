use std::collections::{HashMap, VecDeque};

use hearth_engine::LoadState;

/// Effect of completing a load, reported back to the driver.
#[derive(Clone, Copy, Debug, Default)]
pub struct CompletionEffect {
    /// The completed model became the active selection (first success wins).
    pub activated: bool,
}

/// Pure scheduling state: the catalog-ordered FIFO queue, per-model load
/// states, the single in-flight marker, and the active selection.
///
/// Transitions are plain value mutations with no I/O, so every invariant
/// (at most one load in flight, terminal states never re-enqueued, active
/// implies loaded) can be tested without a runtime. [`super::ModelLoader`]
/// is the thin async driver around this type.
#[derive(Debug, Default)]
pub struct LoadPlan {
    queue: VecDeque<String>,
    states: HashMap<String, LoadState>,
    in_flight: Option<String>,
    active: Option<String>,
    seeded: bool,
}

impl LoadPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the queue with every id, in the order given. Returns false (and
    /// changes nothing) if the plan was already seeded this session.
    pub fn seed(&mut self, ids: impl IntoIterator<Item = String>) -> bool {
        if self.seeded {
            return false;
        }
        self.seeded = true;
        for id in ids {
            self.states.insert(id.clone(), LoadState::Queued);
            self.queue.push_back(id);
        }
        true
    }

    /// Claim the next queued id for loading. Yields nothing while another
    /// load is in flight or the queue is empty.
    pub fn begin_next(&mut self) -> Option<String> {
        if self.in_flight.is_some() {
            return None;
        }
        let id = self.queue.pop_front()?;
        self.states.insert(id.clone(), LoadState::Loading);
        self.in_flight = Some(id.clone());
        Some(id)
    }

    /// Record a successful load. Activates the model only when nothing is
    /// active yet.
    pub fn complete(&mut self, id: &str) -> CompletionEffect {
        if self.in_flight.as_deref() != Some(id) {
            return CompletionEffect::default();
        }
        self.in_flight = None;
        self.states.insert(id.to_string(), LoadState::Loaded);
        if self.active.is_none() {
            self.active = Some(id.to_string());
            return CompletionEffect { activated: true };
        }
        CompletionEffect::default()
    }

    pub fn fail(&mut self, id: &str, reason: impl Into<String>) {
        if self.in_flight.as_deref() != Some(id) {
            return;
        }
        self.in_flight = None;
        self.states
            .insert(id.to_string(), LoadState::Failed(reason.into()));
    }

    /// Return a cancelled in-flight load to the head of the queue as
    /// `Queued` so it can be retried or skipped cleanly.
    pub fn cancel(&mut self, id: &str) -> bool {
        if self.in_flight.as_deref() != Some(id) {
            return false;
        }
        self.in_flight = None;
        self.states.insert(id.to_string(), LoadState::Queued);
        self.queue.push_front(id.to_string());
        true
    }

    /// Move the active selection. Succeeds only onto a `Loaded` model;
    /// anything else leaves the selection untouched.
    pub fn switch_active(&mut self, id: &str) -> bool {
        match self.states.get(id) {
            Some(LoadState::Loaded) => {
                self.active = Some(id.to_string());
                true
            }
            _ => false,
        }
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn in_flight(&self) -> Option<&str> {
        self.in_flight.as_deref()
    }

    pub fn state_of(&self, id: &str) -> Option<&LoadState> {
        self.states.get(id)
    }

    pub fn has_queued(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.queue.is_empty()
    }
}
