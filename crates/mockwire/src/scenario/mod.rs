//! Scenario state table.
//!
//! Scenarios are named state machines keyed case-insensitively. A mapping
//! that declares a scenario is eligible only while the scenario's current
//! state equals the mapping's required state (`None` meaning "not started").
//! After a full match the dispatcher calls [`ScenarioStore::advance`], which
//! applies the counter and transition rules atomically per scenario.
//!
//! ## Module Structure
//!
//! - `ScenarioState` - snapshot of one scenario
//! - `ScenarioStore` - concurrent table, one lock per scenario

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioState {
    pub name: String,
    /// `None` until the first transition, and again after a terminal one
    pub state: Option<String>,
    /// Qualifying matches seen in the current state
    pub counter: u32,
    pub started: bool,
    pub finished: bool,
}

impl ScenarioState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: None,
            counter: 0,
            started: false,
            finished: false,
        }
    }

    fn reset(&mut self) {
        self.state = None;
        self.counter = 0;
        self.started = false;
        self.finished = false;
    }
}

/// Transition requested by a matched mapping.
#[derive(Debug, Clone, Copy)]
pub struct Transition<'a> {
    pub scenario: &'a str,
    /// State the mapping was selected in
    pub expected: Option<&'a str>,
    pub next: Option<&'a str>,
    /// Matches required before moving to `next` (default 1)
    pub times: Option<u32>,
}

/// Outcome of [`ScenarioStore::advance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Counter incremented, state unchanged
    Counted(u32),
    /// State moved to the contained value
    Transitioned(Option<String>),
    /// Another request moved the scenario first; nothing was applied
    Stale,
}

#[derive(Debug, Default)]
pub struct ScenarioStore {
    scenarios: RwLock<HashMap<String, Arc<Mutex<ScenarioState>>>>,
}

fn key(name: &str) -> String {
    name.to_lowercase()
}

impl ScenarioStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, name: &str) -> Arc<Mutex<ScenarioState>> {
        let key = key(name);
        if let Some(entry) = self.scenarios.read().get(&key) {
            return Arc::clone(entry);
        }
        let mut scenarios = self.scenarios.write();
        Arc::clone(
            scenarios
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(ScenarioState::new(name)))),
        )
    }

    /// Create the scenario entry if it does not exist yet.
    pub fn ensure(&self, name: &str) {
        self.entry(name);
    }

    /// Current state; `None` for unknown or not yet started scenarios.
    pub fn current_state(&self, name: &str) -> Option<String> {
        let entry = self.scenarios.read().get(&key(name)).cloned()?;
        let state = entry.lock().state.clone();
        state
    }

    pub fn get(&self, name: &str) -> Option<ScenarioState> {
        let entry = self.scenarios.read().get(&key(name)).cloned()?;
        let snapshot = entry.lock().clone();
        Some(snapshot)
    }

    /// Snapshot of every scenario, ordered by name.
    pub fn all(&self) -> Vec<ScenarioState> {
        let entries: Vec<_> = self.scenarios.read().values().cloned().collect();
        let mut states: Vec<ScenarioState> = entries.iter().map(|e| e.lock().clone()).collect();
        states.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        states
    }

    /// Apply a matched mapping's transition.
    ///
    /// The state is rechecked under the scenario's lock: if a concurrent
    /// request already moved it away from `expected`, nothing changes.
    pub fn advance(&self, transition: Transition<'_>) -> Advance {
        let entry = self.entry(transition.scenario);
        let mut scenario = entry.lock();

        if scenario.state.as_deref() != transition.expected {
            debug!(
                scenario = transition.scenario,
                expected = ?transition.expected,
                actual = ?scenario.state,
                "Scenario moved before transition, skipping"
            );
            return Advance::Stale;
        }

        scenario.started = true;
        scenario.finished = transition.next.is_none();
        scenario.counter += 1;

        if scenario.counter >= transition.times.unwrap_or(1) {
            scenario.state = transition.next.map(str::to_string);
            scenario.counter = 0;
            debug!(
                scenario = transition.scenario,
                state = ?scenario.state,
                "Scenario transitioned"
            );
            Advance::Transitioned(scenario.state.clone())
        } else {
            Advance::Counted(scenario.counter)
        }
    }

    /// Force a scenario into `state`, creating it when needed.
    pub fn set_state(&self, name: &str, state: Option<&str>) {
        let entry = self.entry(name);
        let mut scenario = entry.lock();
        scenario.state = state.map(str::to_string);
        scenario.counter = 0;
        scenario.started = state.is_some();
        scenario.finished = false;
    }

    /// Return one scenario to "not started". False when it is unknown.
    pub fn reset_scenario(&self, name: &str) -> bool {
        match self.scenarios.read().get(&key(name)) {
            Some(entry) => {
                entry.lock().reset();
                true
            }
            None => false,
        }
    }

    /// Return every scenario to "not started".
    pub fn reset(&self) {
        for entry in self.scenarios.read().values() {
            entry.lock().reset();
        }
    }

    pub fn len(&self) -> usize {
        self.scenarios.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.read().is_empty()
    }
}
