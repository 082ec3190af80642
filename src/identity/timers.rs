//! Per-event duration timers

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Start instants keyed by event name
///
/// `consume` on a name that was never started (or was already consumed)
/// returns `None`; it is not an error.
#[derive(Debug, Default)]
pub struct EventTimers {
    started: HashMap<String, Instant>,
}

impl EventTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the timer for `name`
    pub fn start(&mut self, name: &str) {
        self.start_at(name, Instant::now());
    }

    pub fn start_at(&mut self, name: &str, at: Instant) {
        self.started.insert(name.to_string(), at);
    }

    /// Stop the timer for `name` and return the elapsed time
    pub fn consume(&mut self, name: &str) -> Option<Duration> {
        self.started
            .remove(name)
            .map(|start| Instant::now().saturating_duration_since(start))
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.started.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.started.len()
    }

    pub fn is_empty(&self) -> bool {
        self.started.is_empty()
    }

    pub fn clear(&mut self) {
        self.started.clear();
    }
}
