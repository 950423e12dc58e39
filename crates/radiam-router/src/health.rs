//! Peer/server health tracking. Failed targets are quarantined for a
//! back-off interval and skipped by selection until it elapses.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Health state of a routing target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetHealth {
    Available,
    Quarantined(Instant),
}

pub struct HealthTable {
    quarantined: Mutex<HashMap<String, Instant>>,
    backoff: Duration,
}

impl HealthTable {
    pub fn new(backoff: Duration) -> Self {
        Self {
            quarantined: Mutex::new(HashMap::new()),
            backoff,
        }
    }

    /// Mark a target failed until `now + backoff`
    pub fn quarantine(&self, target: &str) {
        let until = Instant::now() + self.backoff;
        debug!(target, ?until, "target quarantined");
        self.quarantined.lock().insert(target.to_string(), until);
    }

    pub fn state(&self, target: &str) -> TargetHealth {
        match self.quarantined.lock().get(target) {
            Some(until) if *until > Instant::now() => TargetHealth::Quarantined(*until),
            _ => TargetHealth::Available,
        }
    }

    pub fn is_available(&self, target: &str) -> bool {
        self.state(target) == TargetHealth::Available
    }

    /// Drop expired entries. Selection already treats them as available;
    /// this keeps the table small.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.quarantined.lock().retain(|_, until| *until > now);
    }

    /// Background sweep on a fixed cadence
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let table = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                table.sweep();
            }
        })
    }
}
