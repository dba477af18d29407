//! Metrics collaborator boundary
//!
//! The controller reports counters here; aggregation happens elsewhere.

use crate::error::StartFailure;
use crate::info::ApInfo;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

pub trait ApMetrics: Send + Sync {
    fn start_result(&self, _success: bool, _reason: Option<StartFailure>) {}

    fn clients_changed(&self, _count: usize) {}

    /// Only called for valid (non-sentinel) channel info
    fn channel_switched(&self, _info: &ApInfo) {}

    fn band_preference_unsatisfied(&self) {}

    fn up_changed(&self, _is_up: bool) {}
}

/// Discards everything
pub struct NoopMetrics;

impl ApMetrics for NoopMetrics {}

/// Plain counters, readable as a serializable snapshot
#[derive(Debug, Default)]
pub struct ApCounters {
    start_success: AtomicU64,
    start_failure_generic: AtomicU64,
    start_failure_no_channel: AtomicU64,
    client_changes: AtomicU64,
    channel_switches: AtomicU64,
    band_preference_unsatisfied: AtomicU64,
    up_changes: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountersSnapshot {
    pub start_success: u64,
    pub start_failure_generic: u64,
    pub start_failure_no_channel: u64,
    pub client_changes: u64,
    pub channel_switches: u64,
    pub band_preference_unsatisfied: u64,
    pub up_changes: u64,
}

impl ApCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            start_success: self.start_success.load(Ordering::Relaxed),
            start_failure_generic: self.start_failure_generic.load(Ordering::Relaxed),
            start_failure_no_channel: self.start_failure_no_channel.load(Ordering::Relaxed),
            client_changes: self.client_changes.load(Ordering::Relaxed),
            channel_switches: self.channel_switches.load(Ordering::Relaxed),
            band_preference_unsatisfied: self.band_preference_unsatisfied.load(Ordering::Relaxed),
            up_changes: self.up_changes.load(Ordering::Relaxed),
        }
    }
}

impl ApMetrics for ApCounters {
    fn start_result(&self, success: bool, reason: Option<StartFailure>) {
        let counter = match (success, reason) {
            (true, _) => &self.start_success,
            (false, Some(StartFailure::NoChannel)) => &self.start_failure_no_channel,
            (false, _) => &self.start_failure_generic,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn clients_changed(&self, _count: usize) {
        self.client_changes.fetch_add(1, Ordering::Relaxed);
    }

    fn channel_switched(&self, _info: &ApInfo) {
        self.channel_switches.fetch_add(1, Ordering::Relaxed);
    }

    fn band_preference_unsatisfied(&self) {
        self.band_preference_unsatisfied.fetch_add(1, Ordering::Relaxed);
    }

    fn up_changed(&self, _is_up: bool) {
        self.up_changes.fetch_add(1, Ordering::Relaxed);
    }
}
