//! Statistics snapshots for memory limit controllers.

use serde::{Deserialize, Serialize};

/// Counters maintained under the controller lock.
#[derive(Debug, Clone, Default)]
pub(crate) struct Counters {
    pub(crate) peak_usage: u64,
    pub(crate) admitted: u64,
    pub(crate) forced: u64,
    pub(crate) rejected: u64,
    pub(crate) waits: u64,
    pub(crate) cancelled: u64,
    pub(crate) timed_out: u64,
    pub(crate) trigger_fired: u64,
}

impl Counters {
    pub(crate) fn record_usage(&mut self, usage: u64) {
        if usage > self.peak_usage {
            self.peak_usage = usage;
        }
    }
}

/// Statistics snapshot from a memory limit controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterStats {
    /// Bytes currently reserved.
    pub current_usage: u64,
    /// Highest usage observed.
    pub peak_usage: u64,
    /// Configured ceiling in bytes; zero when unlimited.
    pub memory_limit: u64,
    /// Reservations admitted through `reserve` or `try_reserve`.
    pub admitted: u64,
    /// Reservations admitted through `force_reserve`.
    pub forced: u64,
    /// `try_reserve` calls turned away because usage was over the ceiling.
    pub rejected: u64,
    /// Reservations that had to park before being admitted or abandoned.
    pub waits: u64,
    /// Parked reservations abandoned through a cancellation token.
    pub cancelled: u64,
    /// Parked reservations abandoned because their deadline passed.
    pub timed_out: u64,
    /// Threads parked at the time of the snapshot.
    pub parked_waiters: usize,
    /// Times the trigger callback has fired.
    pub trigger_fired: u64,
}

impl LimiterStats {
    /// Current usage as a ratio of the ceiling (1.0 means full).
    pub fn utilization(&self) -> f64 {
        if self.memory_limit == 0 {
            0.0
        } else {
            self.current_usage as f64 / self.memory_limit as f64
        }
    }

    /// Peak usage as a ratio of the ceiling.
    pub fn peak_utilization(&self) -> f64 {
        if self.memory_limit == 0 {
            0.0
        } else {
            self.peak_usage as f64 / self.memory_limit as f64
        }
    }
}
