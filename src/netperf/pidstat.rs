// Per-process byte accumulator

use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    tx_bytes: u64,
    rx_bytes: u64,
}

/// Bytes seen for one process since the last `take()`.
///
/// Capture threads add to it, the process list drains it once per tick.
/// Both counters live under a single lock so a drain never splits an update.
#[derive(Debug, Default)]
pub struct PidStat {
    counters: Mutex<Counters>,
}

impl PidStat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tx(&self, bytes: u64) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.tx_bytes = counters.tx_bytes.saturating_add(bytes);
    }

    pub fn add_rx(&self, bytes: u64) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.rx_bytes = counters.rx_bytes.saturating_add(bytes);
    }

    /// Returns `(tx, rx)` and resets both to zero.
    pub fn take(&self) -> (u64, u64) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let drained = std::mem::take(&mut *counters);
        (drained.tx_bytes, drained.rx_bytes)
    }
}
