// Interface throughput history for the network panel

use chrono::{DateTime, Local};
use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;
use sysinfo::Networks;

/// Maximum number of history samples to keep (e.g., 60 samples = 1 minute at 1Hz)
const MAX_HISTORY_SAMPLES: usize = 60;

/// Label of the aggregate of all interfaces
pub const TOTAL_LABEL: &str = "total";

/// A single throughput measurement
#[derive(Debug, Clone)]
pub struct ThroughputSample {
    pub taken_at: DateTime<Local>,
    pub rx_rate: u64, // bytes per second
    pub tx_rate: u64, // bytes per second
}

/// Throughput history for one interface (or the total)
#[derive(Debug, Clone)]
pub struct InterfaceHistory {
    pub name: String,
    pub samples: VecDeque<ThroughputSample>,
}

impl InterfaceHistory {
    pub fn new(name: String) -> Self {
        Self {
            name,
            samples: VecDeque::with_capacity(MAX_HISTORY_SAMPLES),
        }
    }

    /// Add a new sample, removing old ones if we exceed the limit
    pub fn add_sample(&mut self, rx_rate: u64, tx_rate: u64) {
        self.samples.push_back(ThroughputSample {
            taken_at: Local::now(),
            rx_rate,
            tx_rate,
        });

        while self.samples.len() > MAX_HISTORY_SAMPLES {
            self.samples.pop_front();
        }
    }

    pub fn latest(&self) -> (u64, u64) {
        self.samples
            .back()
            .map(|s| (s.rx_rate, s.tx_rate))
            .unwrap_or((0, 0))
    }

    /// When the newest sample was taken
    pub fn updated_at(&self) -> Option<DateTime<Local>> {
        self.samples.back().map(|s| s.taken_at)
    }

    pub fn max_rx_rate(&self) -> u64 {
        self.samples.iter().map(|s| s.rx_rate).max().unwrap_or(0)
    }

    pub fn max_tx_rate(&self) -> u64 {
        self.samples.iter().map(|s| s.tx_rate).max().unwrap_or(0)
    }

    pub fn avg_rx_rate(&self) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        let sum: u64 = self.samples.iter().map(|s| s.rx_rate).sum();
        sum / self.samples.len() as u64
    }

    pub fn avg_tx_rate(&self) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        let sum: u64 = self.samples.iter().map(|s| s.tx_rate).sum();
        sum / self.samples.len() as u64
    }

    /// Samples as sparkline series `(rx, tx)`, oldest first
    pub fn series(&self) -> (Vec<u64>, Vec<u64>) {
        self.samples.iter().map(|s| (s.rx_rate, s.tx_rate)).unzip()
    }
}

/// System-wide interface throughput, sampled once per tick
pub struct NetworkHistory {
    networks: Networks,
    total: InterfaceHistory,
    interfaces: BTreeMap<String, InterfaceHistory>,
    /// 0 is the total, then interfaces in name order
    selected: usize,
    last_refresh: Instant,
}

impl NetworkHistory {
    pub fn new() -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
            total: InterfaceHistory::new(TOTAL_LABEL.to_string()),
            interfaces: BTreeMap::new(),
            selected: 0,
            last_refresh: Instant::now(),
        }
    }

    /// Sample every interface's counters since the previous refresh
    pub fn refresh(&mut self) {
        self.networks.refresh();
        let now = Instant::now();
        let seconds = now.duration_since(self.last_refresh).as_secs_f64();
        self.last_refresh = now;

        let deltas: Vec<(String, u64, u64)> = self
            .networks
            .list()
            .iter()
            .map(|(name, data)| (name.clone(), data.received(), data.transmitted()))
            .collect();

        self.record(&deltas, seconds);
    }

    /// Record byte deltas `(interface, rx, tx)` observed over `seconds`
    pub fn record(&mut self, deltas: &[(String, u64, u64)], seconds: f64) {
        let rate = |bytes: u64| {
            if seconds > 0.0 {
                (bytes as f64 / seconds) as u64
            } else {
                0
            }
        };

        let mut total_rx = 0;
        let mut total_tx = 0;
        for (name, rx, tx) in deltas {
            total_rx += rx;
            total_tx += tx;
            self.interfaces
                .entry(name.clone())
                .or_insert_with(|| InterfaceHistory::new(name.clone()))
                .add_sample(rate(*rx), rate(*tx));
        }

        self.total.add_sample(rate(total_rx), rate(total_tx));
    }

    /// Switch the panel to the next interface, wrapping back to the total
    pub fn cycle(&mut self) {
        self.selected = (self.selected + 1) % (self.interfaces.len() + 1);
    }

    pub fn selected(&self) -> &InterfaceHistory {
        match self.selected {
            0 => &self.total,
            n => self.interfaces.values().nth(n - 1).unwrap_or(&self.total),
        }
    }
}

impl Default for NetworkHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deltas(entries: &[(&str, u64, u64)]) -> Vec<(String, u64, u64)> {
        entries
            .iter()
            .map(|(name, rx, tx)| (name.to_string(), *rx, *tx))
            .collect()
    }

    #[test]
    fn test_interface_history() {
        let mut history = InterfaceHistory::new("eth0".to_string());

        history.add_sample(1000, 500);
        history.add_sample(2000, 1000);
        history.add_sample(1500, 750);

        assert_eq!(history.samples.len(), 3);
        assert_eq!(history.max_rx_rate(), 2000);
        assert_eq!(history.max_tx_rate(), 1000);
        assert_eq!(history.avg_rx_rate(), 1500);
        assert_eq!(history.avg_tx_rate(), 750);
        assert_eq!(history.latest(), (1500, 750));
        assert!(history.updated_at().is_some());
    }

    #[test]
    fn test_history_limit() {
        let mut history = InterfaceHistory::new("eth0".to_string());

        for i in 0..(MAX_HISTORY_SAMPLES + 10) {
            history.add_sample(i as u64, i as u64);
        }

        assert_eq!(history.samples.len(), MAX_HISTORY_SAMPLES);
        let (rx, _) = history.series();
        assert_eq!(rx.first(), Some(&10));
    }

    #[test]
    fn test_record_computes_rates_and_total() {
        let mut history = NetworkHistory::new();
        history.record(&deltas(&[("zz-a", 2000, 400), ("zz-b", 1000, 0)]), 2.0);

        assert_eq!(history.selected().name, TOTAL_LABEL);
        assert_eq!(history.selected().latest(), (1500, 200));
    }

    #[test]
    fn test_cycle_wraps_to_total() {
        let mut history = NetworkHistory::new();
        history.record(&deltas(&[("zz-b", 10, 10), ("zz-a", 20, 20)]), 1.0);

        history.cycle();
        assert_eq!(history.selected().name, "zz-a");
        history.cycle();
        assert_eq!(history.selected().name, "zz-b");
        history.cycle();
        assert_eq!(history.selected().name, TOTAL_LABEL);
    }

    #[test]
    fn test_zero_elapsed_records_zero_rate() {
        let mut history = NetworkHistory::new();
        history.record(&deltas(&[("zz-a", 5000, 5000)]), 0.0);
        assert_eq!(history.selected().latest(), (0, 0));
    }
}
