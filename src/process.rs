use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Bytes per megabyte as displayed in the process table
pub const BYTES_PER_MB: f64 = 1_000_000.0;

/// One line of the process table
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRow {
    pub pid: i32,
    pub command: String,
    /// Percent of total CPU capacity (0-100 regardless of core count)
    pub cpu_percent: f32,
    pub mem_percent: f32,
    pub net_in_mbps: f64,
    pub net_out_mbps: f64,
    /// `None` when the process' I/O counters can't be read
    pub disk_write_mbps: Option<f64>,
    pub disk_read_mbps: Option<f64>,
}

impl ProcessRow {
    pub fn new(pid: i32, command: String) -> Self {
        Self {
            pid,
            command,
            cpu_percent: 0.0,
            mem_percent: 0.0,
            net_in_mbps: 0.0,
            net_out_mbps: 0.0,
            disk_write_mbps: None,
            disk_read_mbps: None,
        }
    }

    pub fn format_rate(mbps: f64) -> String {
        format!("{:.3}", mbps)
    }

    /// Disk rates; unreadable counters show as `-1.000`
    pub fn format_disk_rate(mbps: Option<f64>) -> String {
        Self::format_rate(mbps.unwrap_or(-1.0))
    }
}

/// Convert a byte count accumulated over `seconds` into MB/s
pub fn bytes_to_mbps(bytes: u64, seconds: f64) -> f64 {
    if seconds <= 0.0 {
        return 0.0;
    }
    bytes as f64 / BYTES_PER_MB / seconds
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMethod {
    #[default]
    Cpu,
    Mem,
    Pid,
}

impl SortMethod {
    pub fn label(&self) -> &'static str {
        match self {
            SortMethod::Cpu => "CPU",
            SortMethod::Mem => "MEM",
            SortMethod::Pid => "PID",
        }
    }
}

/// Sort rows in place. CPU and memory sort descending, PID ascending; ties
/// fall back to PID so the order is stable between ticks.
pub fn sort_rows(rows: &mut [ProcessRow], method: SortMethod) {
    rows.sort_by(|a, b| {
        let primary = match method {
            SortMethod::Cpu => b
                .cpu_percent
                .partial_cmp(&a.cpu_percent)
                .unwrap_or(Ordering::Equal),
            SortMethod::Mem => b
                .mem_percent
                .partial_cmp(&a.mem_percent)
                .unwrap_or(Ordering::Equal),
            SortMethod::Pid => Ordering::Equal,
        };
        primary.then(a.pid.cmp(&b.pid))
    });
}
