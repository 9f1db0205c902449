use crate::netperf::NetPerf;
use crate::process::{ProcessRow, bytes_to_mbps};
use anyhow::{Context, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid as NixPid;
use procfs::process::Process;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;
use sysinfo::System;

/// Which processes end up in the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessFilter {
    pub prefix: String,
    pub show_all: bool,
}

impl ProcessFilter {
    pub fn matches(&self, name: &str) -> bool {
        self.show_all || name.starts_with(&self.prefix)
    }
}

/// Cumulative per-process I/O counters from the previous tick, turned into
/// rates on the next one
#[derive(Debug, Default)]
struct DiskCounters {
    previous: HashMap<i32, (u64, u64)>,
}

impl DiskCounters {
    /// `(write, read)` MB/s for `pid`. `None` when the counters are unreadable.
    fn sample(
        &mut self,
        pid: i32,
        current: Option<(u64, u64)>,
        seconds: f64,
    ) -> (Option<f64>, Option<f64>) {
        let Some((read, written)) = current else {
            self.previous.remove(&pid);
            return (None, None);
        };

        let (last_read, last_written) = self
            .previous
            .insert(pid, (read, written))
            .unwrap_or((read, written));

        (
            Some(bytes_to_mbps(written.saturating_sub(last_written), seconds)),
            Some(bytes_to_mbps(read.saturating_sub(last_read), seconds)),
        )
    }

    fn retain(&mut self, live: &[i32]) {
        self.previous.retain(|pid, _| live.contains(pid));
    }
}

/// Samples the tracked processes once per tick
pub struct ProcessMonitor {
    system: System,
    netperf: Option<NetPerf>,
    filter: ProcessFilter,
    proc_root: PathBuf,
    tracked: Vec<i32>,
    disk: DiskCounters,
    last_update: Instant,
}

impl ProcessMonitor {
    pub fn new(filter: ProcessFilter, proc_root: PathBuf, netperf: Option<NetPerf>) -> Self {
        let mut system = System::new_all();
        system.refresh_all();

        Self {
            system,
            netperf,
            filter,
            proc_root,
            tracked: Vec::new(),
            disk: DiskCounters::default(),
            last_update: Instant::now(),
        }
    }

    /// Pids currently matching the filter, sorted
    pub fn select_pids(&self) -> Vec<i32> {
        let mut pids: Vec<i32> = self
            .system
            .processes()
            .iter()
            .filter(|(_, process)| self.filter.matches(&process.name().to_string_lossy()))
            .map(|(pid, _)| pid.as_u32() as i32)
            .collect();
        pids.sort_unstable();
        pids
    }

    /// Refresh everything and build one row per tracked process
    pub fn update(&mut self) -> Vec<ProcessRow> {
        self.system.refresh_all();

        let now = Instant::now();
        let seconds = now.duration_since(self.last_update).as_secs_f64();
        self.last_update = now;

        let pids = self.select_pids();

        if let Some(netperf) = &self.netperf {
            match netperf.update(&pids) {
                Ok(summary) => log::trace!(
                    "Tracking {} sockets for {} processes",
                    summary.tracked_sockets,
                    pids.len()
                ),
                Err(e) => log::warn!("Network accounting refresh failed: {}", e),
            }
            if pids != self.tracked {
                let removed = netperf.prune(&pids);
                if removed > 0 {
                    log::debug!("Pruned network counters for {} exited processes", removed);
                }
            }
        }
        if pids != self.tracked {
            self.disk.retain(&pids);
            self.tracked = pids.clone();
        }

        let cpu_count = self.system.cpus().len().max(1) as f32;
        let total_memory = self.system.total_memory();

        let mut rows = Vec::with_capacity(pids.len());
        for pid in pids {
            let Some(process) = self.system.process(sysinfo::Pid::from_u32(pid as u32)) else {
                continue;
            };

            let mut row = ProcessRow::new(pid, process.name().to_string_lossy().into_owned());
            row.cpu_percent = process.cpu_usage() / cpu_count;
            row.mem_percent = if total_memory > 0 {
                (process.memory() as f64 / total_memory as f64 * 100.0) as f32
            } else {
                0.0
            };

            if let Some(netperf) = &self.netperf {
                let (tx, rx) = netperf.stats(pid);
                row.net_out_mbps = bytes_to_mbps(tx, seconds);
                row.net_in_mbps = bytes_to_mbps(rx, seconds);
            }

            let io = Process::new_with_root(self.proc_root.join(pid.to_string()))
                .and_then(|p| p.io())
                .map(|io| (io.read_bytes, io.write_bytes));
            if let Err(e) = &io {
                log::trace!("No I/O counters for pid {}: {}", pid, e);
            }
            let (write, read) = self.disk.sample(pid, io.ok(), seconds);
            row.disk_write_mbps = write;
            row.disk_read_mbps = read;

            rows.push(row);
        }

        rows
    }

    pub fn attach_netperf(&mut self, netperf: NetPerf) {
        self.netperf = Some(netperf);
    }

    pub fn filter(&self) -> &ProcessFilter {
        &self.filter
    }

    pub fn set_show_all(&mut self, show_all: bool) {
        self.filter.show_all = show_all;
    }

    /// Short description of the network accounting state for the header
    pub fn network_status(&self) -> String {
        match &self.netperf {
            None => "net: unavailable".to_string(),
            Some(netperf) => {
                let devices = netperf.started_devices();
                if devices.is_empty() {
                    "net: idle".to_string()
                } else {
                    format!("net: {}", devices.join(","))
                }
            }
        }
    }

    /// Stop packet capture, optionally waiting for the capture threads
    pub fn shutdown(&self, wait: bool) {
        if let Some(netperf) = &self.netperf {
            netperf.shutdown(wait);
        }
    }
}

/// Ask a process to terminate
pub fn kill_process(pid: i32) -> Result<()> {
    signal::kill(NixPid::from_raw(pid), Signal::SIGTERM)
        .context(format!("Failed to send SIGTERM to PID {}", pid))?;
    log::info!("Sent SIGTERM to PID {}", pid);
    Ok(())
}
