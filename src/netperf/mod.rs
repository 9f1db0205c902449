//! Per-process network accounting.
//!
//! The kernel has no "bytes by pid" counter for ordinary sockets, so this
//! module rebuilds one:
//!
//! 1. find the socket inodes held by each tracked process (`/proc/<pid>/fd`),
//! 2. join them with the kernel TCP table to learn each socket's ports,
//! 3. capture packets on the interfaces those sockets use and charge each TCP
//!    segment to the owning process by port lookup.
//!
//! `NetPerf` owns all of the state. Capture threads only read the current
//! `SocketTable` and bump `PidStat` counters.

pub mod classifier;
pub mod devices;
pub mod error;
pub mod pidstat;
pub mod socket_table;
pub mod tcp_table;

pub use self::error::NetPerfError;

use self::classifier::{Direction, TcpHeader, classify};
use self::devices::DeviceCaptureManager;
use self::pidstat::PidStat;
use self::socket_table::SocketTable;
use crate::backends::capture::{CaptureBackend, CaptureConfig};
use crate::backends::socket::SocketSource;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// State shared between `NetPerf` and the capture threads
pub(crate) struct Accounting {
    table: RwLock<Arc<SocketTable>>,
    stats: RwLock<HashMap<i32, Arc<PidStat>>>,
}

impl Accounting {
    pub(crate) fn new() -> Self {
        Self {
            table: RwLock::new(Arc::new(SocketTable::default())),
            stats: RwLock::new(HashMap::new()),
        }
    }

    fn table(&self) -> Arc<SocketTable> {
        Arc::clone(&self.table.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn swap_table(&self, table: Arc<SocketTable>) {
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = table;
    }

    /// Make sure every pid has a counter
    fn track(&self, pids: &[i32]) {
        {
            let stats = self.stats.read().unwrap_or_else(PoisonError::into_inner);
            if pids.iter().all(|pid| stats.contains_key(pid)) {
                return;
            }
        }

        let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        for &pid in pids {
            stats.entry(pid).or_insert_with(|| Arc::new(PidStat::new()));
        }
    }

    fn prune(&self, live: &[i32]) -> usize {
        let live: HashSet<i32> = live.iter().copied().collect();
        let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        let before = stats.len();
        stats.retain(|pid, _| live.contains(pid));
        before - stats.len()
    }

    fn drain(&self, pid: i32) -> (u64, u64) {
        let stats = self.stats.read().unwrap_or_else(PoisonError::into_inner);
        stats.get(&pid).map(|stat| stat.take()).unwrap_or((0, 0))
    }

    /// Charge one captured segment to its process. Returns the direction if
    /// the segment belonged to a tracked process.
    pub(crate) fn record(&self, tcp: &TcpHeader, length: u64) -> Option<Direction> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        let (pid, direction) = classify(&table, tcp)?;

        let stats = self.stats.read().unwrap_or_else(PoisonError::into_inner);
        let stat = stats.get(&pid)?;
        match direction {
            Direction::Transmit => stat.add_tx(length),
            Direction::Receive => stat.add_rx(length),
        }

        Some(direction)
    }
}

/// Outcome of a successful refresh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Tracked sockets with a distinct local port
    pub tracked_sockets: usize,
    /// Interfaces whose capture loop was started by this refresh
    pub started_devices: Vec<String>,
}

/// Per-process network accounting engine.
pub struct NetPerf {
    accounting: Arc<Accounting>,
    source: Box<dyn SocketSource>,
    devices: DeviceCaptureManager,
    // Serializes refreshes from the tick loop and key handlers
    update_lock: Mutex<()>,
}

impl NetPerf {
    /// Build the first socket table and start capture on the relevant
    /// interfaces.
    pub fn init(
        pids: &[i32],
        source: Box<dyn SocketSource>,
        backend: Arc<dyn CaptureBackend>,
        config: CaptureConfig,
    ) -> Result<Self, NetPerfError> {
        log::info!(
            "Initializing network accounting ({} socket source, {} capture, {} pids)",
            source.name(),
            backend.name(),
            pids.len()
        );

        let netperf = Self {
            accounting: Arc::new(Accounting::new()),
            source,
            devices: DeviceCaptureManager::new(backend, config),
            update_lock: Mutex::new(()),
        };

        netperf.update(pids)?;
        Ok(netperf)
    }

    /// Refresh for the current set of tracked pids.
    ///
    /// New pids get zeroed counters, the socket table is rebuilt and swapped
    /// in, and interfaces that became relevant get a capture loop. If the TCP
    /// table can't be read the previous socket table stays in place.
    pub fn update(&self, pids: &[i32]) -> Result<UpdateSummary, NetPerfError> {
        let _guard = self.update_lock.lock().unwrap_or_else(PoisonError::into_inner);

        self.accounting.track(pids);

        // Built without holding any lock the capture threads need
        let rows = self.source.tcp_table()?;
        let inventory = self.source.socket_inodes(pids);
        let table = Arc::new(SocketTable::build(&rows, &inventory));

        log::debug!(
            "Socket table rebuilt: {} TCP rows, {} tracked inodes, {} local addresses, {} local ports, {} remote ports",
            rows.len(),
            inventory.len(),
            table.address_count(),
            table.by_local_port.len(),
            table.by_remote_port.len()
        );

        self.accounting.swap_table(Arc::clone(&table));

        let started_devices = self
            .devices
            .discover(&table, &self.accounting)
            .map_err(NetPerfError::Interfaces)?;

        if !started_devices.is_empty() {
            log::info!("Capturing on new interfaces: {}", started_devices.join(", "));
        }

        Ok(UpdateSummary {
            tracked_sockets: table.by_local_port.len(),
            started_devices,
        })
    }

    /// Bytes `(tx, rx)` charged to `pid` since the last call. Unknown pids
    /// report zero.
    pub fn stats(&self, pid: i32) -> (u64, u64) {
        self.accounting.drain(pid)
    }

    /// Drop counters for pids not in `live`. Returns how many were removed.
    pub fn prune(&self, live: &[i32]) -> usize {
        self.accounting.prune(live)
    }

    /// The socket table currently used for attribution
    pub fn table(&self) -> Arc<SocketTable> {
        self.accounting.table()
    }

    pub fn started_devices(&self) -> Vec<String> {
        self.devices.started()
    }

    /// Stop every capture loop. See `DeviceCaptureManager::shutdown` for why
    /// waiting is optional.
    pub fn shutdown(&self, wait: bool) {
        log::info!("Stopping packet capture (wait: {})", wait);
        self.devices.shutdown(wait);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::socket::ProcfsSocketSource;
    use crate::backends::socket::procfs::tests::{TCP_HEADER, fake_process, fake_tcp_table};
    use crate::netperf::classifier::TcpHeader;
    use crate::netperf::classifier::tests::ipv4_tcp_frame;
    use crate::netperf::devices::tests::{FakeBackend, device};
    use std::fs;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn hex_addr(addr: Ipv4Addr) -> String {
        format!("{:08X}", u32::from_ne_bytes(addr.octets()))
    }

    /// Established socket 192.168.1.5:<local> -> 10.0.0.9:<remote>
    fn tcp_row(local_port: u16, remote_port: u16, inode: u64) -> String {
        format!(
            "   0: {}:{:04X} {}:{:04X} 01 00000000:00000000 00:00000000 00000000  1000        0 {} 1 0000000000000000 20 4 30 10 -1",
            hex_addr(Ipv4Addr::new(192, 168, 1, 5)),
            local_port,
            hex_addr(Ipv4Addr::new(10, 0, 0, 9)),
            remote_port,
            inode
        )
    }

    /// 192.168.1.5:5000 -> 10.0.0.9:6000, inode 12345
    fn tcp_line() -> String {
        tcp_row(5000, 6000, 12345)
    }

    fn fake_proc() -> TempDir {
        let dir = TempDir::new().unwrap();
        fake_process(dir.path(), 42, &["/dev/null", "socket:[12345]"]);
        fake_tcp_table(dir.path(), &[tcp_line()]);
        dir
    }

    fn devices() -> Vec<crate::backends::capture::Device> {
        vec![
            device("lo", Ipv4Addr::LOCALHOST),
            device("eth0", Ipv4Addr::new(192, 168, 1, 5)),
            device("eth1", Ipv4Addr::new(172, 16, 0, 2)),
        ]
    }

    #[test]
    fn test_end_to_end_transmit_accounting() {
        let proc_root = fake_proc();
        let frames = (0..10).map(|_| ipv4_tcp_frame(5000, 6000, 1000)).collect();
        let (backend, drained) = FakeBackend::new(devices());
        let backend = Arc::new(backend.with_frames("eth0", frames));

        let netperf = NetPerf::init(
            &[42],
            Box::new(ProcfsSocketSource::with_root(proc_root.path())),
            backend.clone(),
            CaptureConfig::default(),
        )
        .unwrap();

        assert_eq!(netperf.started_devices(), vec!["eth0".to_string()]);

        let device = drained.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(device, "eth0");

        assert_eq!(netperf.stats(42), (10_000, 0));
        assert_eq!(netperf.stats(42), (0, 0));

        netperf.shutdown(true);
        assert_eq!(backend.open_count(), 1);
    }

    #[test]
    fn test_frames_charged_at_full_length() {
        let proc_root = fake_proc();
        let mut cut_short = ipv4_tcp_frame(5000, 6000, 9000);
        cut_short.truncate(4096);
        let frames = vec![ipv4_tcp_frame(5000, 6000, 9000), cut_short];
        let (backend, drained) = FakeBackend::new(devices());
        let backend = Arc::new(backend.with_frames("eth0", frames));

        // Decoding stops at 64 bytes, accounting must not
        let config = CaptureConfig {
            snapshot_len: 64,
            ..CaptureConfig::default()
        };
        let netperf = NetPerf::init(
            &[42],
            Box::new(ProcfsSocketSource::with_root(proc_root.path())),
            backend,
            config,
        )
        .unwrap();

        drained.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(netperf.stats(42), (18_000, 0));
        netperf.shutdown(true);
    }

    #[test]
    fn test_record_during_concurrent_table_swaps() {
        const SEGMENT: u64 = 100;
        const MIN_RECORDS: u64 = 2_000;

        let proc_root = fake_proc();
        fake_process(proc_root.path(), 43, &["socket:[200]"]);
        fake_process(proc_root.path(), 44, &["socket:[300]"]);
        let net = proc_root.path().join("net");

        // The same two connections, owned alternately by 42 and 43
        let tables = [
            [tcp_row(5000, 6000, 12345), tcp_row(7000, 8000, 200)],
            [tcp_row(5000, 6000, 200), tcp_row(7000, 8000, 12345)],
        ];
        let write_table = |rows: &[String; 2]| {
            let next = net.join("tcp.next");
            fs::write(&next, format!("{}\n{}\n{}\n", TCP_HEADER, rows[0], rows[1])).unwrap();
            fs::rename(&next, net.join("tcp")).unwrap();
        };
        write_table(&tables[0]);

        let (backend, _drained) = FakeBackend::new(Vec::new());
        let pids = [42, 43, 44];
        let netperf = NetPerf::init(
            &pids,
            Box::new(ProcfsSocketSource::with_root(proc_root.path())),
            Arc::new(backend),
            CaptureConfig::default(),
        )
        .unwrap();

        let done = AtomicBool::new(false);
        let swaps = AtomicU64::new(0);
        let transmitted = AtomicU64::new(0);
        let received = AtomicU64::new(0);

        thread::scope(|scope| {
            scope.spawn(|| {
                let mut i = 0;
                while !done.load(Ordering::Acquire) {
                    i += 1;
                    write_table(&tables[i % 2]);
                    netperf.update(&pids).unwrap();
                    swaps.fetch_add(1, Ordering::Release);
                }
            });

            let recorders: Vec<_> = (0..4)
                .map(|n| {
                    let (netperf, swaps) = (&netperf, &swaps);
                    let (tcp, total) = if n % 2 == 0 {
                        (TcpHeader { src_port: 5000, dst_port: 6000 }, &transmitted)
                    } else {
                        (TcpHeader { src_port: 8000, dst_port: 7000 }, &received)
                    };
                    scope.spawn(move || {
                        let mut records = 0;
                        let deadline = Instant::now() + Duration::from_secs(10);
                        // Keep going until the table has been swapped a few times
                        while records < MIN_RECORDS
                            || (swaps.load(Ordering::Acquire) < 5 && Instant::now() < deadline)
                        {
                            // Both tables know both connections, so every
                            // segment must be attributed
                            assert!(netperf.accounting.record(&tcp, SEGMENT).is_some());
                            total.fetch_add(SEGMENT, Ordering::Relaxed);
                            records += 1;
                        }
                    })
                })
                .collect();

            let results: Vec<_> = recorders.into_iter().map(|r| r.join()).collect();
            done.store(true, Ordering::Release);
            for result in results {
                result.unwrap();
            }
        });

        assert!(swaps.load(Ordering::Acquire) >= 5);

        let (tx42, rx42) = netperf.stats(42);
        let (tx43, rx43) = netperf.stats(43);
        assert_eq!(tx42 + tx43, transmitted.load(Ordering::Relaxed));
        assert_eq!(rx42 + rx43, received.load(Ordering::Relaxed));
        // Tracked but never in either table
        assert_eq!(netperf.stats(44), (0, 0));
        netperf.shutdown(true);
    }

    #[test]
    fn test_receive_accounting_and_unrelated_traffic() {
        let proc_root = fake_proc();
        let frames = vec![
            ipv4_tcp_frame(6000, 5000, 600),
            ipv4_tcp_frame(6000, 5000, 400),
            ipv4_tcp_frame(443, 51000, 1500),
            ipv4_tcp_frame(5000, 6000, 100),
        ];
        let (backend, drained) = FakeBackend::new(devices());
        let backend = Arc::new(backend.with_frames("eth0", frames));

        let netperf = NetPerf::init(
            &[42],
            Box::new(ProcfsSocketSource::with_root(proc_root.path())),
            backend,
            CaptureConfig::default(),
        )
        .unwrap();

        drained.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(netperf.stats(42), (100, 1000));
        netperf.shutdown(true);
    }

    #[test]
    fn test_unknown_pid_reports_zero() {
        let proc_root = fake_proc();
        let (backend, _drained) = FakeBackend::new(devices());

        let netperf = NetPerf::init(
            &[42],
            Box::new(ProcfsSocketSource::with_root(proc_root.path())),
            Arc::new(backend),
            CaptureConfig::default(),
        )
        .unwrap();

        assert_eq!(netperf.stats(31337), (0, 0));
        netperf.shutdown(true);
    }

    #[test]
    fn test_init_fails_without_tcp_table() {
        let dir = TempDir::new().unwrap();
        fake_process(dir.path(), 42, &["socket:[12345]"]);
        let (backend, _drained) = FakeBackend::new(devices());

        let result = NetPerf::init(
            &[42],
            Box::new(ProcfsSocketSource::with_root(dir.path())),
            Arc::new(backend),
            CaptureConfig::default(),
        );

        assert!(matches!(result, Err(NetPerfError::TcpTable(_))));
    }

    #[test]
    fn test_failed_update_keeps_previous_table() {
        let proc_root = fake_proc();
        let (backend, _drained) = FakeBackend::new(devices());

        let netperf = NetPerf::init(
            &[42],
            Box::new(ProcfsSocketSource::with_root(proc_root.path())),
            Arc::new(backend),
            CaptureConfig::default(),
        )
        .unwrap();

        let before = netperf.table();
        assert_eq!(before.local_port_owner(5000), Some(42));

        fs::remove_file(proc_root.path().join("net").join("tcp")).unwrap();
        assert!(netperf.update(&[42]).is_err());

        assert_eq!(*netperf.table(), *before);
        netperf.shutdown(true);
    }

    #[test]
    fn test_update_tracks_new_pids_and_prunes() {
        let proc_root = fake_proc();
        fake_process(proc_root.path(), 43, &["socket:[999]"]);
        let (backend, _drained) = FakeBackend::new(devices());

        let netperf = NetPerf::init(
            &[],
            Box::new(ProcfsSocketSource::with_root(proc_root.path())),
            Arc::new(backend),
            CaptureConfig::default(),
        )
        .unwrap();

        // Nothing tracked yet, so no socket and no capture
        assert!(netperf.table().is_empty());
        assert!(netperf.started_devices().is_empty());

        let summary = netperf.update(&[42, 43]).unwrap();
        assert_eq!(summary.tracked_sockets, 1);
        assert_eq!(summary.started_devices, vec!["eth0".to_string()]);

        // A second pass with the same interfaces starts nothing
        let summary = netperf.update(&[42, 43]).unwrap();
        assert!(summary.started_devices.is_empty());

        assert_eq!(netperf.prune(&[42]), 1);
        netperf.shutdown(true);
    }
}
