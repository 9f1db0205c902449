// Per-interface capture loops

use super::Accounting;
use super::classifier::{Segment, decode_frame, wire_length};
use super::socket_table::SocketTable;
use crate::backends::capture::{CaptureBackend, CaptureConfig, Device, PacketSource};
use std::collections::HashSet;
use std::io;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// Starts at most one capture loop per interface and stops them all together.
///
/// Interfaces are never un-captured: once a loop is started its name stays in
/// the started set until the manager is dropped, even if the loop failed to
/// open its device.
pub struct DeviceCaptureManager {
    backend: Arc<dyn CaptureBackend>,
    config: CaptureConfig,
    started: Mutex<HashSet<String>>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl DeviceCaptureManager {
    pub fn new(backend: Arc<dyn CaptureBackend>, config: CaptureConfig) -> Self {
        Self {
            backend,
            config,
            started: Mutex::new(HashSet::new()),
            handles: Mutex::new(Vec::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start loops on interfaces that carry a tracked local address.
    ///
    /// Returns the names of the interfaces started by this call.
    pub(crate) fn discover(
        &self,
        table: &SocketTable,
        accounting: &Arc<Accounting>,
    ) -> io::Result<Vec<String>> {
        if self.shutdown.load(Ordering::Acquire) {
            return Ok(Vec::new());
        }

        let devices = self.backend.interfaces()?;
        let mut started = self.started.lock().unwrap_or_else(PoisonError::into_inner);
        let mut newly_started = Vec::new();

        for device in devices {
            if started.contains(&device.name) || self.config.is_ignored(&device.name) {
                continue;
            }

            let relevant = device.addresses.iter().any(|addr| match addr {
                IpAddr::V4(v4) => table.matches_address(*v4),
                IpAddr::V6(_) => false,
            });
            if !relevant {
                continue;
            }

            let name = device.name.clone();
            match self.spawn(device, Arc::clone(accounting)) {
                Ok(handle) => {
                    self.handles
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(handle);
                    started.insert(name.clone());
                    newly_started.push(name);
                }
                Err(e) => log::error!("Failed to spawn capture thread for {}: {}", name, e),
            }
        }

        Ok(newly_started)
    }

    fn spawn(
        &self,
        device: Device,
        accounting: Arc<Accounting>,
    ) -> io::Result<thread::JoinHandle<()>> {
        let backend = Arc::clone(&self.backend);
        let config = self.config.clone();
        let shutdown = Arc::clone(&self.shutdown);

        thread::Builder::new()
            .name(format!("capture-{}", device.name))
            .spawn(move || {
                let source = match backend.open(&device, &config) {
                    Ok(source) => source,
                    Err(e) => {
                        log::warn!("Cannot capture on {}: {}", device.name, e);
                        return;
                    }
                };

                log::info!("Packet capture started on interface: {}", device.name);
                capture_loop(&device, source, config.snapshot_len, &accounting, &shutdown);
            })
    }

    /// Names of every interface a loop was started for
    pub fn started(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Signal every loop to stop.
    ///
    /// With `wait`, block until they exit. A loop blocked in a read without a
    /// timeout only notices the signal after its next packet, so waiting can
    /// take arbitrarily long on a quiet interface.
    pub fn shutdown(&self, wait: bool) {
        self.shutdown.store(true, Ordering::Release);

        if !wait {
            return;
        }

        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        for handle in handles {
            let name = handle.thread().name().unwrap_or("capture").to_string();
            if handle.join().is_err() {
                log::error!("Capture thread {} panicked", name);
            }
        }
    }
}

impl Drop for DeviceCaptureManager {
    fn drop(&mut self) {
        // Loops may be blocked in a read; signal without joining
        self.shutdown.store(true, Ordering::Release);
    }
}

fn capture_loop(
    device: &Device,
    mut source: Box<dyn PacketSource>,
    snapshot_len: usize,
    accounting: &Accounting,
    shutdown: &AtomicBool,
) {
    let mut frames: u64 = 0;
    let mut attributed: u64 = 0;

    while !shutdown.load(Ordering::Acquire) {
        match source.next_frame() {
            Ok(Some(frame)) => {
                frames += 1;
                let length = wire_length(device.link, frame);
                let decoded = &frame[..frame.len().min(snapshot_len)];

                if let Segment::Tcp(tcp) = decode_frame(device.link, decoded) {
                    if accounting.record(&tcp, length).is_some() {
                        attributed += 1;
                    }
                }

                if frames % 1000 == 0 {
                    log::debug!(
                        "Capture stats on {}: frames={}, attributed={}",
                        device.name,
                        frames,
                        attributed
                    );
                }
            }
            Ok(None) => {}
            Err(e) => {
                log::error!("Packet receive error on {}: {}", device.name, e);
                thread::sleep(Duration::from_millis(100));
            }
        }
    }

    log::info!(
        "Packet capture stopped on {} ({} frames, {} attributed)",
        device.name,
        frames,
        attributed
    );
}
