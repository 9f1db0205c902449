// Packet capture backend trait and implementations

use crate::netperf::classifier::LinkType;
use serde::{Deserialize, Serialize};
use std::io;
use std::net::IpAddr;
use std::time::Duration;

#[cfg(feature = "capture-pnet")]
pub mod pnet;

/// A local network interface as seen by a capture backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    pub addresses: Vec<IpAddr>,
    pub link: LinkType,
}

/// Options for opening a live capture handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Bytes of each frame that are decoded; accounting always uses the full length
    pub snapshot_len: usize,
    pub promiscuous: bool,
    /// `None` blocks until the next packet arrives
    pub read_timeout_ms: Option<u64>,
    /// Interfaces that are never captured
    pub ignored_interfaces: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            snapshot_len: 1024,
            promiscuous: false,
            read_timeout_ms: None,
            ignored_interfaces: vec!["lo".to_string()],
        }
    }
}

impl CaptureConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn is_ignored(&self, device: &str) -> bool {
        self.ignored_interfaces.iter().any(|name| name == device)
    }
}

/// A live capture handle on one device. Dropping it releases the handle.
pub trait PacketSource: Send {
    /// Block until the next frame.
    ///
    /// `Ok(None)` means the read timeout elapsed without traffic.
    fn next_frame(&mut self) -> io::Result<Option<&[u8]>>;
}

/// Capture backend trait
pub trait CaptureBackend: Send + Sync {
    /// Backend name (e.g., "pnet")
    fn name(&self) -> &'static str;

    /// List local interfaces with their addresses
    fn interfaces(&self) -> io::Result<Vec<Device>>;

    /// Open a live capture on `device`
    fn open(&self, device: &Device, config: &CaptureConfig) -> io::Result<Box<dyn PacketSource>>;
}

/// Pick the capture backend compiled into this build
pub fn select_capture_backend() -> Option<Box<dyn CaptureBackend>> {
    #[cfg(feature = "capture-pnet")]
    {
        if pnet::PnetCapture::is_available() {
            return Some(Box::new(pnet::PnetCapture::new()));
        }
    }

    None
}
