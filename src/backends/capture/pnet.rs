// pnet-based packet capture backend

use super::{CaptureBackend, CaptureConfig, Device, PacketSource};
use crate::netperf::classifier::LinkType;
use pnet::datalink::{self, Channel, NetworkInterface};
use pnet_datalink::{Config, DataLinkReceiver};
use std::io;

/// Receive buffer for one frame. pnet defaults to 4096 bytes, which cuts
/// jumbo frames and offloaded (GSO/TSO) segments of up to 64 KiB.
const READ_BUFFER_LEN: usize = 128 * 1024;

/// Capture through pnet datalink channels (AF_PACKET on Linux)
pub struct PnetCapture;

impl PnetCapture {
    pub fn new() -> Self {
        Self
    }

    pub fn is_available() -> bool {
        // Raw sockets on Linux/BSD, Npcap on Windows
        cfg!(target_os = "linux")
            || cfg!(target_os = "freebsd")
            || cfg!(target_os = "openbsd")
            || cfg!(target_os = "netbsd")
            || cfg!(target_os = "windows")
    }

    fn find_interface(name: &str) -> io::Result<NetworkInterface> {
        datalink::interfaces()
            .into_iter()
            .find(|iface| iface.name == name)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("interface {} not found", name),
                )
            })
    }
}

impl CaptureBackend for PnetCapture {
    fn name(&self) -> &'static str {
        "pnet"
    }

    fn interfaces(&self) -> io::Result<Vec<Device>> {
        let devices = datalink::interfaces()
            .into_iter()
            .map(|iface| Device {
                addresses: iface.ips.iter().map(|net| net.ip()).collect(),
                link: if iface.mac.is_some() {
                    LinkType::Ethernet
                } else {
                    LinkType::RawIp
                },
                name: iface.name,
            })
            .collect();

        Ok(devices)
    }

    fn open(&self, device: &Device, config: &CaptureConfig) -> io::Result<Box<dyn PacketSource>> {
        let interface = Self::find_interface(&device.name)?;

        match datalink::channel(&interface, channel_config(config))? {
            Channel::Ethernet(_tx, rx) => Ok(Box::new(PnetSource { rx })),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported channel type for {}", device.name),
            )),
        }
    }
}

fn channel_config(config: &CaptureConfig) -> Config {
    Config {
        read_timeout: config.read_timeout(),
        promiscuous: config.promiscuous,
        read_buffer_size: READ_BUFFER_LEN.max(config.snapshot_len),
        ..Default::default()
    }
}

struct PnetSource {
    rx: Box<dyn DataLinkReceiver>,
}

impl PacketSource for PnetSource {
    fn next_frame(&mut self) -> io::Result<Option<&[u8]>> {
        match self.rx.next() {
            Ok(frame) => Ok(Some(frame)),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
