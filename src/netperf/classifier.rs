// Frame decoding and traffic direction classification

use super::socket_table::SocketTable;
use pnet_packet::Packet;
use pnet_packet::ethernet::{EtherTypes, EthernetPacket};
use pnet_packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::ipv6::Ipv6Packet;
use pnet_packet::tcp::TcpPacket;

/// How frames from a device are framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    /// No link-layer header, the frame starts with the IP header (tun, ppp)
    RawIp,
}

/// Ports of a decoded TCP segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
}

/// Result of decoding one captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    NotTcp,
    Tcp(TcpHeader),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Transmit,
    Receive,
}

/// Decode just enough of a frame to get the TCP ports.
pub fn decode_frame(link: LinkType, frame: &[u8]) -> Segment {
    match link {
        LinkType::Ethernet => {
            let Some(ethernet) = EthernetPacket::new(frame) else {
                return Segment::NotTcp;
            };
            match ethernet.get_ethertype() {
                EtherTypes::Ipv4 => decode_ipv4(ethernet.payload()),
                EtherTypes::Ipv6 => decode_ipv6(ethernet.payload()),
                _ => Segment::NotTcp,
            }
        }
        LinkType::RawIp => match frame.first().map(|b| b >> 4) {
            Some(4) => decode_ipv4(frame),
            Some(6) => decode_ipv6(frame),
            _ => Segment::NotTcp,
        },
    }
}

fn decode_ipv4(bytes: &[u8]) -> Segment {
    match Ipv4Packet::new(bytes) {
        Some(ipv4) => decode_tcp(ipv4.get_next_level_protocol(), ipv4.payload()),
        None => Segment::NotTcp,
    }
}

fn decode_ipv6(bytes: &[u8]) -> Segment {
    match Ipv6Packet::new(bytes) {
        Some(ipv6) => decode_tcp(ipv6.get_next_header(), ipv6.payload()),
        None => Segment::NotTcp,
    }
}

fn decode_tcp(protocol: IpNextHeaderProtocol, payload: &[u8]) -> Segment {
    if protocol != IpNextHeaderProtocols::Tcp {
        return Segment::NotTcp;
    }
    match TcpPacket::new(payload) {
        Some(tcp) => Segment::Tcp(TcpHeader {
            src_port: tcp.get_source(),
            dst_port: tcp.get_destination(),
        }),
        None => Segment::NotTcp,
    }
}

/// Bytes the frame occupied on the wire.
///
/// Normally the captured length. If the capture buffer cut the frame short,
/// the IP length field (plus the link header) is larger and wins.
pub fn wire_length(link: LinkType, frame: &[u8]) -> u64 {
    let captured = frame.len() as u64;

    let declared = match link {
        LinkType::Ethernet => EthernetPacket::new(frame).and_then(|ethernet| {
            let header = (frame.len() - ethernet.payload().len()) as u64;
            ip_length(ethernet.payload()).map(|len| header + len)
        }),
        LinkType::RawIp => ip_length(frame),
    };

    declared.map_or(captured, |len| len.max(captured))
}

/// Total IP packet length from its header
fn ip_length(bytes: &[u8]) -> Option<u64> {
    match bytes.first().map(|b| b >> 4) {
        Some(4) => Ipv4Packet::new(bytes).map(|ip| u64::from(ip.get_total_length())),
        Some(6) => Ipv6Packet::new(bytes)
            .map(|ip| Ipv6Packet::minimum_packet_size() as u64 + u64::from(ip.get_payload_length())),
        _ => None,
    }
}

/// Attribute a TCP segment to a tracked pid.
///
/// Outbound if it leaves a known local port for a known remote port,
/// inbound if the reverse. The pid always comes from the remote-port view.
pub fn classify(table: &SocketTable, tcp: &TcpHeader) -> Option<(i32, Direction)> {
    if table.local_port_owner(tcp.src_port).is_some() {
        if let Some(pid) = table.remote_port_owner(tcp.dst_port) {
            return Some((pid, Direction::Transmit));
        }
    }

    if let Some(pid) = table.remote_port_owner(tcp.src_port) {
        if table.local_port_owner(tcp.dst_port).is_some() {
            return Some((pid, Direction::Receive));
        }
    }

    None
}
