// Parser for the kernel TCP connection table (/proc/net/tcp)
//
//   sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
//    0: 00000000:1BC1 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 1417548 1 ...

use once_cell::sync::Lazy;
use regex::Regex;
use std::io::{self, BufRead};
use std::net::Ipv4Addr;

static TCP_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?P<sl>\d+):\s+(?P<local>[0-9A-Fa-f]{8}:[0-9A-Fa-f]{4})\s+(?P<remote>[0-9A-Fa-f]{8}:[0-9A-Fa-f]{4})\s+(?P<st>[0-9A-Fa-f]{2})\s+(?P<queues>\S+)\s+(?P<timer>\S+)\s+(?P<retrnsmt>\S+)\s+(?P<uid>\d+)\s+(?P<timeout>\d+)\s+(?P<inode>\d+)(\s|$)",
    )
    .expect("TCP table grammar is valid")
});

/// One connection from the TCP table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpRow {
    pub local_addr: Ipv4Addr,
    pub local_port: u16,
    pub remote_addr: Ipv4Addr,
    pub remote_port: u16,
    pub inode: u64,
}

/// Parse a TCP table. The first line is the header and is always skipped.
///
/// Lines that don't match the field grammar are ignored. Only read errors
/// from the underlying reader are reported.
pub fn parse_tcp_table<R: BufRead>(reader: R) -> io::Result<Vec<TcpRow>> {
    let mut rows = Vec::new();

    for line in reader.lines().skip(1) {
        let line = line?;
        match parse_line(&line) {
            Some(row) => rows.push(row),
            None => log::trace!("Skipping unrecognized TCP table line: {:?}", line),
        }
    }

    Ok(rows)
}

fn parse_line(line: &str) -> Option<TcpRow> {
    let caps = TCP_LINE.captures(line)?;

    let (local_addr, local_port) = parse_endpoint(&caps["local"])?;
    let (remote_addr, remote_port) = parse_endpoint(&caps["remote"])?;
    let inode = caps["inode"].parse().ok()?;

    Some(TcpRow {
        local_addr,
        local_port,
        remote_addr,
        remote_port,
        inode,
    })
}

/// `0100007F:1BC1` -> (127.0.0.1, 7105)
///
/// The kernel prints the address as a host-order u32, so its bytes are
/// recovered in native order. The port is printed big-endian.
fn parse_endpoint(field: &str) -> Option<(Ipv4Addr, u16)> {
    let (addr, port) = field.split_once(':')?;
    let raw = u32::from_str_radix(addr, 16).ok()?;
    let port = u16::from_str_radix(port, 16).ok()?;
    Some((Ipv4Addr::from(raw.to_ne_bytes()), port))
}
