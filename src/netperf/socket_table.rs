// Snapshot of tracked TCP sockets, keyed for packet attribution

use super::tcp_table::TcpRow;
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Socket inode -> owning pid, for tracked processes only.
pub type SocketInventory = HashMap<u64, i32>;

/// Address key used for sockets bound to 0.0.0.0.
pub const ANY_ADDRESS: u64 = 0;

/// Three views of the tracked sockets, each mapping to the owning pid.
///
/// Never mutated after construction; `NetPerf` swaps in a fresh table each
/// tick.
///
/// `by_remote_port` is keyed by the remote port alone, so two connections to
/// different hosts on the same port collapse into one entry (last row wins).
/// Attribution can be wrong when a tracked and an untracked process both talk
/// to, say, port 443. Keying by the full 4-tuple would fix that.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SocketTable {
    pub by_local_address: HashMap<u64, i32>,
    pub by_local_port: HashMap<u64, i32>,
    pub by_remote_port: HashMap<u64, i32>,
}

impl SocketTable {
    /// Join TCP rows with the inode inventory. Rows whose inode has no
    /// tracked owner are left out.
    pub fn build(rows: &[TcpRow], inventory: &SocketInventory) -> Self {
        let mut table = Self::default();

        for row in rows {
            let Some(&pid) = inventory.get(&row.inode) else {
                continue;
            };

            table.by_local_address.insert(address_key(row.local_addr), pid);
            table.by_local_port.insert(u64::from(row.local_port), pid);
            table.by_remote_port.insert(u64::from(row.remote_port), pid);
        }

        table
    }

    pub fn is_empty(&self) -> bool {
        self.by_local_address.is_empty()
    }

    /// Number of distinct local addresses in use by tracked sockets
    pub fn address_count(&self) -> usize {
        self.by_local_address.len()
    }

    /// True if traffic on `addr` may belong to a tracked socket.
    pub fn matches_address(&self, addr: Ipv4Addr) -> bool {
        self.by_local_address.contains_key(&ANY_ADDRESS)
            || self.by_local_address.contains_key(&address_key(addr))
    }

    pub fn local_port_owner(&self, port: u16) -> Option<i32> {
        self.by_local_port.get(&u64::from(port)).copied()
    }

    pub fn remote_port_owner(&self, port: u16) -> Option<i32> {
        self.by_remote_port.get(&u64::from(port)).copied()
    }
}

pub fn address_key(addr: Ipv4Addr) -> u64 {
    u64::from(u32::from(addr))
}
