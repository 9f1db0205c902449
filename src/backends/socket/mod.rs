// Socket inventory backends
//
// A socket source answers two questions for the accounting engine:
// which socket inodes do the tracked processes hold, and what does the
// kernel TCP table look like right now.

use crate::netperf::socket_table::SocketInventory;
use crate::netperf::tcp_table::TcpRow;
use std::io;
use std::path::PathBuf;

pub mod procfs;

pub use self::procfs::ProcfsSocketSource;

pub trait SocketSource: Send + Sync {
    /// Backend name (e.g., "procfs")
    fn name(&self) -> &'static str;

    /// Map socket inode -> pid for the given processes.
    ///
    /// Processes that exited or can't be inspected are skipped.
    fn socket_inodes(&self, pids: &[i32]) -> SocketInventory;

    /// Read and parse the kernel TCP table.
    fn tcp_table(&self) -> Result<Vec<TcpRow>, TcpTableError>;
}

/// The TCP table could not be opened or read.
#[derive(Debug, thiserror::Error)]
#[error("failed to read TCP table {path:?}: {source}")]
pub struct TcpTableError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}
