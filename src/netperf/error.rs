use crate::backends::socket::TcpTableError;
use std::io;

/// Errors surfaced by `NetPerf::init` and `NetPerf::update`.
///
/// Per-process and per-device failures never show up here; they are
/// skipped or logged where they happen.
#[derive(Debug, thiserror::Error)]
pub enum NetPerfError {
    /// The previous socket table stays in effect.
    #[error(transparent)]
    TcpTable(#[from] TcpTableError),

    #[error("failed to enumerate network interfaces: {0}")]
    Interfaces(#[source] io::Error),
}
