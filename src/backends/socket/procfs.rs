// Linux procfs-based socket source

use super::{SocketSource, TcpTableError};
use crate::netperf::socket_table::SocketInventory;
use crate::netperf::tcp_table::{TcpRow, parse_tcp_table};
use procfs::process::{FDTarget, Process};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Socket source reading the /proc filesystem:
/// - <root>/<pid>/fd/ - socket inodes held by each tracked process
/// - <root>/net/tcp   - the IPv4 TCP connection table
pub struct ProcfsSocketSource {
    root: PathBuf,
}

impl ProcfsSocketSource {
    pub fn new() -> Self {
        Self::with_root(DEFAULT_PROC_ROOT)
    }

    /// Use a different proc root (containers, fabricated trees in tests)
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn is_available(&self) -> bool {
        self.tcp_path().exists()
    }

    fn tcp_path(&self) -> PathBuf {
        self.root.join("net").join("tcp")
    }
}

impl Default for ProcfsSocketSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketSource for ProcfsSocketSource {
    fn name(&self) -> &'static str {
        "procfs"
    }

    fn socket_inodes(&self, pids: &[i32]) -> SocketInventory {
        let mut inventory = SocketInventory::new();

        for &pid in pids {
            let process = match Process::new_with_root(self.root.join(pid.to_string())) {
                Ok(process) => process,
                Err(e) => {
                    log::trace!("Skipping PID {}: {}", pid, e);
                    continue;
                }
            };

            let fds = match process.fd() {
                Ok(fds) => fds,
                Err(e) => {
                    log::trace!("Cannot list fds of PID {}: {}", pid, e);
                    continue;
                }
            };

            for fd in fds.flatten() {
                if let FDTarget::Socket(inode) = fd.target {
                    inventory.insert(inode, pid);
                }
            }
        }

        inventory
    }

    fn tcp_table(&self) -> Result<Vec<TcpRow>, TcpTableError> {
        let path = self.tcp_path();
        let to_error = |source| TcpTableError {
            path: path.clone(),
            source,
        };

        let file = File::open(&path).map_err(to_error)?;
        parse_tcp_table(BufReader::new(file)).map_err(to_error)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::symlink;
    use std::path::Path;
    use tempfile::TempDir;

    pub(crate) const TCP_HEADER: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode";

    /// Create <root>/<pid>/fd with one symlink per target
    pub(crate) fn fake_process(root: &Path, pid: i32, targets: &[&str]) {
        let fd_dir = root.join(pid.to_string()).join("fd");
        fs::create_dir_all(&fd_dir).unwrap();
        for (fd, target) in targets.iter().enumerate() {
            symlink(target, fd_dir.join(fd.to_string())).unwrap();
        }
    }

    pub(crate) fn fake_tcp_table(root: &Path, lines: &[String]) {
        let net = root.join("net");
        fs::create_dir_all(&net).unwrap();
        let mut contents = format!("{}\n", TCP_HEADER);
        for line in lines {
            contents.push_str(line);
            contents.push('\n');
        }
        fs::write(net.join("tcp"), contents).unwrap();
    }

    #[test]
    fn test_socket_inodes_from_fd_links() {
        let dir = TempDir::new().unwrap();
        fake_process(
            dir.path(),
            42,
            &["/dev/null", "socket:[12345]", "pipe:[999]", "socket:[777]"],
        );
        fake_process(dir.path(), 43, &["socket:[555]"]);

        let source = ProcfsSocketSource::with_root(dir.path());
        let inventory = source.socket_inodes(&[42, 43, 42]);

        assert_eq!(inventory.len(), 3);
        assert_eq!(inventory.get(&12345), Some(&42));
        assert_eq!(inventory.get(&777), Some(&42));
        assert_eq!(inventory.get(&555), Some(&43));
        assert_eq!(inventory.get(&999), None);
    }

    #[test]
    fn test_missing_process_is_skipped() {
        let dir = TempDir::new().unwrap();
        fake_process(dir.path(), 42, &["socket:[1]"]);

        let source = ProcfsSocketSource::with_root(dir.path());
        let inventory = source.socket_inodes(&[9999, 42]);

        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory.get(&1), Some(&42));
    }

    #[test]
    fn test_missing_tcp_table_is_an_error() {
        let dir = TempDir::new().unwrap();
        let source = ProcfsSocketSource::with_root(dir.path());

        assert!(!source.is_available());
        let err = source.tcp_table().unwrap_err();
        assert_eq!(err.path, dir.path().join("net").join("tcp"));
    }

    #[test]
    fn test_tcp_table_from_file() {
        let dir = TempDir::new().unwrap();
        fake_tcp_table(
            dir.path(),
            &["   0: 00000000:1388 00000000:1770 01 00000000:00000000 00:00000000 00000000     0        0 12345 1".to_string()],
        );

        let source = ProcfsSocketSource::with_root(dir.path());
        let rows = source.tcp_table().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].local_port, 5000);
        assert_eq!(rows[0].remote_port, 6000);
        assert_eq!(rows[0].inode, 12345);
    }
}
