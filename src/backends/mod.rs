// Backend trait definitions
//
// `socket` maps processes to the TCP sockets they own, `capture` reads
// frames off network interfaces. Both are traits so the accounting engine
// can run against fakes in tests.

pub mod capture;
pub mod socket;

pub use self::capture::{CaptureBackend, select_capture_backend};
pub use self::socket::ProcfsSocketSource;
