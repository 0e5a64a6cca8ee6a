//! memwatch daemon: IPC transports, the watcher lifecycle, and the tick loop.

mod error;
pub mod protocol;
mod runtime;
pub mod transport;
mod watcher;

pub use error::DaemonError;
#[cfg(unix)]
pub use protocol::{DatagramObserver, DuplexObserver};
pub use protocol::StreamEvent;
pub use runtime::{init_tracing, run, run_until, start_blocking, IMAGE_SETTLE};
pub use transport::{open_transport, ControlMessage, Transport};
pub use watcher::{MemoryWatcher, StepSummary};
