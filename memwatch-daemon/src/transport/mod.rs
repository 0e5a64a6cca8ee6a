//! Delivery of diff batches to an observer.
//!
//! Two strategies share one [`Transport`] interface:
//! - [`datagram`]: connectionless, one datagram per non-empty batch, no
//!   feedback.
//! - [`duplex`]: a listening stream socket; inbound control lines are
//!   acknowledged and a broken peer triggers a reconnect.
//!
//! Each strategy acquires its socket in its constructor and releases it in
//! `close` (also run on drop).

use std::path::Path;

use memwatch_core::{DiffEntry, TransportKind};

use crate::error::DaemonError;

#[cfg(unix)]
pub mod datagram;
#[cfg(unix)]
pub mod duplex;

/// A control line received from the observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage(pub String);

/// One IPC endpoint, driven once per watcher tick.
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Read and acknowledge whatever the observer has sent since the last
    /// tick. Runs before [`Transport::deliver`] in every tick.
    fn drain_control(&mut self) -> Vec<ControlMessage> {
        Vec::new()
    }

    /// Push one tick's batch. Called every tick, including with an empty
    /// batch, which is never transmitted.
    fn deliver(&mut self, batch: &[DiffEntry]);

    /// Release the endpoint. Calling it again is a no-op.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Open the transport selected by `kind` at `path`.
#[cfg(unix)]
pub fn open_transport(
    kind: TransportKind,
    path: &Path,
) -> Result<Box<dyn Transport>, DaemonError> {
    Ok(match kind {
        TransportKind::Datagram => Box::new(datagram::DatagramTransport::open(path)?),
        TransportKind::Duplex => Box::new(duplex::DuplexTransport::open(path)?),
    })
}

#[cfg(not(unix))]
pub fn open_transport(
    kind: TransportKind,
    _path: &Path,
) -> Result<Box<dyn Transport>, DaemonError> {
    Err(DaemonError::Unsupported(kind))
}

/// Remove a leftover socket file so `path` can be bound again.
///
/// Fails if something is still accepting connections on it.
#[cfg(unix)]
pub(crate) fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    use std::io::ErrorKind;
    use std::os::unix::net::UnixStream;

    if !socket.exists() {
        return Ok(());
    }

    match UnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::SocketInUse {
                socket: socket.to_path_buf(),
            });
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale socket before bind",
            );
        }
    }

    match std::fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(crate::error::io_err(socket, err)),
    }
}

#[cfg(unix)]
pub(crate) fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| crate::error::io_err(path, e))
}
