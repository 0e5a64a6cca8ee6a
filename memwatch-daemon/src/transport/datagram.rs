//! Connectionless transport: Unix datagrams sent to a fixed path.

use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};

use memwatch_core::{codec, DiffEntry, TransportKind};

use crate::error::{io_err, DaemonError};
use crate::transport::Transport;

/// Sends each non-empty batch to `peer`, as one datagram when it fits in
/// [`codec::MAX_DATAGRAM`] and as several record-aligned datagrams otherwise.
///
/// Nothing is bound locally and send failures are dropped: an observer that
/// is not listening simply misses that tick. A single record too large for a
/// datagram is never sent and is logged instead.
#[derive(Debug)]
pub struct DatagramTransport {
    socket: Option<UnixDatagram>,
    peer: PathBuf,
}

impl DatagramTransport {
    pub fn open(peer: &Path) -> Result<Self, DaemonError> {
        let socket = UnixDatagram::unbound().map_err(|e| io_err(peer, e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| io_err(peer, e))?;
        tracing::debug!(peer = %peer.display(), "datagram transport open");
        Ok(Self {
            socket: Some(socket),
            peer: peer.to_path_buf(),
        })
    }

    pub fn peer(&self) -> &Path {
        &self.peer
    }
}

impl Transport for DatagramTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Datagram
    }

    fn deliver(&mut self, batch: &[DiffEntry]) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };
        if batch.is_empty() {
            return;
        }
        let (payloads, oversized) = codec::encode_chunks(batch, codec::MAX_DATAGRAM);
        for entry in oversized {
            tracing::warn!(
                chain = %entry.name,
                limit = codec::MAX_DATAGRAM,
                "record exceeds datagram limit; not sent",
            );
        }
        for payload in payloads {
            if let Err(err) = socket.send_to(payload.as_bytes(), &self.peer) {
                tracing::trace!(error = %err, "datagram dropped");
            }
        }
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            tracing::debug!(peer = %self.peer.display(), "datagram transport closed");
        }
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }
}

impl Drop for DatagramTransport {
    fn drop(&mut self) {
        self.close();
    }
}
