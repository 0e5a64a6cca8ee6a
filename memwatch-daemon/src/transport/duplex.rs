//! Connection-oriented transport: a listening Unix stream socket.
//!
//! The watcher owns the socket path and accepts one observer at a time. Every
//! tick runs three phases in order:
//!
//! 1. drain: accept a waiting observer if there is none, read whatever it sent,
//!    and answer each complete line with `ACK\n<line>\n`;
//! 2. send: write `CHANGED\n` followed by the encoded batch, if non-empty;
//! 3. classify: look at the last error seen during this tick. A broken peer
//!    triggers a reconnect, would-block is the idle steady state, anything
//!    else is logged and marks the link degraded. An error equal to the
//!    previous one is ignored entirely.
//!
//! All socket I/O is non-blocking. Outbound bytes the observer's socket
//! cannot take yet are queued and flushed ahead of anything newer, so frames
//! are never interleaved. Both directions are bounded: an observer that stops
//! reading, or sends an unterminated line longer than [`MAX_CONTROL_LINE`], is
//! dropped and the transport goes back to accepting.

use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use memwatch_core::codec::{self, ACK_TOKEN, CHANGED_TOKEN};
use memwatch_core::{DiffEntry, TransportKind};

use crate::error::{io_err, DaemonError};
use crate::transport::{prepare_socket_for_bind, set_socket_permissions, ControlMessage, Transport};

const READ_CHUNK: usize = 4096;
/// Most bytes read from the observer in one tick.
pub const MAX_READ_PER_TICK: usize = 16 * READ_CHUNK;
/// Longest control line accepted before the observer is dropped.
pub const MAX_CONTROL_LINE: usize = 4 * READ_CHUNK;
/// Most unsent bytes queued for an observer that is behind before it is
/// dropped.
pub const MAX_OUTBOUND: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Closed,
    Connecting,
    /// Listening, with or without an observer attached.
    Connected,
    /// An unclassified error was seen and has not cleared yet.
    Degraded,
}

/// Comparable identity of an I/O failure, used to de-duplicate repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkError {
    kind: ErrorKind,
    code: Option<i32>,
}

impl LinkError {
    fn from_io(err: &io::Error) -> Self {
        Self {
            kind: err.kind(),
            code: err.raw_os_error(),
        }
    }

    /// The observer hung up (read returned end-of-file).
    fn peer_closed() -> Self {
        Self {
            kind: ErrorKind::BrokenPipe,
            code: None,
        }
    }

    /// The watcher gave up on the observer (overflowed a buffer bound).
    fn peer_aborted() -> Self {
        Self {
            kind: ErrorKind::ConnectionAborted,
            code: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (os error {code})", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

#[derive(Debug)]
pub struct DuplexTransport {
    listener: Option<UnixListener>,
    peer: Option<UnixStream>,
    path: PathBuf,
    state: LinkState,
    /// Bytes received that do not yet form a complete line.
    inbound: Vec<u8>,
    /// Bytes queued for the observer but not yet accepted by its socket.
    outbound: Vec<u8>,
    tick_error: Option<LinkError>,
    last_error: Option<LinkError>,
}

impl DuplexTransport {
    /// Bind `path` and make one non-blocking accept attempt.
    ///
    /// The transport is usable whether or not an observer was waiting.
    pub fn open(path: &Path) -> Result<Self, DaemonError> {
        prepare_socket_for_bind(path)?;
        let listener = UnixListener::bind(path).map_err(|e| io_err(path, e))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| io_err(path, e))?;
        set_socket_permissions(path)?;

        let mut transport = Self {
            listener: Some(listener),
            peer: None,
            path: path.to_path_buf(),
            state: LinkState::Connecting,
            inbound: Vec::new(),
            outbound: Vec::new(),
            tick_error: None,
            last_error: None,
        };
        transport.accept_peer();
        transport.tick_error = None;
        transport.state = LinkState::Connected;
        tracing::info!(
            socket = %path.display(),
            observer = transport.peer.is_some(),
            "duplex transport listening",
        );
        Ok(transport)
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn has_peer(&self) -> bool {
        self.peer.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes still waiting to be written to the observer.
    pub fn pending_bytes(&self) -> usize {
        self.outbound.len()
    }

    fn accept_peer(&mut self) {
        if self.peer.is_some() {
            return;
        }
        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        match listener.accept() {
            Ok((stream, _)) => match stream.set_nonblocking(true) {
                Ok(()) => {
                    tracing::info!(socket = %self.path.display(), "observer connected");
                    self.peer = Some(stream);
                }
                Err(err) => self.observe(&err),
            },
            Err(err) => self.observe(&err),
        }
    }

    fn read_inbound(&mut self) {
        let mut buf = [0u8; READ_CHUNK];
        let mut budget = MAX_READ_PER_TICK;
        while budget > 0 {
            let Some(peer) = self.peer.as_mut() else {
                return;
            };
            let want = budget.min(READ_CHUNK);
            match peer.read(&mut buf[..want]) {
                Ok(0) => {
                    self.tick_error = Some(LinkError::peer_closed());
                    return;
                }
                Ok(n) => {
                    self.inbound.extend_from_slice(&buf[..n]);
                    budget -= n;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.observe(&err);
                    return;
                }
            }
        }
    }

    /// Queue `bytes` behind anything still unsent and push as much as the
    /// socket takes. Returns false once the observer is unusable.
    fn write_peer(&mut self, bytes: &[u8]) -> bool {
        if self.peer.is_none() {
            return false;
        }
        // A caught-up observer always gets the next frame, whatever its size.
        if !self.outbound.is_empty() && self.outbound.len() + bytes.len() > MAX_OUTBOUND {
            tracing::warn!(
                socket = %self.path.display(),
                pending = self.outbound.len(),
                "observer is not reading; dropping it",
            );
            self.abort_peer();
            return false;
        }
        self.outbound.extend_from_slice(bytes);
        self.flush_outbound()
    }

    fn flush_outbound(&mut self) -> bool {
        let mut written = 0;
        let result = loop {
            let Some(peer) = self.peer.as_mut() else {
                break false;
            };
            if written == self.outbound.len() {
                break true;
            }
            match peer.write(&self.outbound[written..]) {
                Ok(0) => {
                    self.observe(&io::Error::from(ErrorKind::WriteZero));
                    break false;
                }
                Ok(n) => written += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                // The observer is behind; the rest goes out on a later tick.
                Err(err) if err.kind() == ErrorKind::WouldBlock => break true,
                Err(err) => {
                    self.observe(&err);
                    break false;
                }
            }
        };
        self.outbound.drain(..written);
        result
    }

    fn abort_peer(&mut self) {
        self.peer = None;
        self.outbound.clear();
        self.tick_error = Some(LinkError::peer_aborted());
    }

    fn observe(&mut self, err: &io::Error) {
        self.tick_error = Some(LinkError::from_io(err));
    }

    fn classify(&mut self) {
        let Some(err) = self.tick_error.take() else {
            self.recover();
            return;
        };
        if self.last_error == Some(err) {
            return;
        }
        self.last_error = Some(err);

        match err.kind {
            ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected => self.reconnect(),
            ErrorKind::WouldBlock => self.recover(),
            _ => {
                tracing::warn!(
                    socket = %self.path.display(),
                    error = %err,
                    "unexpected duplex transport error",
                );
                self.state = LinkState::Degraded;
            }
        }
    }

    fn recover(&mut self) {
        if self.state == LinkState::Degraded {
            self.state = LinkState::Connected;
        }
    }

    fn reconnect(&mut self) {
        tracing::info!(socket = %self.path.display(), "observer disconnected; reconnecting");
        self.state = LinkState::Connecting;
        self.peer = None;
        self.inbound.clear();
        self.outbound.clear();
        self.last_error = None;
        self.accept_peer();
        self.tick_error = None;
        self.state = LinkState::Connected;
    }
}

impl Transport for DuplexTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Duplex
    }

    fn drain_control(&mut self) -> Vec<ControlMessage> {
        if self.listener.is_none() {
            return Vec::new();
        }
        self.tick_error = None;
        self.accept_peer();
        if !self.outbound.is_empty() {
            self.flush_outbound();
        }
        self.read_inbound();

        let mut messages = Vec::new();
        while let Some(end) = self.inbound.iter().position(|&b| b == b'\n') {
            let text = String::from_utf8_lossy(&self.inbound[..end])
                .trim_end_matches('\r')
                .to_string();
            self.inbound.drain(..=end);
            let ack = format!("{ACK_TOKEN}{text}\n");
            let acked = self.write_peer(ack.as_bytes());
            messages.push(ControlMessage(text));
            if !acked {
                break;
            }
        }
        if self.inbound.len() > MAX_CONTROL_LINE {
            tracing::warn!(
                socket = %self.path.display(),
                buffered = self.inbound.len(),
                "control line too long; dropping observer",
            );
            self.inbound.clear();
            self.abort_peer();
        }
        messages
    }

    fn deliver(&mut self, batch: &[DiffEntry]) {
        if self.listener.is_none() {
            return;
        }
        if !batch.is_empty() && self.peer.is_some() {
            let frame = format!("{CHANGED_TOKEN}{}", codec::encode(batch));
            self.write_peer(frame.as_bytes());
        }
        self.classify();
    }

    fn close(&mut self) {
        self.peer = None;
        self.outbound.clear();
        if self.listener.take().is_some() {
            if let Err(err) = std::fs::remove_file(&self.path) {
                if err.kind() != ErrorKind::NotFound {
                    tracing::warn!(socket = %self.path.display(), error = %err, "failed to remove socket");
                }
            }
            tracing::debug!(socket = %self.path.display(), "duplex transport closed");
        }
        self.state = LinkState::Closed;
    }

    fn is_open(&self) -> bool {
        self.listener.is_some()
    }
}

impl Drop for DuplexTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> DuplexTransport {
        DuplexTransport::open(&dir.path().join("watcher.sock")).expect("open")
    }

    fn connect(transport: &DuplexTransport) -> UnixStream {
        let client = UnixStream::connect(transport.path()).expect("connect");
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("timeout");
        client
    }

    fn read_exactly(client: &mut UnixStream, len: usize) -> String {
        let mut buf = vec![0u8; len];
        client.read_exact(&mut buf).expect("read");
        String::from_utf8(buf).expect("utf8")
    }

    fn tick(transport: &mut DuplexTransport, batch: &[DiffEntry]) -> Vec<ControlMessage> {
        let control = transport.drain_control();
        transport.deliver(batch);
        control
    }

    #[test]
    fn opens_connected_without_observer() {
        let dir = TempDir::new().expect("tempdir");
        let mut transport = open(&dir);
        assert_eq!(transport.state(), LinkState::Connected);
        assert!(!transport.has_peer());

        tick(&mut transport, &[DiffEntry::new("10", 1)]);
        assert_eq!(transport.state(), LinkState::Connected);
    }

    #[test]
    fn acknowledges_before_pushing_changes() {
        let dir = TempDir::new().expect("tempdir");
        let mut transport = open(&dir);
        let mut client = connect(&transport);
        client.write_all(b"ping\n").expect("send");

        let control = tick(&mut transport, &[DiffEntry::new("10", 1)]);
        assert_eq!(control, vec![ControlMessage("ping".to_string())]);

        let expected = "ACK\nping\nCHANGED\n10\n00000001\n";
        assert_eq!(read_exactly(&mut client, expected.len()), expected);
    }

    #[test]
    fn partial_control_line_waits_for_newline() {
        let dir = TempDir::new().expect("tempdir");
        let mut transport = open(&dir);
        let mut client = connect(&transport);

        client.write_all(b"pi").expect("send");
        assert!(tick(&mut transport, &[]).is_empty());

        client.write_all(b"ng\r\n").expect("send");
        assert_eq!(
            tick(&mut transport, &[]),
            vec![ControlMessage("ping".to_string())]
        );
    }

    #[test]
    fn empty_batch_writes_nothing() {
        let dir = TempDir::new().expect("tempdir");
        let mut transport = open(&dir);
        let mut client = connect(&transport);
        tick(&mut transport, &[]);

        client.set_nonblocking(true).expect("nonblocking");
        let mut buf = [0u8; 8];
        let err = client.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
    }

    #[test]
    fn hangup_reconnects_to_next_observer() {
        let dir = TempDir::new().expect("tempdir");
        let mut transport = open(&dir);
        let first = connect(&transport);
        tick(&mut transport, &[]);
        assert!(transport.has_peer());

        drop(first);
        tick(&mut transport, &[DiffEntry::new("10", 1)]);
        assert!(!transport.has_peer(), "broken peer is dropped");
        assert_eq!(transport.state(), LinkState::Connected);

        let mut second = connect(&transport);
        tick(&mut transport, &[DiffEntry::new("10", 2)]);
        assert!(transport.has_peer());
        let expected = "CHANGED\n10\n00000002\n";
        assert_eq!(read_exactly(&mut second, expected.len()), expected);
    }

    #[test]
    fn control_line_from_departing_observer_is_still_returned() {
        let dir = TempDir::new().expect("tempdir");
        let mut transport = open(&dir);
        let mut client = connect(&transport);
        tick(&mut transport, &[]);

        client.write_all(b"bye\n").expect("send");
        drop(client);
        let control = tick(&mut transport, &[]);
        assert_eq!(control, vec![ControlMessage("bye".to_string())]);
        assert!(!transport.has_peer());
        assert_eq!(transport.state(), LinkState::Connected);
    }

    #[test]
    fn slow_observer_receives_whole_frames() {
        let dir = TempDir::new().expect("tempdir");
        let mut transport = open(&dir);
        let mut client = connect(&transport);
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("timeout");
        tick(&mut transport, &[]);

        let mut expected = String::new();
        let mut batches: Vec<Vec<DiffEntry>> = (0..5u8)
            .map(|i| {
                let name = char::from(b'a' + i).to_string().repeat(100_000);
                vec![DiffEntry::new(name, u32::from(i))]
            })
            .collect();
        batches.push(vec![DiffEntry::new("tail", 0xabc)]);
        for batch in &batches {
            expected.push_str(CHANGED_TOKEN);
            expected.push_str(&codec::encode(batch));
            tick(&mut transport, batch);
        }
        assert!(transport.has_peer());
        assert_eq!(transport.state(), LinkState::Connected);

        let len = expected.len();
        let reader = std::thread::spawn(move || read_exactly(&mut client, len));
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while transport.pending_bytes() > 0 {
            assert!(std::time::Instant::now() < deadline, "outbound never drained");
            std::thread::sleep(Duration::from_millis(5));
            tick(&mut transport, &[]);
        }
        let received = reader.join().expect("reader");
        assert!(received == expected, "frames were split or reordered");
    }

    #[test]
    fn observer_that_never_reads_is_dropped() {
        let dir = TempDir::new().expect("tempdir");
        let mut transport = open(&dir);
        let _stuck = connect(&transport);
        tick(&mut transport, &[]);

        let name = "n".repeat(150_000);
        let mut dropped = false;
        for value in 0..40 {
            tick(&mut transport, &[DiffEntry::new(name.as_str(), value)]);
            if !transport.has_peer() {
                dropped = true;
                break;
            }
        }
        assert!(dropped, "stalled observer kept its slot");
        assert_eq!(transport.state(), LinkState::Connected);
        assert_eq!(transport.pending_bytes(), 0);

        let mut next = connect(&transport);
        tick(&mut transport, &[DiffEntry::new("tail", 0xabc)]);
        let expected = "CHANGED\ntail\n00000abc\n";
        assert_eq!(read_exactly(&mut next, expected.len()), expected);
    }

    #[test]
    fn unterminated_flood_drops_observer() {
        let dir = TempDir::new().expect("tempdir");
        let mut transport = open(&dir);
        let mut client = connect(&transport);
        tick(&mut transport, &[]);

        let writer = std::thread::spawn(move || {
            let chunk = [b'x'; READ_CHUNK];
            let mut sent = 0;
            while sent < 4 * MAX_READ_PER_TICK {
                match client.write(&chunk) {
                    Ok(n) => sent += n,
                    Err(_) => break,
                }
            }
        });

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while transport.has_peer() {
            assert!(
                std::time::Instant::now() < deadline,
                "unterminated input kept the observer"
            );
            assert!(tick(&mut transport, &[]).is_empty());
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(transport.state(), LinkState::Connected);
        writer.join().expect("writer");
    }

    #[test]
    fn continuous_control_input_does_not_stall_a_tick() {
        let dir = TempDir::new().expect("tempdir");
        let mut transport = open(&dir);
        let mut client = connect(&transport);
        tick(&mut transport, &[]);

        let writer = std::thread::spawn(move || {
            let lines = b"ping\n".repeat(1000);
            while client.write_all(&lines).is_ok() {}
        });

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let control = loop {
            let control = tick(&mut transport, &[]);
            if !control.is_empty() {
                break control;
            }
            assert!(std::time::Instant::now() < deadline, "no control input arrived");
            std::thread::sleep(Duration::from_millis(5));
        };
        assert!(control.len() <= MAX_READ_PER_TICK / "ping\n".len());

        transport.close();
        writer.join().expect("writer");
    }

    #[test]
    fn second_hangup_is_also_handled() {
        let dir = TempDir::new().expect("tempdir");
        let mut transport = open(&dir);
        for _ in 0..2 {
            let client = connect(&transport);
            tick(&mut transport, &[]);
            assert!(transport.has_peer());
            drop(client);
            tick(&mut transport, &[]);
            assert!(!transport.has_peer());
        }
    }

    #[test]
    fn repeated_error_is_suppressed() {
        let dir = TempDir::new().expect("tempdir");
        let mut transport = open(&dir);
        let odd = io::Error::from(ErrorKind::InvalidData);

        transport.observe(&odd);
        transport.classify();
        assert_eq!(transport.state(), LinkState::Degraded);

        transport.state = LinkState::Connected;
        transport.observe(&odd);
        transport.classify();
        assert_eq!(
            transport.state(),
            LinkState::Connected,
            "same error twice is not handled again"
        );
    }

    #[test]
    fn degraded_clears_on_quiet_tick() {
        let dir = TempDir::new().expect("tempdir");
        let mut transport = open(&dir);
        transport.observe(&io::Error::from(ErrorKind::InvalidData));
        transport.classify();
        assert_eq!(transport.state(), LinkState::Degraded);

        tick(&mut transport, &[]);
        assert_eq!(transport.state(), LinkState::Connected);
    }

    #[test]
    fn close_removes_socket_and_is_idempotent() {
        let dir = TempDir::new().expect("tempdir");
        let mut transport = open(&dir);
        let path = transport.path().to_path_buf();
        assert!(path.exists());

        transport.close();
        transport.close();
        assert!(!path.exists());
        assert_eq!(transport.state(), LinkState::Closed);
        assert!(transport.drain_control().is_empty());
    }

    #[test]
    fn live_socket_cannot_be_taken_over() {
        let dir = TempDir::new().expect("tempdir");
        let transport = open(&dir);
        let err = DuplexTransport::open(transport.path()).unwrap_err();
        assert!(matches!(err, DaemonError::SocketInUse { .. }), "got: {err}");
    }

    #[test]
    fn stale_socket_file_is_replaced() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("watcher.sock");
        drop(UnixListener::bind(&path).expect("bind stale"));
        assert!(path.exists());

        let transport = DuplexTransport::open(&path).expect("open over stale socket");
        assert!(transport.is_open());
    }
}
