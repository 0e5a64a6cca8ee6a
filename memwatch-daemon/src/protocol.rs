//! Observer side of both transports.
//!
//! [`DatagramObserver`] binds the path the watcher sends to and decodes one
//! batch per datagram. [`DuplexObserver`] connects to the watcher's listening
//! socket, sends control lines, and reads the line-oriented reply stream:
//!
//! ```text
//! CHANGED\n<name>\n<value>\n<name>\n<value>\n…
//! ACK\n<echoed control line>\n
//! ```
//!
//! The stream has no frame terminator, so inside a `CHANGED` frame a line that
//! reads `ACK` or `CHANGED` is taken as a chain name when the next line is an
//! 8-digit hex value, and as a marker otherwise. An acknowledged control line
//! that is itself 8 hex digits, arriving right after a frame, is therefore
//! indistinguishable from a record of a chain named `ACK`.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::net::{UnixDatagram, UnixStream};

use memwatch_core::{codec, ChainName, CodecError, DiffBatch, DiffEntry};

use crate::error::{io_err, DaemonError};

/// Receives batches sent by a datagram watcher.
#[cfg(unix)]
#[derive(Debug)]
pub struct DatagramObserver {
    socket: UnixDatagram,
    path: PathBuf,
}

#[cfg(unix)]
impl DatagramObserver {
    pub fn bind(path: &Path) -> Result<Self, DaemonError> {
        crate::transport::prepare_socket_for_bind(path)?;
        let socket = UnixDatagram::bind(path).map_err(|e| io_err(path, e))?;
        Ok(Self {
            socket,
            path: path.to_path_buf(),
        })
    }

    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), DaemonError> {
        self.socket
            .set_read_timeout(timeout)
            .map_err(|e| io_err(&self.path, e))
    }

    /// Block until the next datagram and decode it.
    ///
    /// Returns `Ok(None)` when the read timeout elapses. A datagram longer than
    /// [`codec::MAX_DATAGRAM`] is rejected rather than decoded truncated.
    pub fn recv(&self) -> Result<Option<DiffBatch>, DaemonError> {
        let mut buf = vec![0u8; codec::MAX_DATAGRAM + 1];
        match self.socket.recv(&mut buf) {
            Ok(n) if n > codec::MAX_DATAGRAM => Err(DaemonError::Protocol(format!(
                "datagram exceeds {} bytes and was truncated",
                codec::MAX_DATAGRAM
            ))),
            Ok(n) => Ok(Some(codec::decode(&buf[..n])?)),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(err) => Err(io_err(&self.path, err)),
        }
    }
}

#[cfg(unix)]
impl Drop for DatagramObserver {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// One item read from a duplex watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A `CHANGED` frame began.
    Changed,
    /// One record of the current `CHANGED` frame.
    Record(DiffEntry),
    /// The watcher acknowledged a control line.
    Ack(String),
}

/// Connected client of a duplex watcher.
#[cfg(unix)]
#[derive(Debug)]
pub struct DuplexObserver {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    path: PathBuf,
    /// A `CHANGED` marker was read and no `ACK` has been seen since.
    in_frame: bool,
    /// Line read ahead while telling a marker from a chain name.
    pending: Option<String>,
}

#[cfg(unix)]
impl DuplexObserver {
    pub fn connect(path: &Path) -> Result<Self, DaemonError> {
        let stream = UnixStream::connect(path).map_err(|e| io_err(path, e))?;
        let writer = stream.try_clone().map_err(|e| io_err(path, e))?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            path: path.to_path_buf(),
            in_frame: false,
            pending: None,
        })
    }

    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), DaemonError> {
        self.writer
            .set_read_timeout(timeout)
            .map_err(|e| io_err(&self.path, e))
    }

    /// Send one control line; the watcher acknowledges it on its next tick.
    pub fn send_control(&mut self, message: &str) -> Result<(), DaemonError> {
        if message.contains('\n') {
            return Err(DaemonError::Protocol(
                "control messages must be a single line".to_string(),
            ));
        }
        self.writer
            .write_all(format!("{message}\n").as_bytes())
            .map_err(|e| io_err(&self.path, e))?;
        self.writer.flush().map_err(|e| io_err(&self.path, e))
    }

    /// Read the next event. Returns `Ok(None)` once the watcher hangs up.
    pub fn next_event(&mut self) -> Result<Option<StreamEvent>, DaemonError> {
        let Some(line) = self.read_line()? else {
            return Ok(None);
        };
        let event = match line.as_str() {
            "CHANGED" | "ACK" if self.in_frame => {
                let next = self.expect_line(&line)?;
                if is_value_line(&next) {
                    record(line, &next)?
                } else if line == "ACK" {
                    self.in_frame = false;
                    StreamEvent::Ack(next)
                } else {
                    self.pending = Some(next);
                    StreamEvent::Changed
                }
            }
            "CHANGED" => {
                self.in_frame = true;
                StreamEvent::Changed
            }
            "ACK" => StreamEvent::Ack(self.expect_line("ACK")?),
            _ => {
                let value = self.expect_line(&line)?;
                record(line, &value)?
            }
        };
        Ok(Some(event))
    }

    fn expect_line(&mut self, after: &str) -> Result<String, DaemonError> {
        self.read_line()?.ok_or_else(|| {
            DaemonError::Protocol(format!("watcher closed the stream after '{after}'"))
        })
    }

    fn read_line(&mut self) -> Result<Option<String>, DaemonError> {
        if let Some(line) = self.pending.take() {
            return Ok(Some(line));
        }
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .map_err(|e| io_err(&self.path, e))?;
        if read == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
        }
        Ok(Some(line))
    }
}

fn is_value_line(line: &str) -> bool {
    line.len() == 8 && line.bytes().all(|b| b.is_ascii_hexdigit())
}

fn record(name: String, value: &str) -> Result<StreamEvent, DaemonError> {
    let parsed = u32::from_str_radix(value, 16).map_err(|_| CodecError::BadValue {
        name: name.clone(),
        value: value.to_string(),
    })?;
    Ok(StreamEvent::Record(DiffEntry {
        name: ChainName::from(name),
        value: parsed,
    }))
}
