use std::path::PathBuf;

use thiserror::Error;

/// Error surface for transports, the watcher, and the runtime.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("chain definitions: {0}")]
    Chains(#[from] memwatch_core::ChainError),

    #[error("config error: {0}")]
    Config(#[from] memwatch_core::ConfigError),

    #[error("memory image: {0}")]
    Memory(#[from] memwatch_core::MemoryError),

    #[error("wire payload: {0}")]
    Codec(#[from] memwatch_core::CodecError),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("socket already in use: {socket}")]
    SocketInUse { socket: PathBuf },

    #[error("no memory image configured; set `image.path` in config.yaml or pass --image")]
    NoImage,

    #[error("watcher is inactive")]
    Inactive,

    #[error("{0} transport is not supported on this platform")]
    Unsupported(memwatch_core::TransportKind),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
