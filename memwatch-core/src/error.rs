//! Error types for memwatch-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that keep a chain table from loading.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The definition file could not be read.
    #[error("failed to read chain definitions at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The source was readable but defined no chains.
    #[error("no chains defined in {source_name}")]
    Empty { source_name: String },
}

/// Errors from decoding a wire payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    /// A chain name line had no value line after it.
    #[error("record '{name}' is missing its value line")]
    MissingValue { name: String },

    #[error("record '{name}' has malformed value '{value}'")]
    BadValue { name: String, value: String },
}

/// Errors loading a memory image.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("failed to read memory image at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The image would extend past the end of the 32-bit address space.
    #[error("memory image of {len} bytes does not fit at base {base:#010x}")]
    OutOfRange { base: u32, len: usize },
}

/// Errors loading `config.yaml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error on load, with the offending path.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}
