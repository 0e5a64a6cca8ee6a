//! memwatch core library: chain definitions, pointer resolution, change
//! detection, wire codec, and configuration.
//!
//! Public API surface:
//! - [`chains`]: [`ChainTable`] loader / parser
//! - [`resolver`]: [`MemoryReader`] capability and pointer chasing
//! - [`detector`]: [`ChangeDetector`] baseline + per-tick diff
//! - [`codec`]: text wire format
//! - [`memory`]: file-backed [`MemoryImage`]
//! - [`config`]: `~/.memwatch/config.yaml`

pub mod chains;
pub mod codec;
pub mod config;
pub mod detector;
pub mod error;
pub mod memory;
pub mod resolver;
pub mod types;

pub use chains::ChainTable;
pub use config::WatcherConfig;
pub use detector::ChangeDetector;
pub use error::{ChainError, CodecError, ConfigError, MemoryError};
pub use memory::MemoryImage;
pub use resolver::{resolve, MemoryRead, MemoryReader};
pub use types::{ByteOrder, ChainName, ChainSpec, DiffBatch, DiffEntry, TransportKind};
