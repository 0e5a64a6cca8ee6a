//! Watcher configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.memwatch/
//!   config.yaml          (optional; defaults apply when absent)
//!   Locations.txt        (default chain definitions)
//!   MemoryWatcher.sock   (default IPC endpoint)
//! ```
//!
//! As with every path-dependent helper in this crate, `fn_at(home, …)` takes
//! an explicit home and `fn(…)` derives it from `dirs::home_dir()`. Tests use
//! the `_at` forms.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{ByteOrder, TransportKind};

pub const CONFIG_FILE: &str = "config.yaml";
pub const LOCATIONS_FILE: &str = "Locations.txt";
pub const SOCKET_FILE: &str = "MemoryWatcher.sock";

/// Roughly one emulated frame at 60 Hz.
pub const DEFAULT_TICK_MS: u64 = 16;

/// Where the memory image lives and how to map it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub base: u32,
    #[serde(default)]
    pub byte_order: ByteOrder,
}

/// Everything needed to construct and drive a watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherConfig {
    pub locations: PathBuf,
    pub socket: PathBuf,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageConfig>,
}

/// On-disk shape: every field optional so a partial file fills from defaults.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    locations: Option<PathBuf>,
    socket: Option<PathBuf>,
    transport: Option<TransportKind>,
    tick_ms: Option<u64>,
    image: Option<ImageConfig>,
}

fn default_tick_ms() -> u64 {
    DEFAULT_TICK_MS
}

impl WatcherConfig {
    /// Defaults rooted at `<home>/.memwatch/`.
    pub fn defaults_at(home: &Path) -> Self {
        let root = memwatch_root(home);
        Self {
            locations: root.join(LOCATIONS_FILE),
            socket: root.join(SOCKET_FILE),
            transport: TransportKind::default(),
            tick_ms: DEFAULT_TICK_MS,
            image: None,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

/// `<home>/.memwatch/`
pub fn memwatch_root(home: &Path) -> PathBuf {
    home.join(".memwatch")
}

/// `<home>/.memwatch/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    memwatch_root(home).join(CONFIG_FILE)
}

/// Load `<home>/.memwatch/config.yaml`, falling back to defaults for a
/// missing file or missing fields.
///
/// Relative paths in the file resolve against `<home>/.memwatch/`.
pub fn load_at(home: &Path) -> Result<WatcherConfig, ConfigError> {
    let mut config = WatcherConfig::defaults_at(home);
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(config);
    }

    let contents = std::fs::read_to_string(&path)?;
    let file: Option<ConfigFile> =
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })?;
    let Some(file) = file else {
        return Ok(config);
    };

    let root = memwatch_root(home);
    if let Some(locations) = file.locations {
        config.locations = root.join(locations);
    }
    if let Some(socket) = file.socket {
        config.socket = root.join(socket);
    }
    if let Some(transport) = file.transport {
        config.transport = transport;
    }
    if let Some(tick_ms) = file.tick_ms {
        config.tick_ms = tick_ms;
    }
    config.image = file.image.map(|mut image| {
        image.path = root.join(image.path);
        image
    });
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<WatcherConfig, ConfigError> {
    load_at(&home()?)
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let home = TempDir::new().unwrap();
        let config = load_at(home.path()).unwrap();
        assert_eq!(config, WatcherConfig::defaults_at(home.path()));
        assert!(config.locations.ends_with(".memwatch/Locations.txt"));
        assert_eq!(config.transport, TransportKind::Datagram);
    }

    #[test]
    fn empty_file_yields_defaults() {
        let home = TempDir::new().unwrap();
        std::fs::create_dir_all(memwatch_root(home.path())).unwrap();
        std::fs::write(config_path_at(home.path()), "").unwrap();
        let config = load_at(home.path()).unwrap();
        assert_eq!(config.tick_ms, DEFAULT_TICK_MS);
    }

    #[test]
    fn zero_tick_is_clamped() {
        let home = TempDir::new().unwrap();
        let mut config = WatcherConfig::defaults_at(home.path());
        config.tick_ms = 0;
        assert_eq!(config.tick_interval(), Duration::from_millis(1));
    }
}
