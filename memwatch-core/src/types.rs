//! Domain types shared by the watcher pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Display name of a watched chain.
///
/// This is the literal definition line, whitespace included, so two lines
/// that differ only in spacing are two distinct chains.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainName(pub String);

impl fmt::Display for ChainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ChainName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ChainName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which IPC strategy delivers diff batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Connectionless Unix datagrams, fire and forget.
    #[default]
    Datagram,
    /// Connection-oriented Unix stream with acknowledge and reconnect.
    Duplex,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Datagram => write!(f, "datagram"),
            TransportKind::Duplex => write!(f, "duplex"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "datagram" | "dgram" => Ok(Self::Datagram),
            "duplex" | "stream" => Ok(Self::Duplex),
            other => Err(format!(
                "unknown transport '{other}'; expected: datagram, duplex"
            )),
        }
    }
}

/// Byte order of words stored in a memory image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

impl FromStr for ByteOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "big" | "be" => Ok(Self::Big),
            "little" | "le" => Ok(Self::Little),
            other => Err(format!("unknown byte order '{other}'; expected: big, little")),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// One pointer chain: where it came from and how to follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSpec {
    pub name: ChainName,
    /// Offsets added at each hop, starting from address 0.
    pub offsets: Vec<u32>,
}

/// A chain whose resolved value changed during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub name: ChainName,
    pub value: u32,
}

impl DiffEntry {
    pub fn new(name: impl Into<ChainName>, value: u32) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Changed chains from one tick, in chain-table order.
pub type DiffBatch = Vec<DiffEntry>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_name_keeps_whitespace() {
        assert_ne!(ChainName::from("1000 4"), ChainName::from("1000  4"));
        assert_eq!(ChainName::from(" 10 ").to_string(), " 10 ");
    }

    #[test]
    fn transport_kind_parses_aliases() {
        assert_eq!("DGRAM".parse::<TransportKind>(), Ok(TransportKind::Datagram));
        assert_eq!("duplex".parse::<TransportKind>(), Ok(TransportKind::Duplex));
        assert!("pipe".parse::<TransportKind>().is_err());
    }

    #[test]
    fn transport_kind_yaml_is_lowercase() {
        let yaml = serde_yaml::to_string(&TransportKind::Duplex).expect("serialize");
        assert_eq!(yaml.trim(), "duplex");
    }
}
