//! Chain table: watch definitions parsed into named pointer chains.
//!
//! # Definition format
//!
//! ```text
//! 80453080 4
//! 804530a0
//! ```
//!
//! One chain per line. The whole line is the chain's name; its
//! whitespace-separated tokens are base-16 offsets. Offsets are read the way a
//! stream extractor reads them: the first token that is not a hex number ends
//! the chain, and a token with trailing garbage contributes its numeric prefix
//! before ending it. A line with no offsets still defines a chain.

use std::collections::HashMap;
use std::path::Path;

use crate::error::ChainError;
use crate::types::{ChainName, ChainSpec};

/// Parsed watch definitions, in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainTable {
    chains: Vec<ChainSpec>,
    index: HashMap<ChainName, usize>,
}

impl ChainTable {
    /// Parse every line of `text`. Never fails; the result may be empty.
    pub fn parse(text: &str) -> Self {
        let mut table = Self::default();
        for line in text.split_terminator('\n') {
            table.insert_line(line);
        }
        table
    }

    /// Load definitions from `path`.
    ///
    /// Fails with [`ChainError::Io`] if the file is unreadable and with
    /// [`ChainError::Empty`] if it defines no chains.
    pub fn load_at(path: &Path) -> Result<Self, ChainError> {
        let bytes = std::fs::read(path).map_err(|source| ChainError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::parse(&String::from_utf8_lossy(&bytes));
        if table.is_empty() {
            return Err(ChainError::Empty {
                source_name: path.display().to_string(),
            });
        }
        Ok(table)
    }

    /// Add or replace the chain defined by `line`.
    ///
    /// A repeated line overwrites the earlier definition but keeps its position.
    pub fn insert_line(&mut self, line: &str) {
        let spec = ChainSpec {
            name: ChainName::from(line),
            offsets: parse_offsets(line),
        };
        match self.index.get(&spec.name) {
            Some(&slot) => self.chains[slot] = spec,
            None => {
                self.index.insert(spec.name.clone(), self.chains.len());
                self.chains.push(spec);
            }
        }
    }

    pub fn get(&self, name: &ChainName) -> Option<&ChainSpec> {
        self.index.get(name).map(|&slot| &self.chains[slot])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainSpec> {
        self.chains.iter()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

impl<'a> IntoIterator for &'a ChainTable {
    type Item = &'a ChainSpec;
    type IntoIter = std::slice::Iter<'a, ChainSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.chains.iter()
    }
}

/// Read hex offsets from `line` until the first unparsable token.
pub fn parse_offsets(line: &str) -> Vec<u32> {
    let mut offsets = Vec::new();
    for token in line.split_ascii_whitespace() {
        let (value, complete) = parse_hex_prefix(token);
        match value {
            Some(value) => offsets.push(value),
            None => break,
        }
        if !complete {
            break;
        }
    }
    offsets
}

/// Returns the leading hex number of `token` (if any) and whether it spanned
/// the whole token.
fn parse_hex_prefix(token: &str) -> (Option<u32>, bool) {
    let body = match token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_hexdigit()) => rest,
        _ => token,
    };

    let digits_len = body
        .find(|c: char| !c.is_ascii_hexdigit())
        .unwrap_or(body.len());
    if digits_len == 0 {
        return (None, false);
    }

    match u32::from_str_radix(&body[..digits_len], 16) {
        Ok(value) => (Some(value), digits_len == body.len()),
        Err(_) => (None, false),
    }
}
