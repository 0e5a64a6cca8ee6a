//! File-backed memory image.
//!
//! A flat dump of guest RAM mapped at a base address. Reads outside the dump
//! come back as invalid zero words.

use std::path::Path;

use crate::error::MemoryError;
use crate::resolver::{MemoryRead, MemoryReader};
use crate::types::ByteOrder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryImage {
    base: u32,
    bytes: Vec<u8>,
    byte_order: ByteOrder,
}

impl MemoryImage {
    pub fn new(base: u32, bytes: Vec<u8>, byte_order: ByteOrder) -> Result<Self, MemoryError> {
        let fits = u64::from(base) + bytes.len() as u64 <= u64::from(u32::MAX) + 1;
        if !fits {
            return Err(MemoryError::OutOfRange {
                base,
                len: bytes.len(),
            });
        }
        Ok(Self {
            base,
            bytes,
            byte_order,
        })
    }

    /// Read a dump from disk.
    pub fn load_at(path: &Path, base: u32, byte_order: ByteOrder) -> Result<Self, MemoryError> {
        let bytes = std::fs::read(path).map_err(|source| MemoryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(base, bytes, byte_order)
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether a full word at `address` lies inside the image.
    pub fn contains(&self, address: u32) -> bool {
        self.word_offset(address).is_some()
    }

    fn word_offset(&self, address: u32) -> Option<usize> {
        let offset = address.checked_sub(self.base)? as usize;
        let end = offset.checked_add(4)?;
        (end <= self.bytes.len()).then_some(offset)
    }
}

impl MemoryReader for MemoryImage {
    fn read_u32(&self, address: u32) -> MemoryRead {
        let Some(offset) = self.word_offset(address) else {
            return MemoryRead::invalid(0);
        };
        let word = [
            self.bytes[offset],
            self.bytes[offset + 1],
            self.bytes[offset + 2],
            self.bytes[offset + 3],
        ];
        let value = match self.byte_order {
            ByteOrder::Big => u32::from_be_bytes(word),
            ByteOrder::Little => u32::from_le_bytes(word),
        };
        MemoryRead::valid(value)
    }
}
