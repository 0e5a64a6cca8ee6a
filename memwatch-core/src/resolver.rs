//! Pointer resolution against a host memory capability.

use crate::types::ChainSpec;

/// Result of reading one word from host memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRead {
    pub value: u32,
    /// `false` when the address was not a live, mapped address.
    pub valid: bool,
}

impl MemoryRead {
    pub fn valid(value: u32) -> Self {
        Self { value, valid: true }
    }

    pub fn invalid(value: u32) -> Self {
        Self {
            value,
            valid: false,
        }
    }
}

/// Read access to the watched process's memory.
///
/// Implementations must report unmapped or out-of-range addresses through
/// [`MemoryRead::valid`] instead of failing, and must not mutate memory.
pub trait MemoryReader {
    fn read_u32(&self, address: u32) -> MemoryRead;
}

impl<M: MemoryReader + ?Sized> MemoryReader for &M {
    fn read_u32(&self, address: u32) -> MemoryRead {
        (**self).read_u32(address)
    }
}

/// Follow `chain` from address 0 and return the final word read.
///
/// Each hop reads at `previous value + offset`. An invalid read ends the chase
/// early and its value is returned as-is. A chain without offsets resolves to 0
/// without touching memory.
pub fn resolve<M: MemoryReader + ?Sized>(chain: &ChainSpec, memory: &M) -> u32 {
    let mut value = 0u32;
    for &offset in &chain.offsets {
        let read = memory.read_u32(value.wrapping_add(offset));
        value = read.value;
        if !read.valid {
            break;
        }
    }
    value
}
