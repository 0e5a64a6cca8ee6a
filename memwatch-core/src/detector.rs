//! Change detection: last-seen value per chain and the per-tick diff.

use crate::chains::ChainTable;
use crate::resolver::{resolve, MemoryReader};
use crate::types::{ChainName, DiffBatch, DiffEntry};

/// Owns the chain table and the baseline value of every chain in it.
///
/// Baselines start at 0, so a chain resolving to 0 on the first tick is not
/// reported.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    table: ChainTable,
    /// Parallel to `table.iter()`.
    baseline: Vec<u32>,
}

impl ChangeDetector {
    pub fn new(table: ChainTable) -> Self {
        let baseline = vec![0; table.len()];
        Self { table, baseline }
    }

    /// Re-resolve every chain and return the ones whose value changed.
    ///
    /// Afterwards the baseline holds every chain's value from this tick.
    pub fn tick<M: MemoryReader + ?Sized>(&mut self, memory: &M) -> DiffBatch {
        let mut batch = DiffBatch::new();
        for (chain, last) in self.table.iter().zip(self.baseline.iter_mut()) {
            let current = resolve(chain, memory);
            if current != *last {
                *last = current;
                batch.push(DiffEntry {
                    name: chain.name.clone(),
                    value: current,
                });
            }
        }
        batch
    }

    /// Last value recorded for `name`.
    pub fn baseline(&self, name: &ChainName) -> Option<u32> {
        self.table
            .iter()
            .position(|chain| &chain.name == name)
            .map(|slot| self.baseline[slot])
    }

    pub fn table(&self) -> &ChainTable {
        &self.table
    }
}
