//! The memory watcher: chain table, baseline, and transport behind one
//! per-tick entry point.

use memwatch_core::{ChainTable, ChangeDetector, MemoryReader, WatcherConfig};

use crate::error::DaemonError;
use crate::transport::{open_transport, Transport};

/// What one [`MemoryWatcher::step`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepSummary {
    pub changed: usize,
    pub acknowledged: usize,
}

struct Active {
    detector: ChangeDetector,
    transport: Box<dyn Transport>,
}

/// Streams changed chain values to an observer.
///
/// A watcher whose definitions or transport failed to load is inactive: every
/// [`step`](Self::step) and [`shutdown`](Self::shutdown) is a no-op.
pub struct MemoryWatcher {
    active: Option<Active>,
}

impl MemoryWatcher {
    /// Load definitions, then open the transport. Failures are logged and
    /// leave the watcher inactive.
    pub fn new(config: &WatcherConfig) -> Self {
        match Self::try_new(config) {
            Ok(watcher) => watcher,
            Err(err) => {
                tracing::warn!(error = %err, "memory watcher disabled");
                Self::inactive()
            }
        }
    }

    /// Like [`new`](Self::new) but returns the reason the watcher could not
    /// start.
    pub fn try_new(config: &WatcherConfig) -> Result<Self, DaemonError> {
        let table = ChainTable::load_at(&config.locations)?;
        let transport = open_transport(config.transport, &config.socket)?;
        tracing::info!(
            chains = table.len(),
            transport = %config.transport,
            socket = %config.socket.display(),
            "memory watcher active",
        );
        Ok(Self::with_transport(table, transport))
    }

    /// Assemble a watcher from already-loaded parts.
    pub fn with_transport(table: ChainTable, transport: Box<dyn Transport>) -> Self {
        Self {
            active: Some(Active {
                detector: ChangeDetector::new(table),
                transport,
            }),
        }
    }

    pub fn inactive() -> Self {
        Self { active: None }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Run one tick: acknowledge control input, diff every chain against
    /// `memory`, and deliver the changes.
    pub fn step<M: MemoryReader + ?Sized>(&mut self, memory: &M) -> StepSummary {
        let Some(active) = self.active.as_mut() else {
            return StepSummary::default();
        };

        let control = active.transport.drain_control();
        for message in &control {
            tracing::debug!(message = %message.0, "control message acknowledged");
        }

        let batch = active.detector.tick(memory);
        active.transport.deliver(&batch);

        StepSummary {
            changed: batch.len(),
            acknowledged: control.len(),
        }
    }

    /// Release the transport. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.transport.close();
            tracing::info!("memory watcher stopped");
        }
    }
}

impl Drop for MemoryWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
