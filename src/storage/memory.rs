//! In-memory storage engine.
//!
//! This is the reference implementation of `StorageEngine`. Committed
//! snapshots are immutable and shared by `Arc`; a write batch clones the
//! latest snapshot and is published wholesale on commit.
//!
//! ## Limitations
//!
//! - **No durability**: nothing survives the process.
//! - **Whole-snapshot copy per write**: `begin_write()` clones every entity.
//!   Fine for tests and small embedded data sets, not for large ones.
//! - **Single writer**: one `WriteBatch` at a time, arbitrated by a
//!   mutex + condvar pair; waiters block with no timeout.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::debug;

use super::{Snapshot, StorageEngine, WriteBatch};
use crate::{Error, Result};

// ============================================================================
// MemoryEngine
// ============================================================================

/// In-memory multi-version object storage.
pub struct MemoryEngine {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    current: RwLock<Arc<Snapshot>>,
    /// `true` while a write batch is outstanding.
    writer: Mutex<bool>,
    released: Condvar,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                current: RwLock::new(Arc::new(Snapshot::default())),
                writer: Mutex::new(false),
                released: Condvar::new(),
            }),
        }
    }

    fn release_writer(&self) {
        let mut busy = self.inner.writer.lock();
        *busy = false;
        self.inner.released.notify_one();
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// StorageEngine impl
// ============================================================================

impl StorageEngine for MemoryEngine {
    fn latest(&self) -> Arc<Snapshot> {
        self.inner.current.read().clone()
    }

    fn begin_write(&self) -> Result<WriteBatch> {
        let mut busy = self.inner.writer.lock();
        if *busy {
            debug!("waiting for write lock");
        }
        while *busy {
            self.inner.released.wait(&mut busy);
        }
        *busy = true;
        drop(busy);

        Ok(WriteBatch::new(self.latest()))
    }

    fn commit(&self, batch: WriteBatch) -> Result<Arc<Snapshot>> {
        let published = {
            let mut current = self.inner.current.write();
            let base = batch.base_generation();
            if base != current.generation() {
                Err(Error::TransactionConflict(format!(
                    "write based on generation {base} but latest is {}",
                    current.generation()
                )))
            } else {
                let snapshot = Arc::new(batch.into_snapshot());
                *current = snapshot.clone();
                Ok(snapshot)
            }
        };
        self.release_writer();
        if let Ok(snapshot) = &published {
            debug!(generation = %snapshot.generation(), entities = snapshot.len(), "committed");
        }
        published
    }

    fn abandon(&self, _batch: WriteBatch) {
        self.release_writer();
    }
}

// ============================================================================
// Tests
// ============================================================================
