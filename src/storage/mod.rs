//! # Storage Engine Trait
//!
//! This is the contract between the query/collection core and whatever keeps
//! the bytes. The core only ever sees immutable [`Snapshot`]s, one per
//! committed generation, and a single exclusive [`WriteBatch`] at a time.
//!
//! ## Implementations
//!
//! | Engine | Module | Description |
//! |--------|--------|-------------|
//! | `MemoryEngine` | `memory` | Copy-on-write snapshots in memory, for testing/embedding |

pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::model::*;
use crate::tx::Generation;
use crate::{Error, Result};

pub use memory::MemoryEngine;

// ============================================================================
// Backend Configuration
// ============================================================================

/// Which storage engine a database runs on.
#[derive(Debug, Clone, Default)]
pub enum BackendConfig {
    /// In-memory (no persistence)
    #[default]
    Memory,
}

impl BackendConfig {
    pub fn build(&self) -> Arc<dyn StorageEngine> {
        match self {
            BackendConfig::Memory => Arc::new(MemoryEngine::new()),
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Immutable view of every entity at one committed generation.
///
/// Shared by `Arc` between sessions reading that generation and any frozen
/// collections pinned to it. Never written after publication.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    generation: Generation,
    entities: BTreeMap<ObjectKey, Entity>,
    next_key: u64,
    next_slot: u64,
}

impl Snapshot {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn entity(&self, key: ObjectKey) -> Option<&Entity> {
        self.entities.get(&key)
    }

    pub fn contains(&self, key: ObjectKey) -> bool {
        self.entities.contains_key(&key)
    }

    /// Entities of one class in native (ascending key) order.
    pub fn entities_of<'a>(&'a self, class: &'a str) -> impl Iterator<Item = &'a Entity> + 'a {
        self.entities.values().filter(move |e| e.class == class)
    }

    /// Elements of a container, or `None` if the owner or property is gone.
    pub fn elements(&self, container: &ContainerKey) -> Option<&[StoredElement]> {
        self.entity(container.owner)?.elements(&container.property)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

// ============================================================================
// WriteBatch
// ============================================================================

/// Private working copy of the latest snapshot, owned by the one session that
/// holds the write lock. Nothing in it is visible to anyone else until commit.
#[derive(Debug)]
pub struct WriteBatch {
    base: Arc<Snapshot>,
    working: Snapshot,
}

impl WriteBatch {
    pub(crate) fn new(base: Arc<Snapshot>) -> Self {
        let working = (*base).clone();
        Self { base, working }
    }

    /// Generation this batch was started from.
    pub fn base_generation(&self) -> Generation {
        self.base.generation
    }

    pub fn base(&self) -> &Arc<Snapshot> {
        &self.base
    }

    /// Generation every write in this batch is stamped with.
    pub fn pending_generation(&self) -> Generation {
        self.base.generation.next()
    }

    /// The batch's own view: base plus uncommitted writes.
    pub fn view(&self) -> &Snapshot {
        &self.working
    }

    pub fn insert_entity(&mut self, class: &str) -> ObjectKey {
        self.working.next_key += 1;
        let key = ObjectKey(self.working.next_key);
        let entity = Entity::new(key, class, self.pending_generation());
        self.working.entities.insert(key, entity);
        key
    }

    pub fn entity_mut(&mut self, key: ObjectKey) -> Result<&mut Entity> {
        let revision = self.pending_generation();
        let entity = self
            .working
            .entities
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(format!("object {key}")))?;
        entity.revision = revision;
        Ok(entity)
    }

    pub fn allocate_slot(&mut self) -> SlotId {
        self.working.next_slot += 1;
        SlotId(self.working.next_slot)
    }

    /// Remove an entity and every container element that links to it.
    /// Returns the removed links as `(container, slot)` pairs, or `None` if
    /// the entity did not exist.
    pub fn remove_entity(&mut self, key: ObjectKey) -> Option<Vec<(ContainerKey, SlotId)>> {
        self.working.entities.remove(&key)?;
        let revision = self.pending_generation();
        let mut unlinked = Vec::new();
        for entity in self.working.entities.values_mut() {
            let owner = entity.key;
            let mut touched = false;
            for (name, field) in entity.fields.iter_mut() {
                match field {
                    Field::Value(v) if v.as_object() == Some(key) => {
                        *v = Value::Null;
                        touched = true;
                    }
                    Field::List(elements) | Field::Set(elements) => {
                        let before = elements.len();
                        elements.retain(|e| {
                            let links = e.value.as_object() == Some(key);
                            if links {
                                unlinked.push((ContainerKey::new(owner, name.clone()), e.slot));
                            }
                            !links
                        });
                        touched |= elements.len() != before;
                    }
                    Field::Value(_) => {}
                }
            }
            if touched {
                entity.revision = revision;
            }
        }
        Some(unlinked)
    }

    pub(crate) fn into_snapshot(self) -> Snapshot {
        let mut snapshot = self.working;
        snapshot.generation = self.base.generation.next();
        snapshot
    }
}

// ============================================================================
// StorageEngine Trait
// ============================================================================

/// The storage contract.
///
/// Engines publish immutable snapshots and arbitrate writers. At most one
/// `WriteBatch` is outstanding at a time; `begin_write` blocks (without a
/// timeout) until the previous one is committed or abandoned.
pub trait StorageEngine: Send + Sync + 'static {
    /// The most recently committed snapshot.
    fn latest(&self) -> Arc<Snapshot>;

    /// Acquire the write lock and start a batch from the latest snapshot.
    fn begin_write(&self) -> Result<WriteBatch>;

    /// Publish a batch as the next generation and release the write lock.
    ///
    /// Fails with `TransactionConflict` if the batch was not based on the
    /// latest generation; the lock is released either way.
    fn commit(&self, batch: WriteBatch) -> Result<Arc<Snapshot>>;

    /// Discard a batch and release the write lock.
    fn abandon(&self, batch: WriteBatch);
}
