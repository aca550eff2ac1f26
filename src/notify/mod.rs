//! # Change Notification
//!
//! Every session owns one [`Notifier`]. Whenever the session's snapshot
//! advances (its own commit, a refresh, or the catch-up at the start of a
//! write scope) every active subscription is re-evaluated against the new
//! snapshot and diffed against what it last saw, by element identity.
//!
//! Diffs are queued, not delivered. Delivery happens only when the owner
//! calls `Session::deliver_notifications`, so a callback never runs inside
//! a mutating call and never observes a half-applied write.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use tracing::debug;

use crate::execution::results::ResultRow;
use crate::execution::{ElementId, ResultsSpec};
use crate::storage::Snapshot;
use crate::tx::Generation;

pub type Callback = Box<dyn FnMut(&CollectionChange) + Send>;

// ============================================================================
// Change descriptions
// ============================================================================

/// Differences between two consecutive evaluations of one view.
///
/// Index sets follow the usual convention: `deletions` index the previous
/// evaluation, `insertions` and `modifications` index the new one. The
/// identity sets carry the same elements by stable id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Generation the new evaluation was taken at.
    pub generation: Generation,
    pub deletions: Vec<usize>,
    pub insertions: Vec<usize>,
    pub modifications: Vec<usize>,
    pub deleted: Vec<ElementId>,
    pub inserted: Vec<ElementId>,
    pub modified: Vec<ElementId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty() && self.insertions.is_empty() && self.modifications.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionChange {
    /// First delivery after registration: the view as it was then.
    Initial { count: usize, generation: Generation },
    Update(ChangeSet),
}

/// Identity diff. An element present on both sides counts as modified only
/// if its revision moved; position changes alone are not reported.
pub(crate) fn diff(
    old: &[(ElementId, Generation)],
    new: &[(ElementId, Generation)],
    generation: Generation,
) -> ChangeSet {
    let before: HashMap<ElementId, Generation> = old.iter().copied().collect();
    let after: HashSet<ElementId> = new.iter().map(|(id, _)| *id).collect();
    let mut changes = ChangeSet { generation, ..ChangeSet::default() };

    for (i, (id, _)) in old.iter().enumerate() {
        if !after.contains(id) {
            changes.deletions.push(i);
            changes.deleted.push(*id);
        }
    }
    for (i, (id, revision)) in new.iter().enumerate() {
        match before.get(id) {
            None => {
                changes.insertions.push(i);
                changes.inserted.push(*id);
            }
            Some(previous) if previous != revision => {
                changes.modifications.push(i);
                changes.modified.push(*id);
            }
            Some(_) => {}
        }
    }
    changes
}

fn fingerprint(rows: &[ResultRow]) -> Vec<(ElementId, Generation)> {
    rows.iter().map(|row| (row.id, row.revision)).collect()
}

// ============================================================================
// Registry
// ============================================================================

struct Subscription {
    id: u64,
    spec: Arc<ResultsSpec>,
    last: Vec<(ElementId, Generation)>,
    active: Arc<AtomicBool>,
    callback: Arc<Mutex<Callback>>,
}

struct Pending {
    active: Arc<AtomicBool>,
    callback: Arc<Mutex<Callback>>,
    change: CollectionChange,
}

#[derive(Default)]
struct Registry {
    subscriptions: Vec<Subscription>,
    queue: VecDeque<Pending>,
}

pub(crate) struct Notifier {
    registry: Arc<Mutex<Registry>>,
    delivering: AtomicBool,
    next_id: AtomicU64,
    initial: bool,
}

impl Notifier {
    pub(crate) fn new(initial: bool) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            delivering: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            initial,
        }
    }

    pub(crate) fn register(
        &self,
        spec: Arc<ResultsSpec>,
        rows: &[ResultRow],
        generation: Generation,
        callback: Callback,
    ) -> NotificationToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        let callback = Arc::new(Mutex::new(callback));
        let mut registry = self.registry.lock();
        if self.initial {
            registry.queue.push_back(Pending {
                active: active.clone(),
                callback: callback.clone(),
                change: CollectionChange::Initial { count: rows.len(), generation },
            });
        }
        registry.subscriptions.push(Subscription {
            id,
            spec,
            last: fingerprint(rows),
            active: active.clone(),
            callback,
        });
        debug!(subscription = id, count = rows.len(), "registered observer");
        NotificationToken { id, active, registry: Arc::downgrade(&self.registry) }
    }

    /// Re-evaluate every subscription against `snapshot` and queue the
    /// non-empty diffs. A view whose container disappeared reads as empty.
    pub(crate) fn recompute(&self, snapshot: &Snapshot) {
        let mut registry = self.registry.lock();
        let Registry { subscriptions, queue } = &mut *registry;
        let mut queued = 0;
        for sub in subscriptions.iter_mut() {
            let current = sub.spec.materialize(snapshot).map(|rows| fingerprint(&rows)).unwrap_or_default();
            let changes = diff(&sub.last, &current, snapshot.generation());
            sub.last = current;
            if !changes.is_empty() {
                queue.push_back(Pending {
                    active: sub.active.clone(),
                    callback: sub.callback.clone(),
                    change: CollectionChange::Update(changes),
                });
                queued += 1;
            }
        }
        debug!(generation = %snapshot.generation(), subscriptions = subscriptions.len(), queued, "notification pass");
    }

    /// Drain the queue, invoking callbacks with the registry unlocked. Notifications
    /// queued by a callback (a nested write) are delivered in the same pass;
    /// a nested call to `deliver` returns 0.
    pub(crate) fn deliver(&self) -> usize {
        if self.delivering.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let _guard = DeliveryGuard(&self.delivering);
        let mut delivered = 0;
        loop {
            let next = self.registry.lock().queue.pop_front();
            let Some(pending) = next else { break };
            if !pending.active.load(Ordering::Acquire) {
                continue;
            }
            let mut callback = pending.callback.lock();
            (callback.as_mut())(&pending.change);
            delivered += 1;
        }
        delivered
    }

    #[cfg(test)]
    pub(crate) fn subscription_count(&self) -> usize {
        self.registry.lock().subscriptions.len()
    }

    /// Drop every subscription and anything still queued.
    pub(crate) fn clear(&self) {
        let mut registry = self.registry.lock();
        for sub in registry.subscriptions.drain(..) {
            sub.active.store(false, Ordering::Release);
        }
        registry.queue.clear();
    }
}

struct DeliveryGuard<'a>(&'a AtomicBool);

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ============================================================================
// NotificationToken
// ============================================================================

/// Keeps a subscription alive. Invalidating (or dropping) the token stops
/// delivery immediately, including for changes already queued.
#[must_use = "dropping the token unregisters the observer"]
pub struct NotificationToken {
    id: u64,
    active: Arc<AtomicBool>,
    registry: Weak<Mutex<Registry>>,
}

impl NotificationToken {
    /// Idempotent.
    pub fn invalidate(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().subscriptions.retain(|sub| sub.id != self.id);
        }
        debug!(subscription = self.id, "observer invalidated");
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for NotificationToken {
    fn drop(&mut self) {
        self.invalidate();
    }
}

impl std::fmt::Debug for NotificationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationToken").field("id", &self.id).field("active", &self.is_active()).finish()
    }
}
