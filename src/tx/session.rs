//! Thread-confined sessions.
//!
//! A [`Session`] reads one snapshot at a time and holds at most one write
//! batch. Its state lives in a [`SessionShared`] that every live collection
//! and results view handed out by the session points back to; those handles
//! go through the same thread and closed checks on every access.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use super::Generation;
use crate::collection::ManagedCollection;
use crate::execution::{Binding, Results, ResultsSpec, Source};
use crate::model::*;
use crate::notify::Notifier;
use crate::query::PropertyRef;
use crate::storage::{Snapshot, StorageEngine, WriteBatch};
use crate::{Error, Result};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Shared state
// ============================================================================

pub(crate) struct SessionShared {
    id: u64,
    owner: ThreadId,
    engine: Arc<dyn StorageEngine>,
    schema: Arc<Schema>,
    state: Mutex<SessionState>,
    notifier: Notifier,
}

struct SessionState {
    snapshot: Arc<Snapshot>,
    write: Option<WriteBatch>,
    /// Bumped on every change to the session's view; keys results caches.
    version: u64,
    closed: bool,
}

impl SessionState {
    fn view(&self) -> &Snapshot {
        match &self.write {
            Some(batch) => batch.view(),
            None => &self.snapshot,
        }
    }
}

impl SessionShared {
    fn lock(&self) -> Result<MutexGuard<'_, SessionState>> {
        if thread::current().id() != self.owner {
            return Err(Error::WrongThread);
        }
        let state = self.state.lock();
        if state.closed {
            return Err(Error::StaleReference(format!("session {} is closed", self.id)));
        }
        Ok(state)
    }

    pub(crate) fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Run `f` against the session's view: the write batch inside a write
    /// scope, the current snapshot otherwise.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&Snapshot, u64) -> Result<R>) -> Result<R> {
        let state = self.lock()?;
        f(state.view(), state.version)
    }

    /// Same as `read` but without the thread check; `None` once closed.
    pub(crate) fn peek<R>(&self, f: impl FnOnce(&Snapshot) -> R) -> Option<R> {
        let state = self.state.lock();
        (!state.closed).then(|| f(state.view()))
    }

    /// Mutate the active write batch. `f` must validate before it writes:
    /// an error leaves the batch as it was.
    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut WriteBatch) -> Result<R>) -> Result<R> {
        let mut state = self.lock()?;
        let state = &mut *state;
        let batch = state.write.as_mut().ok_or(Error::WriteOutsideTransaction)?;
        state.version += 1;
        f(batch)
    }

    /// The last committed snapshot. Uncommitted state cannot be frozen or
    /// handed over, so this fails inside a write scope.
    pub(crate) fn committed(&self) -> Result<Arc<Snapshot>> {
        let state = self.lock()?;
        if state.write.is_some() {
            return Err(Error::InvalidOperation("cannot freeze or hand over inside a write transaction".into()));
        }
        Ok(state.snapshot.clone())
    }

    /// Last committed snapshot, the write's base inside a write scope.
    pub(crate) fn baseline(&self) -> Result<Arc<Snapshot>> {
        Ok(self.lock()?.snapshot.clone())
    }

    pub(crate) fn generation(&self) -> Result<Generation> {
        Ok(self.lock()?.snapshot.generation())
    }

    pub(crate) fn check(&self) -> Result<()> {
        self.lock().map(drop)
    }

    fn in_write(&self) -> bool {
        let state = self.state.lock();
        !state.closed && state.write.is_some()
    }

    fn begin_write(&self) -> Result<()> {
        if self.lock()?.write.is_some() {
            return Err(Error::InvalidOperation("write transaction already in progress".into()));
        }
        // may block until the current writer finishes
        let batch = self.engine.begin_write()?;
        let advanced = {
            let mut state = self.state.lock();
            let advanced = batch.base_generation() != state.snapshot.generation();
            state.snapshot = batch.base().clone();
            state.write = Some(batch);
            state.version += 1;
            advanced.then(|| state.snapshot.clone())
        };
        if let Some(snapshot) = advanced {
            self.notifier.recompute(&snapshot);
        }
        Ok(())
    }

    fn commit_write(&self) -> Result<Generation> {
        let batch = {
            let mut state = self.lock()?;
            state.version += 1;
            state.write.take().ok_or(Error::WriteOutsideTransaction)?
        };
        let from = batch.base_generation();
        let snapshot = self.engine.commit(batch)?;
        {
            let mut state = self.state.lock();
            state.snapshot = snapshot.clone();
            state.version += 1;
        }
        debug!(session = self.id, from = %from, to = %snapshot.generation(), "write committed");
        self.notifier.recompute(&snapshot);
        Ok(snapshot.generation())
    }

    fn cancel_write(&self) -> Result<()> {
        let batch = {
            let mut state = self.lock()?;
            state.version += 1;
            state.write.take()
        };
        if let Some(batch) = batch {
            debug!(session = self.id, base = %batch.base_generation(), "write cancelled");
            self.engine.abandon(batch);
        }
        Ok(())
    }

    fn refresh(&self) -> Result<bool> {
        let snapshot = {
            let mut state = self.lock()?;
            if state.write.is_some() {
                return Ok(false);
            }
            let latest = self.engine.latest();
            if latest.generation() == state.snapshot.generation() {
                return Ok(false);
            }
            debug!(session = self.id, from = %state.snapshot.generation(), to = %latest.generation(), "refreshed");
            state.snapshot = latest.clone();
            state.version += 1;
            latest
        };
        self.notifier.recompute(&snapshot);
        Ok(true)
    }

    fn close(&self) {
        let batch = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.write.take()
        };
        if let Some(batch) = batch {
            self.engine.abandon(batch);
        }
        self.notifier.clear();
        debug!(session = self.id, "closed");
    }
}

/// Reject links to missing objects or to objects of the wrong class.
pub(crate) fn check_link(view: &Snapshot, kind: &PropertyKind, value: &Value) -> Result<()> {
    let (Some(key), Some(target)) = (value.as_object(), kind.target.as_deref()) else {
        return Ok(());
    };
    let entity = view.entity(key).ok_or_else(|| Error::NotFound(format!("object {key}")))?;
    if entity.class != target {
        return Err(Error::TypeMismatch { expected: target.into(), got: entity.class.clone() });
    }
    Ok(())
}

// ============================================================================
// Session
// ============================================================================

/// A thread-confined unit of work against one database.
///
/// Every method fails with `WrongThread` when called from a thread other
/// than the one that opened the session, and with `StaleReference` once the
/// session is closed. Dropping the session closes it.
pub struct Session {
    pub(crate) shared: Arc<SessionShared>,
}

impl Session {
    pub(crate) fn open(engine: Arc<dyn StorageEngine>, schema: Arc<Schema>, initial_notifications: bool) -> Self {
        let snapshot = engine.latest();
        let id = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        debug!(session = id, generation = %snapshot.generation(), "session opened");
        Self {
            shared: Arc::new(SessionShared {
                id,
                owner: thread::current().id(),
                engine,
                schema,
                state: Mutex::new(SessionState { snapshot, write: None, version: 1, closed: false }),
                notifier: Notifier::new(initial_notifications),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn schema(&self) -> &Schema {
        &self.shared.schema
    }

    /// Generation of the snapshot this session reads.
    pub fn generation(&self) -> Result<Generation> {
        self.shared.generation()
    }

    pub fn is_in_write(&self) -> bool {
        self.shared.in_write()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.peek(|_| ()).is_none()
    }

    // ------------------------------------------------------------------------
    // Write scopes
    // ------------------------------------------------------------------------

    /// Acquire the database write lock (blocking, no timeout) and advance
    /// to the latest generation.
    pub fn begin_write(&self) -> Result<()> {
        self.shared.begin_write()
    }

    /// Publish the write scope as a new generation.
    pub fn commit_write(&self) -> Result<Generation> {
        self.shared.commit_write()
    }

    /// Discard the write scope. No-op outside one.
    pub fn cancel_write(&self) -> Result<()> {
        self.shared.cancel_write()
    }

    /// Run `f` in a write scope: committed if it returns `Ok`, discarded
    /// otherwise.
    pub fn write<R>(&self, f: impl FnOnce(&Session) -> Result<R>) -> Result<R> {
        self.begin_write()?;
        match f(self) {
            Ok(value) => {
                self.commit_write()?;
                Ok(value)
            }
            Err(e) => {
                // the session may have been closed by `f`
                if !self.is_closed() {
                    self.cancel_write()?;
                }
                Err(e)
            }
        }
    }

    /// Advance to the latest committed generation. Returns whether anything
    /// changed; always `false` inside a write scope.
    pub fn refresh(&self) -> Result<bool> {
        self.shared.refresh()
    }

    /// Deliver queued change notifications. Returns the number delivered.
    pub fn deliver_notifications(&self) -> Result<usize> {
        self.shared.check()?;
        Ok(self.shared.notifier.deliver())
    }

    /// Abandon any write scope and invalidate every handle from this
    /// session. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    // ------------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------------

    pub fn property(&self, class: &str, name: &str) -> Result<PropertyRef> {
        PropertyRef::resolve(&self.shared.schema, class, &[name])
    }

    /// Property reached through to-one links, e.g. `["owner", "name"]`.
    pub fn path(&self, class: &str, segments: &[&str]) -> Result<PropertyRef> {
        PropertyRef::resolve(&self.shared.schema, class, segments)
    }

    // ------------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------------

    /// Create an object. Unlisted scalar properties take null when optional
    /// and the family default otherwise; containers start empty.
    pub fn create<'a>(&self, class: &str, fields: impl IntoIterator<Item = (&'a str, Value)>) -> Result<ObjectKey> {
        let class_schema = self.shared.schema.class(class)?;
        let mut provided: Vec<(&PropertyDescriptor, Value)> = Vec::new();
        for (name, value) in fields {
            let descriptor = class_schema.property(name)?;
            require_scalar(descriptor)?;
            descriptor.kind.check(&value)?;
            provided.push((descriptor, descriptor.kind.normalize(value)));
        }
        self.shared.write(|batch| {
            for (descriptor, value) in &provided {
                check_link(batch.view(), &descriptor.kind, value)?;
            }
            let key = batch.insert_entity(class);
            let entity = batch.entity_mut(key)?;
            for descriptor in &class_schema.properties {
                let kind = &descriptor.kind;
                let field = match kind.container {
                    Some(ContainerKind::List) => Field::List(Vec::new()),
                    Some(ContainerKind::Set) => Field::Set(Vec::new()),
                    None => {
                        let value = provided.iter().rev().find(|(d, _)| d.name == descriptor.name).map(|(_, v)| v.clone());
                        Field::Value(value.unwrap_or_else(|| {
                            if kind.optional { Value::Null } else { kind.family.default_value() }
                        }))
                    }
                };
                entity.fields.insert(descriptor.name.clone(), field);
            }
            Ok(key)
        })
    }

    /// Delete an object, unlinking it from every container and to-one link.
    /// Returns `false` if it did not exist.
    pub fn delete(&self, key: ObjectKey) -> Result<bool> {
        self.shared.write(|batch| Ok(batch.remove_entity(key).is_some()))
    }

    pub fn set_value(&self, key: ObjectKey, property: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.shared.write(|batch| {
            let class = batch.view().entity(key).ok_or_else(|| Error::NotFound(format!("object {key}")))?.class.clone();
            let descriptor = self.shared.schema.descriptor(&class, property)?;
            require_scalar(descriptor)?;
            descriptor.kind.check(&value)?;
            check_link(batch.view(), &descriptor.kind, &value)?;
            let value = descriptor.kind.normalize(value);
            batch.entity_mut(key)?.fields.insert(property.to_string(), Field::Value(value));
            Ok(())
        })
    }

    pub fn get_value(&self, key: ObjectKey, property: &str) -> Result<Value> {
        self.shared.read(|view, _| {
            let entity = view.entity(key).ok_or_else(|| Error::NotFound(format!("object {key}")))?;
            require_scalar(self.shared.schema.descriptor(&entity.class, property)?)?;
            Ok(entity.get(property).cloned().unwrap_or(Value::Null))
        })
    }

    pub fn exists(&self, key: ObjectKey) -> Result<bool> {
        self.shared.read(|view, _| Ok(view.contains(key)))
    }

    // ------------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------------

    /// Every object of a class, in native order.
    pub fn objects(&self, class: &str) -> Result<Results> {
        self.shared.schema.class(class)?;
        Ok(Results::new(Binding::Live(self.shared.clone()), ResultsSpec::new(Source::Class(class.to_string()))))
    }

    /// Live handle on a list or set property of one object.
    pub fn collection(&self, key: ObjectKey, property: &str) -> Result<ManagedCollection> {
        let kind = self.shared.read(|view, _| {
            let entity = view.entity(key).ok_or_else(|| Error::NotFound(format!("object {key}")))?;
            Ok(self.shared.schema.descriptor(&entity.class, property)?.kind.clone())
        })?;
        if !kind.is_container() {
            return Err(Error::TypeMismatch { expected: "list or set property".into(), got: format!("{property}: {kind}") });
        }
        Ok(ManagedCollection::live(self.shared.clone(), ContainerKey::new(key, property), kind))
    }

    pub fn list(&self, key: ObjectKey, property: &str) -> Result<ManagedCollection> {
        self.collection_of(key, property, ContainerKind::List)
    }

    pub fn set(&self, key: ObjectKey, property: &str) -> Result<ManagedCollection> {
        self.collection_of(key, property, ContainerKind::Set)
    }

    fn collection_of(&self, key: ObjectKey, property: &str, expected: ContainerKind) -> Result<ManagedCollection> {
        let collection = self.collection(key, property)?;
        if collection.kind().container != Some(expected) {
            return Err(Error::TypeMismatch {
                expected: format!("{expected} property"),
                got: format!("{property}: {}", collection.kind()),
            });
        }
        Ok(collection)
    }

    /// Replace a container property's contents with the values of an
    /// unattached collection and return the live collection. Requires a
    /// write scope.
    pub fn assign(&self, key: ObjectKey, property: &str, values: &ManagedCollection) -> Result<ManagedCollection> {
        let values = values.unattached_values()?.to_vec();
        let collection = self.collection(key, property)?;
        collection.replace_all(values)?;
        Ok(collection)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.shared.id).finish_non_exhaustive()
    }
}

fn require_scalar(descriptor: &PropertyDescriptor) -> Result<()> {
    if descriptor.kind.is_container() {
        return Err(Error::TypeMismatch {
            expected: "scalar property".into(),
            got: format!("{}: {}", descriptor.name, descriptor.kind),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryEngine;

    fn session() -> Session {
        let schema = Schema::new()
            .with_class(
                ClassSchema::new("Person")
                    .with("name", PropertyKind::scalar(TypeFamily::String))
                    .with("age", PropertyKind::optional(TypeFamily::Integer))
                    .with("dog", PropertyKind::link("Dog"))
                    .with("tags", PropertyKind::set(TypeFamily::String)),
            )
            .with_class(ClassSchema::new("Dog").with("name", PropertyKind::scalar(TypeFamily::String)));
        Session::open(Arc::new(MemoryEngine::new()), Arc::new(schema), true)
    }

    #[test]
    fn test_create_fills_defaults() {
        let s = session();
        let ada = s.write(|s| s.create("Person", [("name", Value::from("Ada"))])).unwrap();
        assert_eq!(s.get_value(ada, "name").unwrap(), Value::from("Ada"));
        assert_eq!(s.get_value(ada, "age").unwrap(), Value::Null);
        assert_eq!(s.get_value(ada, "dog").unwrap(), Value::Null);
        assert_eq!(s.set(ada, "tags").unwrap().len().unwrap(), 0);
        assert_eq!(s.generation().unwrap(), Generation(1));
    }

    #[test]
    fn test_mutation_outside_write_fails() {
        let s = session();
        assert!(matches!(s.create("Person", []), Err(Error::WriteOutsideTransaction)));
        assert!(matches!(s.commit_write(), Err(Error::WriteOutsideTransaction)));
    }

    #[test]
    fn test_failed_write_scope_is_discarded() {
        let s = session();
        let result: Result<()> = s.write(|s| {
            s.create("Person", [("name", Value::from("Ada"))])?;
            Err(Error::InvalidOperation("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(s.objects("Person").unwrap().count().unwrap(), 0);
        assert_eq!(s.generation().unwrap(), Generation(0));
        assert!(!s.is_in_write());
    }

    #[test]
    fn test_type_and_link_checks() {
        let s = session();
        s.begin_write().unwrap();
        assert!(matches!(s.create("Person", [("age", Value::from("old"))]), Err(Error::TypeMismatch { .. })));
        assert!(matches!(s.create("Person", [("tags", Value::from("x"))]), Err(Error::TypeMismatch { .. })));
        let ada = s.create("Person", []).unwrap();
        assert!(matches!(s.set_value(ada, "dog", ObjectKey(99)), Err(Error::NotFound(_))));
        assert!(matches!(s.set_value(ada, "dog", ada), Err(Error::TypeMismatch { .. })));
        let rex = s.create("Dog", [("name", Value::from("Rex"))]).unwrap();
        s.set_value(ada, "dog", rex).unwrap();
        assert!(matches!(s.begin_write(), Err(Error::InvalidOperation(_))));
        s.commit_write().unwrap();
        assert_eq!(s.get_value(ada, "dog").unwrap(), Value::Object(rex));
    }

    #[test]
    fn test_delete_nulls_links() {
        let s = session();
        let (ada, rex) = s
            .write(|s| {
                let rex = s.create("Dog", [("name", Value::from("Rex"))])?;
                let ada = s.create("Person", [("dog", Value::Object(rex))])?;
                Ok((ada, rex))
            })
            .unwrap();
        assert!(s.write(|s| s.delete(rex)).unwrap());
        assert!(!s.exists(rex).unwrap());
        assert_eq!(s.get_value(ada, "dog").unwrap(), Value::Null);
    }

    #[test]
    fn test_closed_session_is_stale() {
        let s = session();
        let people = s.objects("Person").unwrap();
        s.close();
        s.close();
        assert!(s.is_closed());
        assert!(matches!(people.count(), Err(Error::StaleReference(_))));
        assert!(matches!(s.generation(), Err(Error::StaleReference(_))));
    }
}
