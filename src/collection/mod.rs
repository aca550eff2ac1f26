//! # Managed Collections
//!
//! A [`ManagedCollection`] is the handle on one list or set property of one
//! object. It moves through four states:
//!
//! ```text
//! Unattached ──assign──▶ Live ──freeze──▶ Frozen
//!                          │
//!                          └─owner deleted / session closed──▶ Invalidated
//! ```
//!
//! - **Unattached**: plain values, no storage identity. Enumeration only.
//! - **Live**: reads the owning session's current view and writes through
//!   its write scope. Thread-confined to the session.
//! - **Frozen**: pinned to one committed snapshot. Immutable; readable from
//!   any thread.
//! - **Invalidated**: every access fails with `StaleReference`.
//!
//! Mutations validate every operand before touching storage, so a failed
//! call leaves the container exactly as it was. They record no change
//! description themselves: observers get the per-generation union from
//! `notify::diff`, which compares element identities and revisions.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::execution::aggregate::{self, Aggregate};
use crate::execution::{Binding, FromValue, Results, ResultsSpec, Source, evaluate};
use crate::model::*;
use crate::notify::{CollectionChange, NotificationToken};
use crate::query::{Bounds, Expr, PropertyRef};
use crate::storage::{Snapshot, WriteBatch};
use crate::tx::session::check_link;
use crate::tx::{Generation, HandoverToken, SessionShared};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Unattached,
    Live,
    Frozen,
    Invalidated,
}

/// Proxy over a persisted list or set property.
#[derive(Clone)]
pub struct ManagedCollection {
    inner: Inner,
}

#[derive(Clone)]
enum Inner {
    Unattached { kind: PropertyKind, values: Vec<Value> },
    Bound { binding: Binding, container: ContainerKey, kind: PropertyKind },
}

fn unattached() -> Error {
    Error::InvalidOperation("collection is not attached to a session".into())
}

fn stale(container: &ContainerKey) -> Error {
    Error::StaleReference(format!("owner of {container} no longer exists"))
}

fn elements_in<'a>(snapshot: &'a Snapshot, container: &ContainerKey) -> Result<&'a [StoredElement]> {
    let owner = snapshot.entity(container.owner).ok_or_else(|| stale(container))?;
    Ok(owner.elements(&container.property).unwrap_or(&[]))
}

/// Canonical slot of `value` in a set: `Ok` if an equal element exists.
fn set_position(elements: &[StoredElement], value: &Value) -> std::result::Result<usize, usize> {
    elements.binary_search_by(|e| e.value.canonical_cmp(value))
}

impl ManagedCollection {
    /// Standalone collection of plain values, e.g. to `Session::assign`
    /// later. Set kinds deduplicate into canonical order.
    pub fn unattached<V: Into<Value>>(kind: PropertyKind, values: impl IntoIterator<Item = V>) -> Result<Self> {
        let Some(shape) = kind.container else {
            return Err(Error::TypeMismatch { expected: "list or set kind".into(), got: kind.to_string() });
        };
        let element = kind.element();
        let mut stored: Vec<Value> = Vec::new();
        for value in values {
            let value = value.into();
            element.check(&value)?;
            let value = kind.normalize(value);
            match shape {
                ContainerKind::List => stored.push(value),
                ContainerKind::Set => {
                    if let Err(pos) = stored.binary_search_by(|v| v.canonical_cmp(&value)) {
                        stored.insert(pos, value);
                    }
                }
            }
        }
        Ok(Self { inner: Inner::Unattached { kind, values: stored } })
    }

    pub(crate) fn live(session: Arc<SessionShared>, container: ContainerKey, kind: PropertyKind) -> Self {
        Self { inner: Inner::Bound { binding: Binding::Live(session), container, kind } }
    }

    pub fn kind(&self) -> &PropertyKind {
        match &self.inner {
            Inner::Unattached { kind, .. } | Inner::Bound { kind, .. } => kind,
        }
    }

    /// `self` reference to the elements, for predicates over primitive
    /// containers: `list.filter(&list.element().greater_than(3)?)`.
    pub fn element(&self) -> PropertyRef {
        PropertyRef::element(self.kind())
    }

    pub fn state(&self) -> LifecycleState {
        match &self.inner {
            Inner::Unattached { .. } => LifecycleState::Unattached,
            Inner::Bound { binding: Binding::Frozen(_), .. } => LifecycleState::Frozen,
            Inner::Bound { binding: Binding::Live(session), container, .. } => {
                match session.peek(|view| view.contains(container.owner)) {
                    Some(true) => LifecycleState::Live,
                    _ => LifecycleState::Invalidated,
                }
            }
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.state() == LifecycleState::Frozen
    }

    pub fn owner(&self) -> Option<ObjectKey> {
        match &self.inner {
            Inner::Bound { container, .. } => Some(container.owner),
            Inner::Unattached { .. } => None,
        }
    }

    pub fn property(&self) -> Option<&str> {
        match &self.inner {
            Inner::Bound { container, .. } => Some(&container.property),
            Inner::Unattached { .. } => None,
        }
    }

    pub(crate) fn unattached_values(&self) -> Result<&[Value]> {
        match &self.inner {
            Inner::Unattached { values, .. } => Ok(values),
            Inner::Bound { .. } => Err(Error::InvalidOperation("collection is already attached".into())),
        }
    }

    fn bound(&self) -> Result<(&Binding, &ContainerKey, &PropertyKind)> {
        match &self.inner {
            Inner::Bound { binding, container, kind } => Ok((binding, container, kind)),
            Inner::Unattached { .. } => Err(unattached()),
        }
    }

    fn read<R>(&self, f: impl FnOnce(&Snapshot, &[StoredElement]) -> Result<R>) -> Result<R> {
        let (binding, container, _) = self.bound()?;
        binding.read(|snapshot, _| f(snapshot, elements_in(snapshot, container)?))
    }

    /// Element values in stored order, in any state that has values.
    fn with_values<R>(&self, f: impl FnOnce(Vec<&Value>) -> Result<R>) -> Result<R> {
        match &self.inner {
            Inner::Unattached { values, .. } => f(values.iter().collect()),
            Inner::Bound { .. } => self.read(|_, elements| f(elements.iter().map(|e| &e.value).collect())),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn len(&self) -> Result<usize> {
        self.with_values(|values| Ok(values.len()))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, index: usize) -> Result<Value> {
        self.with_values(|values| {
            let len = values.len();
            values.get(index).map(|v| (*v).clone()).ok_or(Error::IndexOutOfBounds { index, len })
        })
    }

    pub fn get_as<T: FromValue>(&self, index: usize) -> Result<T> {
        T::from_value(&self.get(index)?)
    }

    pub fn values(&self) -> Result<Vec<Value>> {
        self.with_values(|values| Ok(values.into_iter().cloned().collect()))
    }

    /// Element membership under exact typed equality. `nil` is contained
    /// only if an explicit null element is stored.
    pub fn contains(&self, value: &Value) -> Result<bool> {
        self.with_values(|values| Ok(values.iter().any(|v| v.exact_eq(value))))
    }

    pub fn index_of(&self, value: &Value) -> Result<Option<usize>> {
        self.with_values(|values| Ok(values.iter().position(|v| v.exact_eq(value))))
    }

    /// Stable identity of the element at `index`.
    pub fn slot_at(&self, index: usize) -> Result<SlotId> {
        self.read(|_, elements| {
            elements.get(index).map(|e| e.slot).ok_or(Error::IndexOutOfBounds { index, len: elements.len() })
        })
    }

    pub fn get_by_slot(&self, slot: SlotId) -> Result<Option<Value>> {
        self.read(|_, elements| Ok(elements.iter().find(|e| e.slot == slot).map(|e| e.value.clone())))
    }

    /// Whole-container bound test: every element lies within `bounds`.
    /// False for an empty container.
    pub fn contains_within(&self, bounds: impl Into<Bounds>) -> Result<bool> {
        let (binding, container, kind) = self.bound()?;
        let expr = PropertyRef::on_owner(&container.property, kind.clone()).contains_all_within(bounds)?;
        let owner = Value::Object(container.owner);
        binding.read(|snapshot, _| {
            elements_in(snapshot, container)?;
            Ok(evaluate(&expr, snapshot, &owner))
        })
    }

    fn fold<R>(&self, op: Aggregate, f: impl FnOnce(Vec<&Value>, TypeFamily) -> Result<R>) -> Result<R> {
        let (_, _, kind) = self.bound()?;
        let element = kind.element();
        op.check(&element)?;
        self.with_values(|values| f(values, element.family))
    }

    pub fn min(&self) -> Result<Option<Value>> {
        self.fold(Aggregate::Min, |values, _| Ok(aggregate::min(values)))
    }

    pub fn max(&self) -> Result<Option<Value>> {
        self.fold(Aggregate::Max, |values, _| Ok(aggregate::max(values)))
    }

    pub fn sum(&self) -> Result<Value> {
        self.fold(Aggregate::Sum, |values, family| aggregate::sum(values, family))
    }

    pub fn average(&self) -> Result<Option<Value>> {
        self.fold(Aggregate::Average, |values, family| aggregate::average(values, family))
    }

    // ========================================================================
    // Derived views
    // ========================================================================

    pub fn as_results(&self) -> Result<Results> {
        let (binding, container, _) = self.bound()?;
        Ok(Results::new(binding.clone(), ResultsSpec::new(Source::Container(container.clone()))))
    }

    pub fn filter(&self, expr: &Expr) -> Result<Results> {
        Ok(self.as_results()?.filter(expr))
    }

    /// Sorted by element value.
    pub fn sorted(&self, ascending: bool) -> Result<Results> {
        Ok(self.as_results()?.sorted(&self.element(), ascending))
    }

    /// Sorted by a property of the linked objects.
    pub fn sorted_by(&self, by: &PropertyRef, ascending: bool) -> Result<Results> {
        Ok(self.as_results()?.sorted(by, ascending))
    }

    pub fn distinct(&self) -> Result<Results> {
        Ok(self.as_results()?.distinct(&self.element()))
    }

    pub fn distinct_by(&self, by: &PropertyRef) -> Result<Results> {
        Ok(self.as_results()?.distinct(by))
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    fn mutate<R>(&self, f: impl FnOnce(&mut WriteBatch, &ContainerKey, &PropertyKind) -> Result<R>) -> Result<R> {
        let (session, container, kind) = match &self.inner {
            Inner::Bound { binding: Binding::Live(session), container, kind } => (session, container, kind),
            Inner::Bound { binding: Binding::Frozen(_), .. } => {
                return Err(Error::InvalidOperation("frozen collections are immutable".into()));
            }
            Inner::Unattached { .. } => return Err(unattached()),
        };
        session.write(|batch| {
            if !batch.view().contains(container.owner) {
                return Err(stale(container));
            }
            f(batch, container, kind)
        })
    }

    /// Append to a list, or insert into a set at its canonical position.
    /// Returns `false` if a set already held an equal element.
    pub fn append(&self, value: impl Into<Value>) -> Result<bool> {
        let value = value.into();
        self.mutate(|batch, container, kind| {
            let value = prepare(batch.view(), kind, value)?;
            let elements = elements_in(batch.view(), container)?;
            let position = match kind.container {
                Some(ContainerKind::Set) => match set_position(elements, &value) {
                    Ok(_) => return Ok(false),
                    Err(pos) => pos,
                },
                _ => elements.len(),
            };
            let element = new_element(batch, value);
            stored(batch, container, kind)?.insert(position, element);
            Ok(true)
        })
    }

    /// Positional insert; lists only.
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.mutate(|batch, container, kind| {
            require_list(kind, "positional insert")?;
            let value = prepare(batch.view(), kind, value)?;
            let len = elements_in(batch.view(), container)?.len();
            if index > len {
                return Err(Error::IndexOutOfBounds { index, len });
            }
            let element = new_element(batch, value);
            stored(batch, container, kind)?.insert(index, element);
            Ok(())
        })
    }

    /// Remove by position, returning the removed value.
    pub fn remove(&self, index: usize) -> Result<Value> {
        self.mutate(|batch, container, kind| {
            let len = elements_in(batch.view(), container)?.len();
            if index >= len {
                return Err(Error::IndexOutOfBounds { index, len });
            }
            Ok(stored(batch, container, kind)?.remove(index).value)
        })
    }

    /// Remove the first element equal to `value`; `false` if none was.
    pub fn remove_value(&self, value: &Value) -> Result<bool> {
        self.mutate(|batch, container, kind| {
            let found = elements_in(batch.view(), container)?.iter().position(|e| e.value.exact_eq(value));
            let Some(index) = found else {
                return Ok(false);
            };
            stored(batch, container, kind)?.remove(index);
            Ok(true)
        })
    }

    /// Overwrite the element at `index` in place, keeping its slot; lists
    /// only. Returns the previous value.
    pub fn replace(&self, index: usize, value: impl Into<Value>) -> Result<Value> {
        let value = value.into();
        self.mutate(|batch, container, kind| {
            require_list(kind, "replace")?;
            let value = prepare(batch.view(), kind, value)?;
            let len = elements_in(batch.view(), container)?.len();
            if index >= len {
                return Err(Error::IndexOutOfBounds { index, len });
            }
            let revision = batch.pending_generation();
            let element = &mut stored(batch, container, kind)?[index];
            element.revision = revision;
            Ok(std::mem::replace(&mut element.value, value))
        })
    }

    pub fn clear(&self) -> Result<()> {
        self.mutate(|batch, container, kind| {
            stored(batch, container, kind)?.clear();
            Ok(())
        })
    }

    /// Delete every object the container links to. Each deletion unlinks
    /// the object everywhere, this container included. Returns how many
    /// objects were deleted.
    pub fn delete_all_objects(&self) -> Result<usize> {
        self.mutate(|batch, container, kind| {
            if !kind.is_object() {
                return Err(Error::TypeMismatch { expected: "list or set of objects".into(), got: kind.to_string() });
            }
            let mut keys: Vec<ObjectKey> =
                elements_in(batch.view(), container)?.iter().filter_map(|e| e.value.as_object()).collect();
            keys.sort();
            keys.dedup();
            Ok(keys.into_iter().filter(|key| batch.remove_entity(*key).is_some()).count())
        })
    }

    /// Replace the whole contents; used when attaching values.
    pub(crate) fn replace_all(&self, values: Vec<Value>) -> Result<()> {
        self.mutate(|batch, container, kind| {
            let mut prepared = Vec::with_capacity(values.len());
            for value in values {
                prepared.push(prepare(batch.view(), kind, value)?);
            }
            if kind.container == Some(ContainerKind::Set) {
                prepared.sort_by(|a, b| a.canonical_cmp(b));
                prepared.dedup_by(|a, b| a.canonical_cmp(b) == Ordering::Equal);
            }
            let elements: Vec<StoredElement> = prepared.into_iter().map(|v| new_element(batch, v)).collect();
            *stored(batch, container, kind)? = elements;
            Ok(())
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Immutable copy pinned to the session's last committed generation.
    /// Idempotent on an already frozen collection.
    pub fn freeze(&self) -> Result<ManagedCollection> {
        let (binding, container, kind) = self.bound()?;
        if binding.is_frozen() {
            return Ok(self.clone());
        }
        let frozen = binding.freeze()?;
        frozen.read(|snapshot, _| elements_in(snapshot, container).map(drop))?;
        debug!(container = %container, generation = %frozen.generation()?, "froze collection");
        Ok(Self { inner: Inner::Bound { binding: frozen, container: container.clone(), kind: kind.clone() } })
    }

    /// Export a token another thread's session can resolve. Live collections
    /// only, outside a write scope.
    pub fn thread_safe_reference(&self) -> Result<HandoverToken> {
        let (session, container, kind) = match &self.inner {
            Inner::Bound { binding: Binding::Live(session), container, kind } => (session, container, kind),
            Inner::Bound { binding: Binding::Frozen(_), .. } => {
                return Err(Error::InvalidOperation("frozen collections are shared directly".into()));
            }
            Inner::Unattached { .. } => return Err(unattached()),
        };
        let snapshot = session.committed()?;
        elements_in(&snapshot, container)?;
        let shape = kind
            .container
            .ok_or_else(|| Error::TypeMismatch { expected: "list or set property".into(), got: kind.to_string() })?;
        Ok(HandoverToken::new(snapshot.generation(), container, shape))
    }

    pub fn observe(&self, callback: impl FnMut(&CollectionChange) + Send + 'static) -> Result<NotificationToken> {
        self.as_results()?.observe(callback)
    }

    /// Generation of the view this collection reads.
    pub fn generation(&self) -> Result<Generation> {
        self.bound()?.0.generation()
    }
}

impl fmt::Debug for ManagedCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ManagedCollection");
        s.field("state", &self.state()).field("kind", &self.kind().to_string());
        if let Inner::Bound { container, .. } = &self.inner {
            s.field("container", &container.to_string());
        }
        s.finish()
    }
}

fn require_list(kind: &PropertyKind, operation: &str) -> Result<()> {
    match kind.container {
        Some(ContainerKind::List) => Ok(()),
        _ => Err(Error::InvalidOperation(format!("{operation} is not supported on a set"))),
    }
}

/// Type-check, link-check and normalize one element.
fn prepare(view: &Snapshot, kind: &PropertyKind, value: Value) -> Result<Value> {
    kind.element().check(&value)?;
    check_link(view, kind, &value)?;
    let value = match value {
        Value::Any(any) => any.into_inner(),
        v => v,
    };
    Ok(kind.normalize(value))
}

fn new_element(batch: &mut WriteBatch, value: Value) -> StoredElement {
    StoredElement { slot: batch.allocate_slot(), value, revision: batch.pending_generation() }
}

fn stored<'a>(batch: &'a mut WriteBatch, container: &ContainerKey, kind: &PropertyKind) -> Result<&'a mut Vec<StoredElement>> {
    let entity = batch.entity_mut(container.owner)?;
    entity
        .fields
        .entry(container.property.clone())
        .or_insert_with(|| match kind.container {
            Some(ContainerKind::Set) => Field::Set(Vec::new()),
            _ => Field::List(Vec::new()),
        })
        .elements_mut()
        .ok_or_else(|| Error::TypeMismatch { expected: "list or set property".into(), got: container.to_string() })
}
