//! Lazily materialized result views.
//!
//! A [`Results`] is a recipe (source, filter, sort, distinct) bound to either
//! a live session or a frozen snapshot. Nothing is evaluated until a read;
//! rows are cached per view version, so repeated reads between two changes
//! of the session's view cost one lock and an `Arc` clone.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::aggregate::{self, Aggregate};
use super::{FromValue, evaluate, resolve};
use crate::model::*;
use crate::notify::{CollectionChange, NotificationToken};
use crate::query::{CompiledPredicate, Expr, PropertyPath, PropertyRef, compile};
use crate::storage::Snapshot;
use crate::tx::{Generation, SessionShared};
use crate::{Error, Result};

// ============================================================================
// Binding
// ============================================================================

/// What a view reads from: the owning session's current view, or one
/// pinned snapshot.
#[derive(Clone)]
pub(crate) enum Binding {
    Live(Arc<SessionShared>),
    Frozen(Arc<Snapshot>),
}

impl Binding {
    /// Run `f` against the current view and its version stamp. Live
    /// bindings check thread and session first.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&Snapshot, u64) -> Result<R>) -> Result<R> {
        match self {
            Binding::Live(session) => session.read(f),
            Binding::Frozen(snapshot) => f(snapshot, 0),
        }
    }

    pub(crate) fn freeze(&self) -> Result<Binding> {
        match self {
            Binding::Live(session) => Ok(Binding::Frozen(session.committed()?)),
            Binding::Frozen(snapshot) => Ok(Binding::Frozen(snapshot.clone())),
        }
    }

    pub(crate) fn generation(&self) -> Result<Generation> {
        match self {
            Binding::Live(session) => session.generation(),
            Binding::Frozen(snapshot) => Ok(snapshot.generation()),
        }
    }

    pub(crate) fn is_frozen(&self) -> bool {
        matches!(self, Binding::Frozen(_))
    }
}

// ============================================================================
// Specification
// ============================================================================

/// Stable identity of one result element: the object key for object rows,
/// the slot for container elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementId {
    Object(ObjectKey),
    Slot(SlotId),
}

#[derive(Debug, Clone)]
pub(crate) enum Source {
    /// Every object of a class, in ascending key order.
    Class(String),
    /// One stored list or set, in stored order.
    Container(ContainerKey),
}

#[derive(Debug, Clone)]
pub(crate) struct SortKey {
    path: PropertyPath,
    ascending: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct ResultsSpec {
    source: Source,
    predicate: Option<CompiledPredicate>,
    sort: Option<SortKey>,
    distinct: Option<PropertyPath>,
}

#[derive(Debug, Clone)]
pub(crate) struct ResultRow {
    pub id: ElementId,
    pub value: Value,
    /// Latest generation that wrote the element or the object it links to.
    pub revision: Generation,
}

impl ResultsSpec {
    pub(crate) fn new(source: Source) -> Self {
        Self { source, predicate: None, sort: None, distinct: None }
    }

    /// Source rows, then filter, then stable sort, then distinct (first
    /// occurrence wins).
    pub(crate) fn materialize(&self, snapshot: &Snapshot) -> Result<Vec<ResultRow>> {
        let mut rows: Vec<ResultRow> = match &self.source {
            Source::Class(class) => snapshot
                .entities_of(class)
                .map(|e| ResultRow { id: ElementId::Object(e.key), value: Value::Object(e.key), revision: e.revision })
                .collect(),
            Source::Container(container) => {
                let owner = snapshot.entity(container.owner).ok_or_else(|| {
                    Error::StaleReference(format!("owner of {container} no longer exists"))
                })?;
                owner
                    .elements(&container.property)
                    .unwrap_or(&[])
                    .iter()
                    .map(|e| ResultRow { id: ElementId::Slot(e.slot), value: e.value.clone(), revision: revision(snapshot, e) })
                    .collect()
            }
        };

        if let Some(predicate) = &self.predicate {
            rows.retain(|row| evaluate(predicate.expr(), snapshot, &row.value));
        }
        if let Some(SortKey { path, ascending }) = &self.sort {
            rows.sort_by(|a, b| {
                let ord = resolve(snapshot, &a.value, path).scalar().canonical_cmp(resolve(snapshot, &b.value, path).scalar());
                if *ascending { ord } else { ord.reverse() }
            });
        }
        if let Some(path) = &self.distinct {
            let mut seen: Vec<Value> = Vec::new();
            rows.retain(|row| {
                let key = resolve(snapshot, &row.value, path).scalar();
                match seen.binary_search_by(|s| s.canonical_cmp(key)) {
                    Ok(_) => false,
                    Err(pos) => {
                        seen.insert(pos, key.clone());
                        true
                    }
                }
            });
        }

        trace!(source = ?self.source, generation = %snapshot.generation(), count = rows.len(), "materialized results");
        Ok(rows)
    }
}

fn revision(snapshot: &Snapshot, element: &StoredElement) -> Generation {
    let linked = element.value.as_object().and_then(|key| snapshot.entity(key)).map(|e| e.revision);
    linked.map_or(element.revision, |r| r.max(element.revision))
}

// ============================================================================
// Results
// ============================================================================

/// An ordered, lazily evaluated view of matching elements.
pub struct Results {
    binding: Binding,
    spec: Arc<ResultsSpec>,
    cache: Mutex<Option<(u64, Arc<Vec<ResultRow>>)>>,
}

impl Results {
    pub(crate) fn new(binding: Binding, spec: ResultsSpec) -> Self {
        Self { binding, spec: Arc::new(spec), cache: Mutex::new(None) }
    }

    fn derive(&self, edit: impl FnOnce(&mut ResultsSpec)) -> Results {
        let mut spec = (*self.spec).clone();
        edit(&mut spec);
        Results::new(self.binding.clone(), spec)
    }

    fn cached_rows(&self, snapshot: &Snapshot, version: u64) -> Result<Arc<Vec<ResultRow>>> {
        let mut cache = self.cache.lock();
        if let Some((cached, rows)) = cache.as_ref() {
            if *cached == version {
                return Ok(rows.clone());
            }
        }
        let rows = Arc::new(self.spec.materialize(snapshot)?);
        *cache = Some((version, rows.clone()));
        Ok(rows)
    }

    fn rows(&self) -> Result<Arc<Vec<ResultRow>>> {
        self.binding.read(|snapshot, version| self.cached_rows(snapshot, version))
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.rows()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.rows()?.is_empty())
    }

    pub fn get(&self, index: usize) -> Result<Value> {
        let rows = self.rows()?;
        rows.get(index)
            .map(|row| row.value.clone())
            .ok_or(Error::IndexOutOfBounds { index, len: rows.len() })
    }

    pub fn get_as<T: FromValue>(&self, index: usize) -> Result<T> {
        T::from_value(&self.get(index)?)
    }

    pub fn first(&self) -> Result<Option<Value>> {
        Ok(self.rows()?.first().map(|row| row.value.clone()))
    }

    pub fn last(&self) -> Result<Option<Value>> {
        Ok(self.rows()?.last().map(|row| row.value.clone()))
    }

    pub fn values(&self) -> Result<Vec<Value>> {
        Ok(self.rows()?.iter().map(|row| row.value.clone()).collect())
    }

    pub fn identities(&self) -> Result<Vec<ElementId>> {
        Ok(self.rows()?.iter().map(|row| row.id).collect())
    }

    pub fn index_of(&self, value: &Value) -> Result<Option<usize>> {
        Ok(self.rows()?.iter().position(|row| row.value.exact_eq(value)))
    }

    pub fn predicate(&self) -> Option<&CompiledPredicate> {
        self.spec.predicate.as_ref()
    }

    /// Narrow the view; ANDs with any existing filter.
    pub fn filter(&self, expr: &Expr) -> Results {
        self.derive(|spec| {
            let combined = match spec.predicate.take() {
                Some(existing) => existing.expr().clone().and(expr.clone()),
                None => expr.clone(),
            };
            spec.predicate = Some(compile(&combined));
        })
    }

    /// Stable sort by a property; nulls first when ascending.
    pub fn sorted(&self, by: &PropertyRef, ascending: bool) -> Results {
        let path = by.path().clone();
        self.derive(|spec| spec.sort = Some(SortKey { path, ascending }))
    }

    /// Keep the first element for each distinct value of a property.
    pub fn distinct(&self, by: &PropertyRef) -> Results {
        let path = by.path().clone();
        self.derive(|spec| spec.distinct = Some(path))
    }

    fn fold<R>(&self, op: Aggregate, of: &PropertyRef, f: impl FnOnce(Vec<&Value>) -> Result<R>) -> Result<R> {
        op.check(of.kind())?;
        self.binding.read(|snapshot, version| {
            let rows = self.cached_rows(snapshot, version)?;
            let values = rows.iter().map(|row| resolve(snapshot, &row.value, of.path()).scalar()).collect();
            f(values)
        })
    }

    pub fn min(&self, of: &PropertyRef) -> Result<Option<Value>> {
        self.fold(Aggregate::Min, of, |values| Ok(aggregate::min(values)))
    }

    pub fn max(&self, of: &PropertyRef) -> Result<Option<Value>> {
        self.fold(Aggregate::Max, of, |values| Ok(aggregate::max(values)))
    }

    pub fn sum(&self, of: &PropertyRef) -> Result<Value> {
        self.fold(Aggregate::Sum, of, |values| aggregate::sum(values, of.kind().family))
    }

    pub fn average(&self, of: &PropertyRef) -> Result<Option<Value>> {
        self.fold(Aggregate::Average, of, |values| aggregate::average(values, of.kind().family))
    }

    /// Immutable copy pinned to the session's last committed generation.
    /// Fails inside a write scope.
    pub fn freeze(&self) -> Result<Results> {
        let binding = self.binding.freeze()?;
        debug!(generation = %binding.generation()?, "froze results");
        Ok(Results::new(binding, (*self.spec).clone()))
    }

    pub fn is_frozen(&self) -> bool {
        self.binding.is_frozen()
    }

    pub fn generation(&self) -> Result<Generation> {
        self.binding.generation()
    }

    /// Register a change observer. Changes are delivered at the owning
    /// session's next [`deliver_notifications`] call.
    ///
    /// The observer starts from the last committed snapshot, so rows written
    /// by an open write scope are reported only once that write commits.
    ///
    /// [`deliver_notifications`]: crate::Session::deliver_notifications
    pub fn observe(&self, callback: impl FnMut(&CollectionChange) + Send + 'static) -> Result<NotificationToken> {
        let Binding::Live(session) = &self.binding else {
            return Err(Error::InvalidOperation("frozen results cannot be observed".into()));
        };
        self.rows()?;
        let committed = session.baseline()?;
        // a container created by the open write has no committed rows yet
        let rows = self.spec.materialize(&committed).unwrap_or_default();
        Ok(session.notifier().register(self.spec.clone(), &rows, committed.generation(), Box::new(callback)))
    }
}

/// Shares the recipe and binding; the row cache starts empty.
impl Clone for Results {
    fn clone(&self) -> Self {
        Self { binding: self.binding.clone(), spec: self.spec.clone(), cache: Mutex::new(None) }
    }
}

impl std::fmt::Debug for Results {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Results")
            .field("source", &self.spec.source)
            .field("predicate", &self.spec.predicate)
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryEngine, StorageEngine};

    fn schema() -> Schema {
        Schema::new().with_class(
            ClassSchema::new("Dog")
                .with("name", PropertyKind::scalar(TypeFamily::String))
                .with("age", PropertyKind::optional(TypeFamily::Integer)),
        )
    }

    fn frozen(dogs: &[(&str, Option<i64>)]) -> Results {
        let engine = MemoryEngine::new();
        let mut batch = engine.begin_write().unwrap();
        for (name, age) in dogs {
            let key = batch.insert_entity("Dog");
            let entity = batch.entity_mut(key).unwrap();
            entity.fields.insert("name".into(), Field::Value((*name).into()));
            entity.fields.insert("age".into(), Field::Value((*age).into()));
        }
        let snapshot = engine.commit(batch).unwrap();
        Results::new(Binding::Frozen(snapshot), ResultsSpec::new(Source::Class("Dog".into())))
    }

    fn prop(name: &str) -> PropertyRef {
        PropertyRef::resolve(&schema(), "Dog", &[name]).unwrap()
    }

    fn names(results: &Results) -> Vec<String> {
        (0..results.count().unwrap())
            .map(|i| {
                let key = results.get_as::<ObjectKey>(i).unwrap();
                let Binding::Frozen(snapshot) = &results.binding else { unreachable!() };
                snapshot.entity(key).unwrap().get("name").unwrap().as_str().unwrap().to_owned()
            })
            .collect()
    }

    #[test]
    fn test_native_order_and_filter() {
        let dogs = frozen(&[("Rex", Some(3)), ("Fido", Some(7)), ("Spot", None)]);
        assert_eq!(names(&dogs), ["Rex", "Fido", "Spot"]);
        let old = dogs.filter(&prop("age").greater_than(5).unwrap());
        assert_eq!(names(&old), ["Fido"]);
        assert_eq!(old.predicate().unwrap().format(), "age > %@");
    }

    #[test]
    fn test_filter_composes_with_and() {
        let dogs = frozen(&[("Rex", Some(3)), ("Fido", Some(7)), ("Spot", Some(9))]);
        let narrowed = dogs
            .filter(&prop("age").greater_than(5).unwrap())
            .filter(&prop("name").equals("Spot").unwrap());
        assert_eq!(narrowed.predicate().unwrap().format(), "age > %@ && name == %@");
        assert_eq!(names(&narrowed), ["Spot"]);
    }

    #[test]
    fn test_sort_nulls_first_and_distinct() {
        let dogs = frozen(&[("Rex", Some(3)), ("Fido", Some(7)), ("Spot", None), ("Max", Some(3))]);
        assert_eq!(names(&dogs.sorted(&prop("age"), true)), ["Spot", "Rex", "Max", "Fido"]);
        assert_eq!(names(&dogs.sorted(&prop("age"), false)), ["Fido", "Rex", "Max", "Spot"]);
        assert_eq!(names(&dogs.distinct(&prop("age"))), ["Rex", "Fido", "Spot"]);
    }

    #[test]
    fn test_aggregates_by_property() {
        let dogs = frozen(&[("Rex", Some(3)), ("Fido", Some(7)), ("Spot", None)]);
        assert_eq!(dogs.min(&prop("age")).unwrap(), Some(Value::Int64(3)));
        assert_eq!(dogs.max(&prop("age")).unwrap(), Some(Value::Int64(7)));
        assert_eq!(dogs.sum(&prop("age")).unwrap(), Value::Int64(10));
        assert_eq!(dogs.average(&prop("age")).unwrap(), Some(Value::Double(5.0)));
        assert!(matches!(dogs.sum(&prop("name")), Err(Error::UnsupportedAggregate { .. })));
    }

    #[test]
    fn test_frozen_results_reject_observers() {
        let dogs = frozen(&[]);
        assert!(dogs.is_frozen());
        assert!(matches!(dogs.observe(|_| {}), Err(Error::InvalidOperation(_))));
        assert!(matches!(dogs.get(0), Err(Error::IndexOutOfBounds { index: 0, len: 0 })));
    }
}
