//! # tessera: Typed Queries and Live Collections over an Embedded Object Store
//!
//! The query-construction and managed-collection layer of an embedded,
//! transactional object database. Persisted objects are plain records keyed
//! by [`ObjectKey`]; list and set properties are exposed as
//! [`ManagedCollection`] proxies that read and write through the owning
//! [`Session`].
//!
//! ## Design Principles
//!
//! 1. **Type-checked predicates**: every comparison is checked against the
//!    schema when it is built, not when it runs
//! 2. **One canonical form**: an expression compiles to exactly one filter
//!    string plus positional arguments
//! 3. **Lazy results**: nothing is evaluated until it is read
//! 4. **Thread-confined sessions**: live handles stay on their thread;
//!    frozen handles and handover tokens are what cross threads
//!
//! ## Quick Start
//!
//! ```rust
//! use tessera::{ClassSchema, Database, PropertyKind, Schema, TypeFamily, Value};
//!
//! # fn example() -> tessera::Result<()> {
//! let schema = Schema::new().with_class(
//!     ClassSchema::new("Dog")
//!         .with("name", PropertyKind::scalar(TypeFamily::String))
//!         .with("age", PropertyKind::scalar(TypeFamily::Integer)),
//! );
//! let db = Database::open_memory(schema)?;
//! let session = db.session();
//!
//! session.write(|s| {
//!     s.create("Dog", [("name", Value::from("Rex")), ("age", Value::from(3i64))])?;
//!     s.create("Dog", [("name", Value::from("Fido")), ("age", Value::from(7i64))])?;
//!     Ok(())
//! })?;
//!
//! let age = session.property("Dog", "age")?;
//! let old = session.objects("Dog")?.filter(&age.greater_than(5)?);
//! assert_eq!(old.count()?, 1);
//! assert_eq!(old.predicate().map(|p| p.format()), Some("age > %@"));
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```
//!
//! ## Storage Backends
//!
//! | Backend | Description |
//! |---------|-------------|
//! | Memory | Copy-on-write snapshots in memory, for testing/embedding |

// ============================================================================
// Modules
// ============================================================================

pub mod collection;
pub mod execution;
pub mod model;
pub mod notify;
pub mod query;
pub mod storage;
pub mod tx;

use std::sync::Arc;

use tracing::debug;

// ============================================================================
// Re-exports: Model
// ============================================================================

pub use model::{
    AnyValue, ClassSchema, ContainerKey, ContainerKind, ObjectId, ObjectKey, PropertyDescriptor, PropertyKind,
    Schema, SlotId, TypeFamily, Value, ValueKind,
};

// ============================================================================
// Re-exports: Query
// ============================================================================

pub use query::{Bounds, Case, CompiledPredicate, Expr, PropertyPath, PropertyRef, compile};

// ============================================================================
// Re-exports: Execution, collections, notification
// ============================================================================

pub use collection::{LifecycleState, ManagedCollection};
pub use execution::aggregate::Aggregate;
pub use execution::{ElementId, FromValue, Results};
pub use notify::{ChangeSet, CollectionChange, NotificationToken};

// ============================================================================
// Re-exports: Storage and transactions
// ============================================================================

pub use storage::{BackendConfig, StorageEngine};
pub use tx::{Generation, HandoverToken, Session};

// ============================================================================
// Configuration
// ============================================================================

/// Everything needed to open a [`Database`].
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub backend: BackendConfig,
    pub schema: Schema,
    /// Queue an `Initial` change for every new observer.
    pub initial_notifications: bool,
}

impl DatabaseConfig {
    pub fn new(schema: Schema) -> Self {
        Self { backend: BackendConfig::default(), schema, initial_notifications: true }
    }

    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_initial_notifications(mut self, enabled: bool) -> Self {
        self.initial_notifications = enabled;
        self
    }
}

// ============================================================================
// Top-level Database handle
// ============================================================================

/// The primary entry point: a storage engine plus the schema it holds.
/// Cheap to clone and shareable across threads; each thread opens its own
/// [`Session`].
#[derive(Clone)]
pub struct Database {
    engine: Arc<dyn StorageEngine>,
    schema: Arc<Schema>,
    initial_notifications: bool,
}

impl Database {
    /// Validate the schema and start the configured engine.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        config.schema.validate()?;
        let engine = config.backend.build();
        debug!(backend = ?config.backend, classes = config.schema.classes().count(), "database opened");
        Ok(Self {
            engine,
            schema: Arc::new(config.schema),
            initial_notifications: config.initial_notifications,
        })
    }

    /// In-memory database for testing and embedding.
    pub fn open_memory(schema: Schema) -> Result<Self> {
        Self::open(DatabaseConfig::new(schema))
    }

    /// Open a session confined to the calling thread.
    pub fn session(&self) -> Session {
        Session::open(self.engine.clone(), self.schema.clone(), self.initial_notifications)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Latest committed generation.
    pub fn generation(&self) -> Generation {
        self.engine.latest().generation()
    }

    /// Access the underlying engine (for advanced use).
    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("generation", &self.generation()).finish_non_exhaustive()
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Unsupported aggregate: {aggregate} over {element}")]
    UnsupportedAggregate { aggregate: &'static str, element: String },

    #[error("Write outside a write transaction")]
    WriteOutsideTransaction,

    #[error("Accessed from a thread other than the owning session's")]
    WrongThread,

    #[error("Stale reference: {0}")]
    StaleReference(String),

    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    #[error("Unknown class: {0}")]
    UnknownClass(String),

    #[error("Unknown property: {class}.{property}")]
    UnknownProperty { class: String, property: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),
}

pub type Result<T> = std::result::Result<T, Error>;
