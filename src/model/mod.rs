//! # Object Model
//!
//! Plain data that crosses every boundary: schema ↔ query ↔ storage ↔ user.
//!
//! Design rule: this module is pure data. It does no I/O and takes no locks.

pub mod entity;
pub mod schema;
pub mod value;

pub use entity::{ContainerKey, Entity, Field, ObjectKey, SlotId, StoredElement};
pub use schema::{ClassSchema, ContainerKind, PropertyDescriptor, PropertyKind, Schema};
pub use value::{AnyValue, ObjectId, TypeFamily, Value, ValueKind};
