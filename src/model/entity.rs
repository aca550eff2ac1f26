//! Persisted entities and their container fields.

use std::fmt;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use super::Value;
use crate::tx::Generation;

/// Opaque entity identifier, stable for the lifetime of the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey(pub u64);

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stable identity of one element inside a stored list or set. Survives
/// reordering and replacement; never reused after removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotId(pub u64);

/// Names one container property on one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerKey {
    pub owner: ObjectKey,
    pub property: String,
}

impl ContainerKey {
    pub fn new(owner: ObjectKey, property: impl Into<String>) -> Self {
        Self { owner, property: property.into() }
    }
}

impl fmt::Display for ContainerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.property)
    }
}

/// One element of a stored container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredElement {
    pub slot: SlotId,
    pub value: Value,
    /// Generation that last wrote this element.
    pub revision: Generation,
}

/// Stored content of one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Field {
    Value(Value),
    /// Explicit stored order.
    List(Vec<StoredElement>),
    /// Deduplicated, kept in canonical value order.
    Set(Vec<StoredElement>),
}

impl Field {
    pub fn elements(&self) -> Option<&[StoredElement]> {
        match self {
            Field::Value(_) => None,
            Field::List(e) | Field::Set(e) => Some(e),
        }
    }

    pub fn elements_mut(&mut self) -> Option<&mut Vec<StoredElement>> {
        match self {
            Field::Value(_) => None,
            Field::List(e) | Field::Set(e) => Some(e),
        }
    }
}

/// A persisted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub key: ObjectKey,
    pub class: String,
    pub fields: HashMap<String, Field>,
    /// Generation that last wrote any field of this entity.
    pub revision: Generation,
}

impl Entity {
    pub fn new(key: ObjectKey, class: impl Into<String>, revision: Generation) -> Self {
        Self { key, class: class.into(), fields: HashMap::new(), revision }
    }

    pub fn field(&self, property: &str) -> Option<&Field> {
        self.fields.get(property)
    }

    /// Scalar value of a property; `None` if absent or a container.
    pub fn get(&self, property: &str) -> Option<&Value> {
        match self.fields.get(property)? {
            Field::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn elements(&self, property: &str) -> Option<&[StoredElement]> {
        self.fields.get(property)?.elements()
    }
}
