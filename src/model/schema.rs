//! Schema descriptors: which classes exist and what each property holds.
//!
//! Descriptors are data only. Generating typed accessors from them is the
//! host's business; the query builder reads them to type-check predicates.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{TypeFamily, Value};
use crate::{Error, Result};

/// Container shape of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerKind {
    /// Ordered, duplicates allowed.
    List,
    /// Unordered, deduplicated.
    Set,
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::List => write!(f, "list"),
            ContainerKind::Set => write!(f, "set"),
        }
    }
}

/// Declared type of a property (or of a container's elements).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyKind {
    pub family: TypeFamily,
    /// Whether null is a legal (element) value.
    pub optional: bool,
    pub container: Option<ContainerKind>,
    /// Target class for `TypeFamily::Object`.
    pub target: Option<String>,
}

impl PropertyKind {
    pub fn scalar(family: TypeFamily) -> Self {
        Self { family, optional: family == TypeFamily::Any, container: None, target: None }
    }

    pub fn optional(family: TypeFamily) -> Self {
        Self { optional: true, ..Self::scalar(family) }
    }

    /// To-one link; always nullable.
    pub fn link(class: impl Into<String>) -> Self {
        Self {
            family: TypeFamily::Object,
            optional: true,
            container: None,
            target: Some(class.into()),
        }
    }

    pub fn list(family: TypeFamily) -> Self {
        Self { container: Some(ContainerKind::List), ..Self::scalar(family) }
    }

    pub fn set(family: TypeFamily) -> Self {
        Self { container: Some(ContainerKind::Set), ..Self::scalar(family) }
    }

    pub fn list_of(class: impl Into<String>) -> Self {
        Self { container: Some(ContainerKind::List), optional: false, ..Self::link(class) }
    }

    pub fn set_of(class: impl Into<String>) -> Self {
        Self { container: Some(ContainerKind::Set), optional: false, ..Self::link(class) }
    }

    /// Allow null (elements, for containers).
    pub fn nullable(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Kind of a single element; identity for scalars.
    pub fn element(&self) -> PropertyKind {
        PropertyKind { container: None, ..self.clone() }
    }

    pub fn is_container(&self) -> bool {
        self.container.is_some()
    }

    pub fn is_object(&self) -> bool {
        self.family == TypeFamily::Object
    }

    /// Whether `value` may be stored as (an element of) this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match value.family() {
            None => self.optional,
            Some(_) if self.family == TypeFamily::Any => true,
            Some(family) => family == self.family,
        }
    }

    /// Check a literal against the element kind, failing with `TypeMismatch`.
    pub fn check(&self, value: &Value) -> Result<()> {
        if self.accepts(value) {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                expected: self.element().to_string(),
                got: value.type_name().into(),
            })
        }
    }

    /// Storage form of an accepted value: any-typed properties keep the
    /// literal's discriminant next to it.
    pub fn normalize(&self, value: Value) -> Value {
        if self.family == TypeFamily::Any { Value::any(value) } else { value }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match (&self.target, self.family) {
            (Some(class), TypeFamily::Object) => class.as_str(),
            (_, family) => family.name(),
        };
        let q = if self.optional && self.family != TypeFamily::Any { "?" } else { "" };
        match self.container {
            Some(c) => write!(f, "{c}<{base}{q}>"),
            None => write!(f, "{base}{q}"),
        }
    }
}

/// A named property on a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub kind: PropertyKind,
}

/// Properties of one entity class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSchema {
    pub name: String,
    pub properties: Vec<PropertyDescriptor>,
}

impl ClassSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), properties: Vec::new() }
    }

    pub fn with(mut self, name: impl Into<String>, kind: PropertyKind) -> Self {
        self.properties.push(PropertyDescriptor { name: name.into(), kind });
        self
    }

    pub fn property(&self, name: &str) -> Result<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name).ok_or_else(|| Error::UnknownProperty {
            class: self.name.clone(),
            property: name.into(),
        })
    }
}

/// All classes known to a database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    classes: BTreeMap<String, ClassSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class(mut self, class: ClassSchema) -> Self {
        self.classes.insert(class.name.clone(), class);
        self
    }

    pub fn class(&self, name: &str) -> Result<&ClassSchema> {
        self.classes.get(name).ok_or_else(|| Error::UnknownClass(name.into()))
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassSchema> {
        self.classes.values()
    }

    pub fn descriptor(&self, class: &str, property: &str) -> Result<&PropertyDescriptor> {
        self.class(class)?.property(property)
    }

    /// Check identifiers, duplicate names and link targets.
    pub fn validate(&self) -> Result<()> {
        for class in self.classes.values() {
            if !is_identifier(&class.name) {
                return Err(Error::InvalidOperation(format!("invalid class name '{}'", class.name)));
            }
            for (i, prop) in class.properties.iter().enumerate() {
                if !is_identifier(&prop.name) || prop.name == "self" {
                    return Err(Error::InvalidOperation(format!(
                        "invalid property name '{}.{}'",
                        class.name, prop.name
                    )));
                }
                if class.properties[..i].iter().any(|p| p.name == prop.name) {
                    return Err(Error::InvalidOperation(format!(
                        "duplicate property '{}.{}'",
                        class.name, prop.name
                    )));
                }
                match (&prop.kind.target, prop.kind.family) {
                    (Some(target), TypeFamily::Object) => {
                        self.class(target)?;
                    }
                    (None, TypeFamily::Object) | (Some(_), _) => {
                        return Err(Error::InvalidOperation(format!(
                            "property '{}.{}' has an inconsistent link target",
                            class.name, prop.name
                        )));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
