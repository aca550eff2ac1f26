//! Property paths and typed property references.

use std::fmt;
use std::ops::{Range, RangeInclusive};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::model::{ContainerKind, PropertyKind, Schema, TypeFamily, Value};
use crate::{Error, Result};

/// Ordered sequence of property names, following to-one links from a root
/// class. The empty path is `self`: the candidate element itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyPath {
    segments: SmallVec<[String; 2]>,
}

impl PropertyPath {
    pub fn this() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_self(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("self");
        }
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

/// A typed handle on a property path: the path plus the declared kind of the
/// value it reaches. Every predicate combinator type-checks against `kind`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRef {
    path: PropertyPath,
    kind: PropertyKind,
}

impl PropertyRef {
    /// Resolve `class.segments[0].segments[1]...` against the schema. Every
    /// segment but the last must be a to-one link.
    pub fn resolve(schema: &Schema, class: &str, segments: &[&str]) -> Result<Self> {
        let Some((last, links)) = segments.split_last() else {
            return Err(Error::InvalidOperation("empty property path".into()));
        };
        let mut current = class.to_string();
        let mut optional = false;
        let mut path = PropertyPath::default();
        for segment in links {
            let kind = &schema.descriptor(&current, segment)?.kind;
            let target = match (&kind.target, kind.container) {
                (Some(target), None) => target.clone(),
                _ => {
                    return Err(Error::TypeMismatch {
                        expected: "to-one link".into(),
                        got: format!("{segment}: {kind}"),
                    });
                }
            };
            optional |= kind.optional;
            path.segments.push(segment.to_string());
            current = target;
        }
        let mut kind = schema.descriptor(&current, last)?.kind.clone();
        // a null link anywhere makes the leaf read as null
        if optional && kind.container.is_none() {
            kind.optional = true;
        }
        path.segments.push(last.to_string());
        Ok(Self { path, kind })
    }

    /// `self` reference for the elements of a primitive container.
    pub fn element(kind: &PropertyKind) -> Self {
        Self { path: PropertyPath::this(), kind: kind.element() }
    }

    /// A container property seen from its owner.
    pub(crate) fn on_owner(property: &str, kind: PropertyKind) -> Self {
        let mut path = PropertyPath::default();
        path.segments.push(property.to_string());
        Self { path, kind }
    }

    pub fn path(&self) -> &PropertyPath {
        &self.path
    }

    pub fn kind(&self) -> &PropertyKind {
        &self.kind
    }

    pub(crate) fn require_scalar(&self) -> Result<()> {
        match self.kind.container {
            None => Ok(()),
            Some(_) => Err(Error::TypeMismatch {
                expected: "scalar property".into(),
                got: format!("{}: {}", self.path, self.kind),
            }),
        }
    }

    pub(crate) fn require_container(&self) -> Result<ContainerKind> {
        self.kind.container.ok_or_else(|| Error::TypeMismatch {
            expected: "list or set property".into(),
            got: format!("{}: {}", self.path, self.kind),
        })
    }

    pub(crate) fn require_orderable(&self) -> Result<()> {
        if self.kind.family.is_orderable() {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                expected: "orderable property".into(),
                got: format!("{}: {}", self.path, self.kind),
            })
        }
    }

    /// Check a non-null literal of an ordering comparison.
    pub(crate) fn check_bound(&self, value: &Value) -> Result<()> {
        if value.is_null() {
            return Err(Error::TypeMismatch {
                expected: self.kind.element().to_string(),
                got: "null in ordering comparison".into(),
            });
        }
        self.kind.element().check(value)?;
        if self.kind.family == TypeFamily::Any && !value.family().is_some_and(TypeFamily::is_orderable) {
            return Err(Error::TypeMismatch {
                expected: "orderable literal".into(),
                got: value.type_name().into(),
            });
        }
        Ok(())
    }
}

/// Lower and upper bound of a range predicate. Built from Rust ranges:
/// `lo..hi` is half-open, `lo..=hi` is closed.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lo: Value,
    pub hi: Value,
    pub inclusive: bool,
}

impl Bounds {
    pub fn closed(lo: impl Into<Value>, hi: impl Into<Value>) -> Self {
        Self { lo: lo.into(), hi: hi.into(), inclusive: true }
    }

    pub fn half_open(lo: impl Into<Value>, hi: impl Into<Value>) -> Self {
        Self { lo: lo.into(), hi: hi.into(), inclusive: false }
    }
}

impl<T: Into<Value>> From<Range<T>> for Bounds {
    fn from(r: Range<T>) -> Self {
        Bounds::half_open(r.start, r.end)
    }
}

impl<T: Into<Value>> From<RangeInclusive<T>> for Bounds {
    fn from(r: RangeInclusive<T>) -> Self {
        let (lo, hi) = r.into_inner();
        Bounds::closed(lo, hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClassSchema;

    fn schema() -> Schema {
        Schema::new()
            .with_class(
                ClassSchema::new("Person")
                    .with("name", PropertyKind::scalar(TypeFamily::String))
                    .with("dog", PropertyKind::link("Dog"))
                    .with("dogs", PropertyKind::list_of("Dog")),
            )
            .with_class(ClassSchema::new("Dog").with("age", PropertyKind::scalar(TypeFamily::Integer)))
    }

    #[test]
    fn test_resolve_through_link_marks_leaf_optional() {
        let r = PropertyRef::resolve(&schema(), "Person", &["dog", "age"]).unwrap();
        assert_eq!(r.path().to_string(), "dog.age");
        assert!(r.kind().optional);
        assert_eq!(r.kind().family, TypeFamily::Integer);
    }

    #[test]
    fn test_resolve_rejects_traversal_through_list() {
        let err = PropertyRef::resolve(&schema(), "Person", &["dogs", "age"]).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_resolve_unknown_property() {
        let err = PropertyRef::resolve(&schema(), "Person", &["age"]).unwrap_err();
        assert!(matches!(err, Error::UnknownProperty { .. }));
    }

    #[test]
    fn test_bounds_from_ranges() {
        assert_eq!(Bounds::from(5..6), Bounds::half_open(5, 6));
        assert_eq!(Bounds::from(5..=6), Bounds::closed(5, 6));
        assert_eq!(PropertyPath::this().to_string(), "self");
    }
}
