//! Universal value type for stored properties and query literals.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ObjectKey;

/// A stored or literal value.
///
/// Covers every property type the object store persists:
/// - Scalars: Bool, Int8..Int64, Float, Double, String, Bytes
/// - Precise: Decimal (128-bit), Timestamp (UTC)
/// - Identifiers: ObjectId (12 bytes), Uuid
/// - Links: Object (entity reference)
/// - Polymorphic: Any (a concrete value plus its discriminant)
///
/// Nullability is explicit: `Value::Null` is a value, not an absent one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Decimal(Decimal),
    ObjectId(ObjectId),
    Uuid(Uuid),
    Object(ObjectKey),
    Any(AnyValue),
}

/// Payload of an any-typed property: a concrete, non-null value together with
/// the discriminant it was stored under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnyValue {
    kind: ValueKind,
    value: Box<Value>,
}

impl AnyValue {
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_inner(self) -> Value {
        *self.value
    }
}

/// Exact storage discriminant of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Null,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    String,
    Bytes,
    Timestamp,
    Decimal,
    ObjectId,
    Uuid,
    Object,
    Any,
}

/// Semantic type family. Operands are comparable only within one family;
/// integer widths share `Integer`, float and double share `Float`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TypeFamily {
    Bool,
    Integer,
    Float,
    Decimal,
    String,
    Binary,
    Timestamp,
    ObjectId,
    Uuid,
    Object,
    /// Declared-only family: an any-typed property accepts every other family.
    Any,
}

impl TypeFamily {
    pub fn name(self) -> &'static str {
        match self {
            TypeFamily::Bool => "bool",
            TypeFamily::Integer => "int",
            TypeFamily::Float => "float",
            TypeFamily::Decimal => "decimal",
            TypeFamily::String => "string",
            TypeFamily::Binary => "data",
            TypeFamily::Timestamp => "date",
            TypeFamily::ObjectId => "objectId",
            TypeFamily::Uuid => "uuid",
            TypeFamily::Object => "object",
            TypeFamily::Any => "any",
        }
    }

    /// Families that support `<`, `<=`, `>`, `>=` and range predicates.
    pub fn is_orderable(self) -> bool {
        !matches!(self, TypeFamily::Bool | TypeFamily::Binary | TypeFamily::Object)
    }

    /// Families that support `@min` / `@max`.
    pub fn supports_min_max(self) -> bool {
        matches!(
            self,
            TypeFamily::Integer
                | TypeFamily::Float
                | TypeFamily::Decimal
                | TypeFamily::Timestamp
                | TypeFamily::Any
        )
    }

    /// Families that support `@sum` / `@avg`.
    pub fn supports_sum(self) -> bool {
        matches!(self, TypeFamily::Integer | TypeFamily::Float | TypeFamily::Decimal)
    }

    /// Value a required property of this family holds when not initialized.
    pub fn default_value(self) -> Value {
        match self {
            TypeFamily::Bool => Value::Bool(false),
            TypeFamily::Integer => Value::Int64(0),
            TypeFamily::Float => Value::Double(0.0),
            TypeFamily::Decimal => Value::Decimal(Decimal::ZERO),
            TypeFamily::String => Value::String(String::new()),
            TypeFamily::Binary => Value::Bytes(Vec::new()),
            TypeFamily::Timestamp => Value::Timestamp(DateTime::<Utc>::UNIX_EPOCH),
            TypeFamily::ObjectId => Value::ObjectId(ObjectId::default()),
            TypeFamily::Uuid => Value::Uuid(Uuid::nil()),
            TypeFamily::Object | TypeFamily::Any => Value::Null,
        }
    }

    fn rank(self) -> u8 {
        self as u8 + 1
    }
}

impl fmt::Display for TypeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// ObjectId
// ============================================================================

/// 12-byte identifier (4-byte timestamp, 5-byte random, 3-byte counter layout).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub [u8; 12]);

impl ObjectId {
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Type checking
// ============================================================================

impl Value {
    /// Wrap a concrete value as an any-typed value. Null stays null and an
    /// already any-typed value is not wrapped twice.
    pub fn any(value: impl Into<Value>) -> Value {
        match value.into() {
            Value::Null => Value::Null,
            v @ Value::Any(_) => v,
            v => Value::Any(AnyValue { kind: v.kind(), value: Box::new(v) }),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int8(_) => ValueKind::Int8,
            Value::Int16(_) => ValueKind::Int16,
            Value::Int32(_) => ValueKind::Int32,
            Value::Int64(_) => ValueKind::Int64,
            Value::Float(_) => ValueKind::Float,
            Value::Double(_) => ValueKind::Double,
            Value::String(_) => ValueKind::String,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Timestamp(_) => ValueKind::Timestamp,
            Value::Decimal(_) => ValueKind::Decimal,
            Value::ObjectId(_) => ValueKind::ObjectId,
            Value::Uuid(_) => ValueKind::Uuid,
            Value::Object(_) => ValueKind::Object,
            Value::Any(_) => ValueKind::Any,
        }
    }

    /// Semantic family of the (unwrapped) value; `None` for null.
    pub fn family(&self) -> Option<TypeFamily> {
        Some(match self.unwrap_any() {
            Value::Null => return None,
            Value::Bool(_) => TypeFamily::Bool,
            Value::Int8(_) | Value::Int16(_) | Value::Int32(_) | Value::Int64(_) => TypeFamily::Integer,
            Value::Float(_) | Value::Double(_) => TypeFamily::Float,
            Value::String(_) => TypeFamily::String,
            Value::Bytes(_) => TypeFamily::Binary,
            Value::Timestamp(_) => TypeFamily::Timestamp,
            Value::Decimal(_) => TypeFamily::Decimal,
            Value::ObjectId(_) => TypeFamily::ObjectId,
            Value::Uuid(_) => TypeFamily::Uuid,
            Value::Object(_) => TypeFamily::Object,
            Value::Any(_) => TypeFamily::Any,
        })
    }

    pub fn type_name(&self) -> &'static str {
        self.family().map_or("null", TypeFamily::name)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Strip one any-typed wrapper, if present.
    pub fn unwrap_any(&self) -> &Value {
        match self {
            Value::Any(a) => a.value(),
            v => v,
        }
    }

    /// Integer of any width, widened to i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self.unwrap_any() {
            Value::Int8(i) => Some(i64::from(*i)),
            Value::Int16(i) => Some(i64::from(*i)),
            Value::Int32(i) => Some(i64::from(*i)),
            Value::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// Float or double, widened to f64 (exact for f32).
    pub fn as_f64(&self) -> Option<f64> {
        match self.unwrap_any() {
            Value::Float(f) => Some(f64::from(*f)),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self.unwrap_any() {
            Value::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.unwrap_any() {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.unwrap_any() {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectKey> {
        match self.unwrap_any() {
            Value::Object(k) => Some(*k),
            _ => None,
        }
    }
}

// ============================================================================
// Comparison (storage-native, exact)
// ============================================================================

impl Value {
    /// Exact typed comparison. Returns `None` when either side is null, the
    /// families differ (including any-typed discriminant mismatch), or a float
    /// operand is NaN.
    pub fn compare_exact(&self, other: &Value) -> Option<Ordering> {
        let (a, b) = (self.unwrap_any(), other.unwrap_any());
        if a.family()? != b.family()? {
            return None;
        }
        match (a, b) {
            (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
            (Value::String(x), Value::String(y)) => Some(x.as_bytes().cmp(y.as_bytes())),
            (Value::Bytes(x), Value::Bytes(y)) => Some(x.cmp(y)),
            (Value::Timestamp(x), Value::Timestamp(y)) => Some(x.cmp(y)),
            (Value::Decimal(x), Value::Decimal(y)) => Some(x.cmp(y)),
            (Value::ObjectId(x), Value::ObjectId(y)) => Some(x.cmp(y)),
            (Value::Uuid(x), Value::Uuid(y)) => Some(x.cmp(y)),
            (Value::Object(x), Value::Object(y)) => Some(x.cmp(y)),
            _ => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
            },
        }
    }

    /// Equality under explicit null semantics: null equals only null.
    pub fn exact_eq(&self, other: &Value) -> bool {
        match (self.is_null(), other.is_null()) {
            (true, true) => true,
            (false, false) => self.compare_exact(other) == Some(Ordering::Equal),
            _ => false,
        }
    }

    /// Total order used for set storage order and sorting: nulls first, then
    /// by family, then by exact value (floats by IEEE total order).
    pub fn canonical_cmp(&self, other: &Value) -> Ordering {
        let (a, b) = (self.unwrap_any(), other.unwrap_any());
        match (a.family(), b.family()) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(fa), Some(fb)) if fa != fb => fa.rank().cmp(&fb.rank()),
            (Some(TypeFamily::Float), _) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => Ordering::Equal,
            },
            _ => a.compare_exact(b).unwrap_or(Ordering::Equal),
        }
    }
}

// ============================================================================
// Conversions (From impls)
// ============================================================================

impl From<bool> for Value { fn from(v: bool) -> Self { Value::Bool(v) } }
impl From<i8> for Value { fn from(v: i8) -> Self { Value::Int8(v) } }
impl From<i16> for Value { fn from(v: i16) -> Self { Value::Int16(v) } }
impl From<i32> for Value { fn from(v: i32) -> Self { Value::Int32(v) } }
impl From<i64> for Value { fn from(v: i64) -> Self { Value::Int64(v) } }
impl From<f32> for Value { fn from(v: f32) -> Self { Value::Float(v) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Value::Double(v) } }
impl From<String> for Value { fn from(v: String) -> Self { Value::String(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Value::String(v.to_owned()) } }
impl From<Vec<u8>> for Value { fn from(v: Vec<u8>) -> Self { Value::Bytes(v) } }
impl From<&[u8]> for Value { fn from(v: &[u8]) -> Self { Value::Bytes(v.to_vec()) } }
impl From<DateTime<Utc>> for Value { fn from(v: DateTime<Utc>) -> Self { Value::Timestamp(v) } }
impl From<Decimal> for Value { fn from(v: Decimal) -> Self { Value::Decimal(v) } }
impl From<ObjectId> for Value { fn from(v: ObjectId) -> Self { Value::ObjectId(v) } }
impl From<Uuid> for Value { fn from(v: Uuid) -> Self { Value::Uuid(v) } }
impl From<ObjectKey> for Value { fn from(v: ObjectKey) -> Self { Value::Object(v) } }
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self { v.map(Into::into).unwrap_or(Value::Null) }
}

// ============================================================================
// Display
// ============================================================================

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int8(i) => write!(f, "{i}"),
            Value::Int16(i) => write!(f, "{i}"),
            Value::Int32(i) => write!(f, "{i}"),
            Value::Int64(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "\"{}\"", s.replace('"', "\\\"")),
            Value::Bytes(b) => write!(f, "<bytes[{}]>", b.len()),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::ObjectId(o) => write!(f, "oid({o})"),
            Value::Uuid(u) => write!(f, "uuid({u})"),
            Value::Object(k) => write!(f, "{k}"),
            Value::Any(a) => write!(f, "{}", a.value()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_from() {
        assert_eq!(Value::from("hello"), Value::String("hello".into()));
        assert_eq!(Value::from(42), Value::Int32(42));
        assert_eq!(Value::from(42i64), Value::Int64(42));
        assert_eq!(Value::from(Option::<i64>::None), Value::Null);
    }

    #[test]
    fn test_integer_widths_normalize() {
        assert_eq!(Value::Int8(5).compare_exact(&Value::Int64(5)), Some(Ordering::Equal));
        assert_eq!(Value::Int16(-1).compare_exact(&Value::Int32(3)), Some(Ordering::Less));
        assert!(Value::Float(0.5).exact_eq(&Value::Double(0.5)));
    }

    #[test]
    fn test_null_comparison() {
        assert_eq!(Value::Null.compare_exact(&Value::Null), None);
        assert_eq!(Value::Null.compare_exact(&Value::Int64(1)), None);
        assert!(Value::Null.exact_eq(&Value::Null));
        assert!(!Value::Null.exact_eq(&Value::Int64(0)));
    }

    #[test]
    fn test_any_discriminant_must_agree() {
        let tagged_int = Value::any(1i64);
        assert!(tagged_int.exact_eq(&Value::Int32(1)));
        assert!(!tagged_int.exact_eq(&Value::from("1")));
        assert_eq!(tagged_int.compare_exact(&Value::from("1")), None);
        assert_eq!(Value::any(Value::Null), Value::Null);
        assert_eq!(Value::any(tagged_int.clone()), tagged_int);
    }

    #[test]
    fn test_exact_float_equality() {
        assert!(!Value::Double(0.1 + 0.2).exact_eq(&Value::Double(0.3)));
        assert!(!Value::Double(f64::NAN).exact_eq(&Value::Double(f64::NAN)));
    }

    #[test]
    fn test_decimal_and_string_ordering() {
        let a = Value::Decimal(Decimal::new(10, 1));
        let b = Value::Decimal(Decimal::new(100, 2));
        assert!(a.exact_eq(&b));
        assert_eq!(Value::from("B").compare_exact(&Value::from("a")), Some(Ordering::Less));
    }

    #[test]
    fn test_canonical_order_puts_nulls_first() {
        let mut values = vec![Value::Int64(3), Value::Null, Value::Int8(1), Value::from("x")];
        values.sort_by(Value::canonical_cmp);
        assert_eq!(values, vec![Value::Null, Value::Int8(1), Value::Int64(3), Value::from("x")]);
    }
}
