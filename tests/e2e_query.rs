//! End-to-end tests for predicate construction, compilation and execution.
//!
//! Each test builds an expression from typed property references, checks the
//! canonical filter text and arguments, then runs it against a one-row
//! fixture in the in-memory engine.

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rust_decimal::Decimal;
use tessera::{
    Case, ClassSchema, Database, Error, Expr, ObjectId, ObjectKey, PropertyKind, PropertyRef, Schema, Session,
    TypeFamily, Value, compile,
};
use uuid::Uuid;

fn schema() -> Schema {
    Schema::new()
        .with_class(
            ClassSchema::new("AllTypes")
                .with("boolCol", PropertyKind::scalar(TypeFamily::Bool))
                .with("intCol", PropertyKind::scalar(TypeFamily::Integer))
                .with("doubleCol", PropertyKind::scalar(TypeFamily::Float))
                .with("stringCol", PropertyKind::scalar(TypeFamily::String))
                .with("binaryCol", PropertyKind::scalar(TypeFamily::Binary))
                .with("dateCol", PropertyKind::scalar(TypeFamily::Timestamp))
                .with("decimalCol", PropertyKind::scalar(TypeFamily::Decimal))
                .with("objectIdCol", PropertyKind::scalar(TypeFamily::ObjectId))
                .with("uuidCol", PropertyKind::scalar(TypeFamily::Uuid))
                .with("optIntCol", PropertyKind::optional(TypeFamily::Integer))
                .with("anyCol", PropertyKind::scalar(TypeFamily::Any))
                .with("objectCol", PropertyKind::link("Linked"))
                .with("arrayInt", PropertyKind::list(TypeFamily::Integer))
                .with("arrayOptInt", PropertyKind::list(TypeFamily::Integer).nullable())
                .with("setString", PropertyKind::set(TypeFamily::String)),
        )
        .with_class(ClassSchema::new("Linked").with("value", PropertyKind::scalar(TypeFamily::Integer)))
}

/// A session holding exactly one `AllTypes` row with the given fields.
fn fixture<'a>(fields: impl IntoIterator<Item = (&'a str, Value)>) -> (Session, ObjectKey) {
    let db = Database::open_memory(schema()).unwrap();
    let session = db.session();
    let key = session.write(|s| s.create("AllTypes", fields)).unwrap();
    (session, key)
}

fn property(session: &Session, name: &str) -> PropertyRef {
    session.property("AllTypes", name).unwrap()
}

fn count(session: &Session, expr: &Expr) -> usize {
    session.objects("AllTypes").unwrap().filter(expr).count().unwrap()
}

fn append_all(session: &Session, key: ObjectKey, property: &str, values: impl IntoIterator<Item = Value>) {
    let list = session.collection(key, property).unwrap();
    session
        .write(|_| {
            for value in values {
                list.append(value)?;
            }
            Ok(())
        })
        .unwrap();
}

// ============================================================================
// 1. Equality over every scalar family
// ============================================================================

#[test]
fn test_equality_for_every_scalar_type() {
    let date = Utc.timestamp_opt(1_000_000, 0).unwrap();
    let cases: Vec<(&str, Value, Value)> = vec![
        ("boolCol", Value::Bool(true), Value::Bool(false)),
        ("intCol", Value::Int64(6), Value::Int64(7)),
        ("doubleCol", Value::Double(2.5), Value::Double(3.5)),
        ("stringCol", Value::from("foo"), Value::from("bar")),
        ("binaryCol", Value::Bytes(vec![1, 2]), Value::Bytes(vec![3])),
        ("dateCol", Value::Timestamp(date), Value::Timestamp(Utc.timestamp_opt(5, 0).unwrap())),
        ("decimalCol", Value::Decimal(Decimal::new(12345, 2)), Value::Decimal(Decimal::new(1, 0))),
        ("objectIdCol", Value::ObjectId(ObjectId::from_bytes([1; 12])), Value::ObjectId(ObjectId::from_bytes([2; 12]))),
        ("uuidCol", Value::Uuid(Uuid::from_u128(1)), Value::Uuid(Uuid::from_u128(2))),
    ];
    let (session, _) = fixture(cases.iter().map(|(name, stored, _)| (*name, stored.clone())));

    for (name, stored, other) in &cases {
        let hit = property(&session, name).equals(stored.clone()).unwrap();
        let compiled = compile(&hit);
        assert_eq!(compiled.format(), format!("{name} == %@"));
        assert_eq!(compiled.arguments(), std::slice::from_ref(stored));
        assert_eq!(count(&session, &hit), 1, "{name} == stored");

        let miss = property(&session, name).equals(other.clone()).unwrap();
        assert_eq!(count(&session, &miss), 0, "{name} == other");
        assert_eq!(count(&session, &property(&session, name).not_equals(other.clone()).unwrap()), 1);
    }
}

#[test]
fn test_integer_widths_compare_equal() {
    let (session, _) = fixture([("intCol", Value::Int64(6))]);
    let int_col = property(&session, "intCol");
    assert_eq!(count(&session, &int_col.equals(6i8).unwrap()), 1);
    assert_eq!(count(&session, &int_col.equals(6i32).unwrap()), 1);
    assert_eq!(count(&session, &int_col.greater_than(5i16).unwrap()), 1);
}

// ============================================================================
// 2. Null handling
// ============================================================================

#[test]
fn test_nil_against_non_null_row() {
    let (session, _) = fixture([("optIntCol", Value::Int64(5))]);
    let opt = property(&session, "optIntCol");

    let is_nil = opt.is_null().unwrap();
    let compiled = compile(&is_nil);
    assert_eq!(compiled.format(), "optIntCol == %@");
    assert_eq!(compiled.arguments(), &[Value::Null]);
    assert_eq!(count(&session, &is_nil), 0);
    assert_eq!(count(&session, &opt.is_not_null().unwrap()), 1);
}

#[test]
fn test_nil_never_satisfies_ordering() {
    let (session, _) = fixture([]);
    let opt = property(&session, "optIntCol");
    assert_eq!(count(&session, &opt.is_null().unwrap()), 1);
    assert_eq!(count(&session, &opt.less_than(100).unwrap()), 0);
    assert_eq!(count(&session, &opt.greater_or_equal(-100).unwrap()), 0);
    assert!(matches!(opt.less_than(Value::Null), Err(Error::TypeMismatch { .. })));
}

#[test]
fn test_nil_on_required_property_is_rejected() {
    let (session, _) = fixture([]);
    assert!(matches!(property(&session, "intCol").is_null(), Err(Error::TypeMismatch { .. })));
}

// ============================================================================
// 3. Ranges
// ============================================================================

#[test]
fn test_half_open_and_closed_ranges() {
    let (session, _) = fixture([("intCol", Value::Int64(6))]);
    let int_col = property(&session, "intCol");

    let half_open = int_col.contains_range(5..6).unwrap();
    assert_eq!(compile(&half_open).format(), "intCol >= %@ && intCol < %@");
    assert_eq!(compile(&half_open).arguments(), &[Value::Int32(5), Value::Int32(6)]);
    assert_eq!(count(&session, &half_open), 0);

    let closed = int_col.contains_range(5..=6).unwrap();
    assert_eq!(compile(&closed).format(), "intCol BETWEEN {%@, %@}");
    assert_eq!(count(&session, &closed), 1);
    assert_eq!(compile(&int_col.between(5, 6).unwrap()), compile(&closed));
}

#[test]
fn test_range_rejects_mixed_families() {
    let (session, _) = fixture([]);
    let double_col = property(&session, "doubleCol");
    assert!(matches!(double_col.contains_range(Value::Double(1.0)..Value::from("z")), Err(Error::TypeMismatch { .. })));
    assert!(matches!(property(&session, "boolCol").contains_range(false..=true), Err(Error::TypeMismatch { .. })));
}

// ============================================================================
// 4. Container membership and aggregate ranges
// ============================================================================

#[test]
fn test_element_membership() {
    let (session, key) = fixture([]);
    append_all(&session, key, "arrayInt", [Value::Int64(1), Value::Int64(2)]);
    let array = property(&session, "arrayInt");

    let has_one = array.contains_element(1).unwrap();
    assert_eq!(compile(&has_one).format(), "%@ IN arrayInt");
    assert_eq!(compile(&has_one).arguments(), &[Value::Int32(1)]);
    assert_eq!(count(&session, &has_one), 1);
    assert_eq!(count(&session, &array.contains_element(3).unwrap()), 0);
}

#[test]
fn test_null_membership_requires_explicit_null_element() {
    let (session, key) = fixture([]);
    append_all(&session, key, "arrayOptInt", [Value::Int64(1), Value::Int64(2)]);
    let array = property(&session, "arrayOptInt");
    let has_nil = array.contains_element(Value::Null).unwrap();
    assert_eq!(count(&session, &has_nil), 0);

    append_all(&session, key, "arrayOptInt", [Value::Null]);
    assert_eq!(count(&session, &has_nil), 1);
}

#[test]
fn test_null_membership_on_non_optional_container_is_false() {
    let (session, key) = fixture([]);
    append_all(&session, key, "arrayInt", [Value::Int64(1)]);
    let array = property(&session, "arrayInt");
    let has_nil = array.contains_element(Value::Null).unwrap();
    assert_eq!(compile(&has_nil).format(), "%@ IN arrayInt");
    assert_eq!(compile(&has_nil).arguments(), &[Value::Null]);
    assert_eq!(count(&session, &has_nil), 0);

    let numbers = session.list(key, "arrayInt").unwrap();
    assert!(!numbers.contains(&Value::Null).unwrap());
    assert!(matches!(array.contains_element("1"), Err(Error::TypeMismatch { .. })));
}

#[test]
fn test_aggregate_range_over_container() {
    let (session, key) = fixture([]);
    let array = property(&session, "arrayInt");
    let closed = array.contains_all_within(1..=2).unwrap();
    assert_eq!(compile(&closed).format(), "arrayInt.@min >= %@ && arrayInt.@max <= %@");
    // empty container: @min/@max are null
    assert_eq!(count(&session, &closed), 0);

    append_all(&session, key, "arrayInt", [Value::Int64(1), Value::Int64(2)]);
    assert_eq!(count(&session, &closed), 1);

    let half_open = array.contains_all_within(1..2).unwrap();
    assert_eq!(compile(&half_open).format(), "arrayInt.@min >= %@ && arrayInt.@max < %@");
    assert_eq!(count(&session, &half_open), 0);
}

#[test]
fn test_aggregate_range_rejects_non_numeric_elements() {
    let (session, _) = fixture([]);
    assert!(matches!(
        property(&session, "setString").contains_all_within("a"..="z"),
        Err(Error::UnsupportedAggregate { .. })
    ));
}

// ============================================================================
// 5. Any-typed discriminants
// ============================================================================

#[test]
fn test_any_value_matches_only_same_discriminant() {
    let (session, _) = fixture([("anyCol", Value::any(1i64))]);
    let any = property(&session, "anyCol");
    assert_eq!(count(&session, &any.equals(1).unwrap()), 1);
    assert_eq!(count(&session, &any.equals("1").unwrap()), 0);
    assert_eq!(count(&session, &any.equals(1.0).unwrap()), 0);
    assert_eq!(count(&session, &any.greater_than(0).unwrap()), 1);
    assert_eq!(count(&session, &any.greater_than("0").unwrap()), 0);
}

// ============================================================================
// 6. Text, links and composition
// ============================================================================

#[test]
fn test_compound_predicate_text_and_result() {
    let (session, _) = fixture([("stringCol", Value::from("Foobar")), ("intCol", Value::Int64(9))]);
    let string_col = property(&session, "stringCol");
    let int_col = property(&session, "intCol");

    let expr = string_col.begins_with("foo", Case::Insensitive).unwrap()
        & (int_col.contains_range(5..7).unwrap() | int_col.equals(9).unwrap());
    let compiled = compile(&expr);
    assert_eq!(
        compiled.format(),
        "stringCol BEGINSWITH[c] %@ && ((intCol >= %@ && intCol < %@) || intCol == %@)"
    );
    assert_eq!(compiled.arguments().len(), 4);
    assert_eq!(count(&session, &expr), 1);

    let sensitive = string_col.begins_with("foo", Case::Sensitive).unwrap();
    assert_eq!(compile(&sensitive).format(), "stringCol BEGINSWITH %@");
    assert_eq!(count(&session, &sensitive), 0);
    assert_eq!(count(&session, &string_col.ends_with("BAR", Case::Insensitive).unwrap()), 1);
    assert_eq!(count(&session, &string_col.contains_text("oba", Case::Sensitive).unwrap()), 1);
}

#[test]
fn test_predicate_through_link() {
    let db = Database::open_memory(schema()).unwrap();
    let session = db.session();
    session
        .write(|s| {
            let linked = s.create("Linked", [("value", Value::Int64(3))])?;
            s.create("AllTypes", [("objectCol", Value::Object(linked))])?;
            s.create("AllTypes", [])?;
            Ok(())
        })
        .unwrap();
    let value = session.path("AllTypes", &["objectCol", "value"]).unwrap();
    let expr = value.equals(3).unwrap();
    assert_eq!(compile(&expr).format(), "objectCol.value == %@");
    assert_eq!(count(&session, &expr), 1);
    // unset link reads as null
    assert_eq!(count(&session, &value.is_null().unwrap()), 1);
}

#[test]
fn test_empty_combinations() {
    assert!(Expr::all(Vec::<Expr>::new()).is_none());
    assert!(Expr::any(Vec::<Expr>::new()).is_none());
}

#[test]
fn test_display_substitutes_arguments() {
    let (session, _) = fixture([]);
    let expr = property(&session, "stringCol").equals("x").unwrap() & property(&session, "intCol").less_than(3).unwrap();
    assert_eq!(compile(&expr).to_string(), "stringCol == \"x\" && intCol < 3");
}

// ============================================================================
// 7. Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_compile_is_deterministic(lo in -1000i64..1000, span in 0i64..1000, inclusive: bool) {
        let db = Database::open_memory(schema()).unwrap();
        let session = db.session();
        let int_col = property(&session, "intCol");
        let range = if inclusive { int_col.contains_range(lo..=lo + span) } else { int_col.contains_range(lo..lo + span) };
        let expr = range.unwrap();
        let first = compile(&expr);
        let second = compile(&expr);
        prop_assert_eq!(first.format(), second.format());
        prop_assert_eq!(first.arguments(), second.arguments());
        prop_assert_eq!(first.arguments(), &[Value::Int64(lo), Value::Int64(lo + span)]);
    }

    #[test]
    fn prop_range_membership_matches_bounds(stored in -50i64..50, lo in -50i64..50, span in 0i64..20, inclusive: bool) {
        let (session, _) = fixture([("intCol", Value::Int64(stored))]);
        let int_col = property(&session, "intCol");
        let hi = lo + span;
        let expr = if inclusive { int_col.contains_range(lo..=hi) } else { int_col.contains_range(lo..hi) }.unwrap();
        let expected = stored >= lo && if inclusive { stored <= hi } else { stored < hi };
        prop_assert_eq!(count(&session, &expr), usize::from(expected));
    }
}
