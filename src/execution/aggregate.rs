//! min / max / sum / average over primitive values.
//!
//! Nulls are skipped by every aggregate. `sum` of nothing is the family's
//! zero; `min`, `max` and `average` of nothing are `None`.

use std::cmp::Ordering;

use rust_decimal::Decimal;

use crate::model::{PropertyKind, TypeFamily, Value};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Min,
    Max,
    Sum,
    Average,
}

impl Aggregate {
    pub fn name(self) -> &'static str {
        match self {
            Aggregate::Min => "min",
            Aggregate::Max => "max",
            Aggregate::Sum => "sum",
            Aggregate::Average => "average",
        }
    }

    /// Reject aggregates the element kind cannot support, e.g. any
    /// aggregate over object links or `sum` over strings.
    pub fn check(self, kind: &PropertyKind) -> Result<()> {
        let family = kind.family;
        let supported = match self {
            Aggregate::Min | Aggregate::Max => family.supports_min_max(),
            Aggregate::Sum | Aggregate::Average => family.supports_sum(),
        };
        if supported && !kind.is_container() {
            Ok(())
        } else {
            Err(Error::UnsupportedAggregate { aggregate: self.name(), element: kind.to_string() })
        }
    }
}

pub fn min<'a>(values: impl IntoIterator<Item = &'a Value>) -> Option<Value> {
    extreme(values, Ordering::Less)
}

pub fn max<'a>(values: impl IntoIterator<Item = &'a Value>) -> Option<Value> {
    extreme(values, Ordering::Greater)
}

fn extreme<'a>(values: impl IntoIterator<Item = &'a Value>, keep: Ordering) -> Option<Value> {
    let mut best: Option<&Value> = None;
    for value in values.into_iter().filter(|v| !v.is_null()) {
        match best {
            Some(current) if value.canonical_cmp(current) != keep => {}
            _ => best = Some(value),
        }
    }
    best.map(|v| v.unwrap_any().clone())
}

/// Sum in the widest representation of the family: `Int64`, `Double` or
/// `Decimal`. Integer and decimal overflow are errors, not wraps.
pub fn sum<'a>(values: impl IntoIterator<Item = &'a Value>, family: TypeFamily) -> Result<Value> {
    Ok(accumulate(values, family)?.0)
}

/// Arithmetic mean; `Double` for integers and floats, `Decimal` for decimals.
pub fn average<'a>(values: impl IntoIterator<Item = &'a Value>, family: TypeFamily) -> Result<Option<Value>> {
    let (total, count) = accumulate(values, family)?;
    if count == 0 {
        return Ok(None);
    }
    let mean = match total {
        Value::Decimal(d) => Value::Decimal(
            d.checked_div(Decimal::from(count))
                .ok_or_else(|| Error::ExecutionError("decimal average overflow".into()))?,
        ),
        Value::Int64(i) => Value::Double(i as f64 / count as f64),
        Value::Double(d) => Value::Double(d / count as f64),
        other => {
            return Err(Error::UnsupportedAggregate { aggregate: "average", element: other.type_name().into() });
        }
    };
    Ok(Some(mean))
}

fn accumulate<'a>(values: impl IntoIterator<Item = &'a Value>, family: TypeFamily) -> Result<(Value, usize)> {
    let mut count = 0usize;
    let total = match family {
        TypeFamily::Integer => {
            let mut total = 0i64;
            for v in values.into_iter().filter_map(Value::as_i64) {
                total = total
                    .checked_add(v)
                    .ok_or_else(|| Error::ExecutionError("integer sum overflow".into()))?;
                count += 1;
            }
            Value::Int64(total)
        }
        TypeFamily::Float => {
            let mut total = 0f64;
            for v in values.into_iter().filter_map(Value::as_f64) {
                total += v;
                count += 1;
            }
            Value::Double(total)
        }
        TypeFamily::Decimal => {
            let mut total = Decimal::ZERO;
            for v in values.into_iter().filter_map(Value::as_decimal) {
                total = total
                    .checked_add(v)
                    .ok_or_else(|| Error::ExecutionError("decimal sum overflow".into()))?;
                count += 1;
            }
            Value::Decimal(total)
        }
        other => {
            return Err(Error::UnsupportedAggregate { aggregate: "sum", element: other.name().into() });
        }
    };
    Ok((total, count))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|&i| Value::Int64(i)).collect()
    }

    #[test]
    fn test_min_max_skip_nulls() {
        let values = vec![Value::Null, Value::Int32(4), Value::Int8(-2), Value::Int64(9)];
        assert_eq!(min(&values), Some(Value::Int8(-2)));
        assert_eq!(max(&values), Some(Value::Int64(9)));
        assert_eq!(min(&[Value::Null]), None);
    }

    #[test]
    fn test_min_max_unwrap_any() {
        let values = vec![Value::any(3), Value::any(1)];
        assert_eq!(min(&values), Some(Value::Int32(1)));
    }

    #[test]
    fn test_integer_sum_and_average() {
        let values = ints(&[1, 2, 4]);
        assert_eq!(sum(&values, TypeFamily::Integer).unwrap(), Value::Int64(7));
        assert_eq!(average(&values, TypeFamily::Integer).unwrap(), Some(Value::Double(7.0 / 3.0)));
        assert_eq!(sum(&Vec::<Value>::new(), TypeFamily::Integer).unwrap(), Value::Int64(0));
        assert_eq!(average(&Vec::<Value>::new(), TypeFamily::Float).unwrap(), None);
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        let values = ints(&[i64::MAX, 1]);
        assert!(matches!(sum(&values, TypeFamily::Integer), Err(Error::ExecutionError(_))));
    }

    #[test]
    fn test_decimal_stays_exact() {
        let values = vec![Value::Decimal(Decimal::new(1, 1)), Value::Decimal(Decimal::new(2, 1))];
        assert_eq!(sum(&values, TypeFamily::Decimal).unwrap(), Value::Decimal(Decimal::new(3, 1)));
        assert_eq!(average(&values, TypeFamily::Decimal).unwrap(), Some(Value::Decimal(Decimal::new(15, 2))));
    }

    #[test]
    fn test_check_rejects_objects_and_strings() {
        let links = PropertyKind::link("Dog");
        assert!(matches!(Aggregate::Min.check(&links), Err(Error::UnsupportedAggregate { .. })));
        let text = PropertyKind::scalar(TypeFamily::String);
        assert!(Aggregate::Max.check(&text).is_err());
        assert!(Aggregate::Sum.check(&PropertyKind::scalar(TypeFamily::Float)).is_ok());
    }
}
