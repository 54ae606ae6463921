use crate::row::{Row, UnversionedValue};
use crate::value::{Value, ValueType};
use crate::Error;
use std::cmp::Ordering;

/// Evaluate the ordering of two values.
///
/// Values of distinct types order by type rank, matching the storage
/// engine's comparator. `Any` payloads have no defined ordering and
/// surface an error, which callers translate into a transaction failure.
pub fn compare_values(lhs: &Value, rhs: &Value) -> Result<Ordering, Error> {
    if lhs.value_type() == ValueType::Any || rhs.value_type() == ValueType::Any {
        return Err(Error::Incomparable(ValueType::Any));
    }

    let by_type = lhs.value_type().cmp(&rhs.value_type());
    if by_type != Ordering::Equal {
        return Ok(by_type);
    }

    Ok(match (lhs, rhs) {
        (Value::Min, Value::Min) => Ordering::Equal,
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Max, Value::Max) => Ordering::Equal,
        (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
        (Value::Uint64(a), Value::Uint64(b)) => a.cmp(b),
        (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
        (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => unreachable!("types are equal and Any is rejected above"),
    })
}

/// Compare the leading `key_column_count` values of two rows.
///
/// A row exhausting its values first compares less when the shared prefix
/// is equal, so a bare prefix sorts immediately before its extensions.
pub fn compare_rows(lhs: &Row, rhs: &Row, key_column_count: usize) -> Result<Ordering, Error> {
    let lhs_key = lhs.key_prefix(key_column_count);
    let rhs_key = rhs.key_prefix(key_column_count);

    for (l, r) in lhs_key.iter().zip(rhs_key.iter()) {
        match compare_values(&l.value, &r.value)? {
            Ordering::Equal => continue,
            other => return Ok(other),
        }
    }
    Ok(lhs_key.len().cmp(&rhs_key.len()))
}

/// The least key strictly greater than `key`: `key` extended with a `Min`
/// sentinel.
pub fn key_successor(key: &Row) -> Row {
    let mut values: Vec<_> = key.values().to_vec();
    values.push(UnversionedValue::new(values.len() as u16, Value::Min));
    Row::new(values)
}

/// The empty key: lower bound of every sorted key space, and the pivot of
/// a sorted table's first tablet.
pub fn min_key() -> Row {
    Row::default()
}

/// A key above every real key.
pub fn max_key() -> Row {
    Row::new(vec![UnversionedValue::new(0, Value::Max)])
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::row;

    #[test]
    fn orders_within_type() {
        let a = row![(0, 1i64), (1, "a")];
        let b = row![(0, 1i64), (1, "b")];
        assert_eq!(compare_rows(&a, &b, 2).unwrap(), Ordering::Less);
        assert_eq!(compare_rows(&a, &a, 2).unwrap(), Ordering::Equal);
    }

    #[test]
    fn orders_across_types_by_rank() {
        // Null < Int64 < Uint64 < Double < Boolean < String.
        let null = Value::Null;
        let int = Value::Int64(i64::MAX);
        let string = Value::String(vec![]);
        assert_eq!(compare_values(&null, &int).unwrap(), Ordering::Less);
        assert_eq!(compare_values(&int, &string).unwrap(), Ordering::Less);
    }

    #[test]
    fn sentinels_cap_the_key_space() {
        let key = row![(0, 42i64)];
        assert_eq!(
            compare_rows(&min_key(), &key, 1).unwrap(),
            Ordering::Less,
            "empty key is below everything"
        );
        assert_eq!(compare_rows(&key, &max_key(), 1).unwrap(), Ordering::Less);
    }

    #[test]
    fn successor_is_strictly_greater_but_tight() {
        let key = row![(0, 42i64)];
        let succ = key_successor(&key);
        assert_eq!(compare_rows(&key, &succ, 2).unwrap(), Ordering::Less);

        // Any real extension of `key` sorts at or above the successor.
        let extended = row![(0, 42i64), (1, Value::Null)];
        assert_ne!(compare_rows(&succ, &extended, 2).unwrap(), Ordering::Greater);
    }

    #[test]
    fn any_values_do_not_compare() {
        let a = Value::Any(b"{}".to_vec());
        assert!(compare_values(&a, &Value::Int64(1)).is_err());
    }
}
