//! Loose value semantics shared by filtering, sorting and validation.
//!
//! Stored records are plain JSON, and the same logical value can show up as
//! `2`, `2.0` or `"2"` depending on who wrote it (a form post, a SQL row, a
//! hand-edited document). These helpers compare values the way an editor
//! would read them rather than the way `serde_json` types them.

use serde_json::Value;
use std::cmp::Ordering;

/// Render a value as the text an editor would see.
///
/// Strings are returned without quotes, null becomes the empty string and
/// arrays/objects fall back to their compact JSON form.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => {
            if *b {
                "1".to_string()
            } else {
                "0".to_string()
            }
        }
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Interpret a value as a number, accepting numeric strings.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Interpret a value as an integer, accepting integral numeric strings.
pub fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Null, empty string, empty array and empty object are all "empty".
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Finite numeric reading of a value. `"NaN"` and `"inf"` stay text.
pub fn as_number(value: &Value) -> Option<f64> {
    as_f64(value).filter(|f| f.is_finite())
}

/// Equality after normalising numbers and numeric strings.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x == y;
    }
    value_to_string(a) == value_to_string(b)
}

/// Coarse ordering class of a value: null, then numbers, then text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SortRank {
    Null = 0,
    Number = 1,
    Text = 2,
}

pub fn sort_rank(value: &Value) -> SortRank {
    if value.is_null() {
        SortRank::Null
    } else if as_number(value).is_some() {
        SortRank::Number
    } else {
        SortRank::Text
    }
}

/// Total order used by sort and range filters.
///
/// Null sorts first, then every numeric value (numeric strings included) in
/// numeric order, then everything else by its string rendering.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    sort_rank(a)
        .cmp(&sort_rank(b))
        .then_with(|| match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => value_to_string(a).cmp(&value_to_string(b)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn numeric_strings_equal_numbers() {
        assert!(loose_eq(&json!(2), &json!("2")));
        assert!(loose_eq(&json!("2.0"), &json!(2)));
        assert!(!loose_eq(&json!("draft"), &json!(1)));
    }

    #[test]
    fn compare_is_numeric_when_possible() {
        assert_eq!(compare(&json!("10"), &json!(9)), Ordering::Greater);
        assert_eq!(compare(&json!("apple"), &json!("banana")), Ordering::Less);
        assert_eq!(compare(&Value::Null, &json!(0)), Ordering::Less);
    }

    #[test]
    fn numbers_sort_before_text() {
        assert_eq!(compare(&json!("2"), &json!("10")), Ordering::Less);
        assert_eq!(compare(&json!("10"), &json!("1a")), Ordering::Less);
        assert_eq!(compare(&json!("1a"), &json!("2")), Ordering::Greater);
        assert_eq!(sort_rank(&json!("NaN")), SortRank::Text);
        assert_ne!(compare(&json!("NaN"), &json!(1)), Ordering::Equal);
        assert!(loose_eq(&json!("NaN"), &json!("NaN")));
    }

    #[test]
    fn mixed_values_sort_without_panicking() {
        let mut values: Vec<Value> = (0..40)
            .map(|i| match i % 5 {
                0 => json!(i),
                1 => json!(format!("{}a", i)),
                2 => json!("NaN"),
                3 => json!(format!("x.{}", i)),
                _ => json!(format!("{}", 40 - i)),
            })
            .collect();
        values.push(Value::Null);
        values.sort_by(compare);
        assert_eq!(values[0], Value::Null);
        assert_eq!(sort_rank(&values[1]), SortRank::Number);
        assert_eq!(sort_rank(values.last().unwrap()), SortRank::Text);
    }

    fn mixed_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<i32>().prop_map(|n| json!(n)),
            (-1000.0f64..1000.0).prop_map(|f| json!(f)),
            "-?[0-9]{1,3}(\\.[0-9])?".prop_map(Value::String),
            "[0-9]{0,2}[a-z.]{1,3}".prop_map(Value::String),
            prop_oneof![Just("NaN"), Just("inf"), Just("")].prop_map(|s| json!(s)),
            any::<bool>().prop_map(|b| json!(b)),
        ]
    }

    proptest! {
        #[test]
        fn compare_is_antisymmetric(a in mixed_value(), b in mixed_value()) {
            prop_assert_eq!(compare(&a, &b), compare(&b, &a).reverse());
        }

        #[test]
        fn compare_is_transitive(a in mixed_value(), b in mixed_value(), c in mixed_value()) {
            if compare(&a, &b) != Ordering::Greater && compare(&b, &c) != Ordering::Greater {
                prop_assert_ne!(compare(&a, &c), Ordering::Greater);
            }
        }
    }

    #[test]
    fn emptiness() {
        assert!(is_empty(&json!("  ")));
        assert!(is_empty(&json!([])));
        assert!(!is_empty(&json!(0)));
        assert!(!is_empty(&json!(false)));
    }

    #[test]
    fn integers_from_strings() {
        assert_eq!(as_i64(&json!("42")), Some(42));
        assert_eq!(as_i64(&json!(3.0)), Some(3));
        assert_eq!(as_i64(&json!(3.5)), None);
    }
}
