// ABOUTME: Tagged cell value shared by snapshots, comparison and statement binding
// ABOUTME: Handles JSON conversion, null semantics, canonical text and SQL literal preview

use serde_json::Value as JsonValue;
use std::fmt;

/// A single cell of a table snapshot.
///
/// Every snapshot cell is one of four shapes. Comparison and rendering match
/// on the variant rather than inspecting runtime types, so both stay
/// exhaustive.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    /// Build a numeric value. NaN is the "missing number" sentinel and becomes `Null`.
    pub fn number(n: f64) -> Self {
        if n.is_nan() {
            Value::Null
        } else {
            Value::Number(n)
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Returns true for `Null` and for a NaN number that bypassed [`Value::number`].
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Number(n) => n.is_nan(),
            _ => false,
        }
    }

    /// Equality between two non-null values of the same shape.
    ///
    /// Values of different variants are never equal: a number stored as text
    /// upstream and as a number in the store must be coerced before comparison.
    pub fn value_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            _ => false,
        }
    }

    /// Convert a JSON value from an upstream payload.
    ///
    /// Arrays and objects have no column shape of their own and are kept as
    /// their compact JSON text.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => n.as_f64().map(Value::number).unwrap_or(Value::Null),
            JsonValue::String(s) => Value::Text(s.clone()),
            JsonValue::Array(_) | JsonValue::Object(_) => Value::Text(value.to_string()),
        }
    }

    /// Canonical textual form used to make type-ambiguous columns comparable.
    ///
    /// Booleans use the `True`/`False` spelling the store holds for them.
    pub fn to_canonical_text(&self) -> Value {
        match self {
            Value::Null => Value::Null,
            Value::Bool(b) => Value::Text(bool_text(*b).to_string()),
            Value::Number(n) if n.is_nan() => Value::Null,
            Value::Number(n) => Value::Text(n.to_string()),
            Value::Text(s) => Value::Text(s.clone()),
        }
    }

    /// Render the value as an inline SQL literal.
    ///
    /// Only used to preview statements (dry runs, debug logs). Executed
    /// statements always bind values as parameters.
    pub fn to_sql_literal(&self) -> String {
        match self {
            v if v.is_null() => "NULL".to_string(),
            Value::Text(s) => crate::utils::quote_literal(s),
            Value::Bool(b) => crate::utils::quote_literal(bool_text(*b)),
            Value::Number(n) => n.to_string(),
            Value::Null => "NULL".to_string(),
        }
    }

    /// Text form of the value when it is used as a row identifier.
    pub fn as_identifier(&self) -> Option<String> {
        match self {
            v if v.is_null() => None,
            Value::Text(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(bool_text(*b).to_string()),
            Value::Null => None,
        }
    }
}

pub(crate) fn bool_text(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql_literal())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nan_is_null() {
        assert_eq!(Value::number(f64::NAN), Value::Null);
        assert!(Value::Number(f64::NAN).is_null());
        assert!(!Value::Number(0.0).is_null());
    }

    #[test]
    fn test_value_eq_requires_same_variant() {
        assert!(Value::from(1i64).value_eq(&Value::Number(1.0)));
        assert!(!Value::from(1i64).value_eq(&Value::text("1")));
        assert!(!Value::Bool(true).value_eq(&Value::text("True")));
    }

    #[test]
    fn test_from_json() {
        assert_eq!(Value::from_json(&json!(null)), Value::Null);
        assert_eq!(Value::from_json(&json!(true)), Value::Bool(true));
        assert_eq!(Value::from_json(&json!(42)), Value::Number(42.0));
        assert_eq!(Value::from_json(&json!("BTC")), Value::text("BTC"));
        assert_eq!(
            Value::from_json(&json!({"a": 1})),
            Value::text(r#"{"a":1}"#)
        );
    }

    #[test]
    fn test_canonical_text() {
        assert_eq!(Value::Bool(true).to_canonical_text(), Value::text("True"));
        assert_eq!(Value::Bool(false).to_canonical_text(), Value::text("False"));
        assert_eq!(Value::Number(3.0).to_canonical_text(), Value::text("3"));
        assert_eq!(Value::Null.to_canonical_text(), Value::Null);
    }

    #[test]
    fn test_sql_literal_rendering() {
        assert_eq!(Value::Null.to_sql_literal(), "NULL");
        assert_eq!(Value::text("it's").to_sql_literal(), "'it''s'");
        assert_eq!(Value::Bool(true).to_sql_literal(), "'True'");
        assert_eq!(Value::Number(2.5).to_sql_literal(), "2.5");
        assert_eq!(Value::Number(7.0).to_sql_literal(), "7");
    }

    #[test]
    fn test_as_identifier() {
        assert_eq!(Value::text("cr_BTC").as_identifier(), Some("cr_BTC".into()));
        assert_eq!(Value::Number(12.0).as_identifier(), Some("12".into()));
        assert_eq!(Value::Null.as_identifier(), None);
    }
}
