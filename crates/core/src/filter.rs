//! Typed record predicates.
//!
//! A [`Filter`] renders to the backend filter grammar for server-side queries
//! and subscriptions, and evaluates locally against incoming JSON records so
//! change events can be checked against the same predicate the snapshot used.

use core::fmt;

use serde_json::Value;

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Str(String),
    Bool(bool),
    Null,
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// A boolean expression over record fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq(String, FilterValue),
    Ne(String, FilterValue),
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::Ne(field.into(), value.into())
    }

    pub fn and(self, other: Filter) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Filter) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    /// Render in the backend filter grammar, e.g. `status = "processed"`.
    pub fn to_query(&self) -> String {
        self.to_string()
    }

    /// Evaluate against a JSON record.
    ///
    /// Missing fields and `null` compare equal to `""`, `false` and `null`,
    /// mirroring how the backend treats unset columns.
    pub fn matches(&self, record: &Value) -> bool {
        match self {
            Filter::Eq(field, value) => field_equals(record.get(field), value),
            Filter::Ne(field, value) => !field_equals(record.get(field), value),
            Filter::And(a, b) => a.matches(record) && b.matches(record),
            Filter::Or(a, b) => a.matches(record) || b.matches(record),
        }
    }
}

fn field_equals(field: Option<&Value>, expected: &FilterValue) -> bool {
    let field = field.unwrap_or(&Value::Null);
    match expected {
        FilterValue::Str(s) => match field {
            Value::String(actual) => actual == s,
            Value::Null => s.is_empty(),
            Value::Number(n) => n.to_string() == *s,
            Value::Bool(b) => b.to_string() == *s,
            _ => false,
        },
        FilterValue::Bool(b) => match field {
            Value::Bool(actual) => actual == b,
            Value::Null => !b,
            _ => false,
        },
        FilterValue::Null => match field {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Bool(b) => !b,
            _ => false,
        },
    }
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &FilterValue) -> fmt::Result {
    match value {
        FilterValue::Str(s) => {
            f.write_str("\"")?;
            for c in s.chars() {
                match c {
                    '"' => f.write_str("\\\"")?,
                    '\\' => f.write_str("\\\\")?,
                    c => write!(f, "{c}")?,
                }
            }
            f.write_str("\"")
        }
        FilterValue::Bool(b) => write!(f, "{b}"),
        FilterValue::Null => f.write_str("null"),
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Eq(field, value) => {
                write!(f, "{field} = ")?;
                write_value(f, value)
            }
            Filter::Ne(field, value) => {
                write!(f, "{field} != ")?;
                write_value(f, value)
            }
            Filter::And(a, b) => write!(f, "({a} && {b})"),
            Filter::Or(a, b) => write!(f, "({a} || {b})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_backend_grammar() {
        assert_eq!(Filter::eq("status", "processed").to_query(), r#"status = "processed""#);
        assert_eq!(Filter::ne("owner", "abc").to_query(), r#"owner != "abc""#);
        assert_eq!(
            Filter::eq("user", "u1").and(Filter::eq("job", "j1")).to_query(),
            r#"(user = "u1" && job = "j1")"#
        );
        assert_eq!(Filter::eq("isRemote", true).to_query(), "isRemote = true");
    }

    #[test]
    fn escapes_quotes_in_values() {
        assert_eq!(
            Filter::eq("title", r#"a"b\c"#).to_query(),
            r#"title = "a\"b\\c""#
        );
    }

    #[test]
    fn local_evaluation_matches_rendered_semantics() {
        let processed = json!({"id": "j1", "status": "processed", "owner": "u1"});
        let pending = json!({"id": "j2", "status": "pending"});

        let f = Filter::eq("status", "processed");
        assert!(f.matches(&processed));
        assert!(!f.matches(&pending));

        let not_owned = Filter::ne("owner", "u1");
        assert!(!not_owned.matches(&processed));
        // Missing owner compares as "" which differs from "u1".
        assert!(not_owned.matches(&pending));

        let either = Filter::eq("status", "pending").or(Filter::eq("owner", "u1"));
        assert!(either.matches(&processed));
        assert!(either.matches(&pending));
        assert!(!Filter::eq("status", "pending").and(Filter::eq("owner", "u1")).matches(&processed));
    }

    #[test]
    fn null_and_empty_are_equivalent() {
        let record = json!({"archived": "", "offer": null});
        assert!(Filter::eq("archived", FilterValue::Null).matches(&record));
        assert!(Filter::eq("offer", "").matches(&record));
        assert!(Filter::eq("missing", false).matches(&record));
    }
}
