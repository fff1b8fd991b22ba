pub mod course;
pub mod enrollment;
pub mod user;

use chrono::Utc;
use mongodb::bson::{oid::ObjectId, DateTime};
use serde_json::Value;

use crate::errors::ApiError;

pub fn now() -> DateTime {
    DateTime::from_millis(Utc::now().timestamp_millis())
}

/// RFC 3339 rendering used in every JSON response.
pub fn iso(dt: DateTime) -> String {
    dt.try_to_rfc3339_string()
        .unwrap_or_else(|_| dt.timestamp_millis().to_string())
}

pub fn parse_object_id(raw: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(raw.trim()).map_err(|_| ApiError::validation("Invalid id"))
}

/// Boolean coercion for loosely typed client flags.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Escapes a user supplied search term so it matches literally inside `$regex`.
pub fn escape_regex(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if "\\^$.|?*+()[]{}-/".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthy_follows_loose_boolean_rules() {
        assert!(truthy(&json!(true)));
        assert!(truthy(&json!(1)));
        assert!(truthy(&json!("false")));
        assert!(truthy(&json!({})));
        assert!(!truthy(&json!(false)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&Value::Null));
    }

    #[test]
    fn test_escape_regex() {
        assert_eq!(escape_regex("rust"), "rust");
        assert_eq!(escape_regex("c++ (intro)"), "c\\+\\+ \\(intro\\)");
        assert_eq!(escape_regex(".*"), "\\.\\*");
    }

    #[test]
    fn test_parse_object_id() {
        let id = ObjectId::new();
        assert_eq!(parse_object_id(&id.to_hex()).unwrap(), id);
        assert!(matches!(parse_object_id("abc"), Err(ApiError::Validation(_))));
    }

    #[test]
    fn test_iso_renders_rfc3339() {
        let dt = DateTime::from_millis(0);
        assert_eq!(iso(dt), "1970-01-01T00:00:00Z");
    }
}
