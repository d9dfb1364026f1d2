use crate::error::Result;
use crate::transformer::{TransformEvent, TransformerRegistry};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

/// Register the stock transforms every registry ships with.
pub fn register(registry: &mut TransformerRegistry) {
    registry.add_fn("trim", trim);
    registry.add_fn("uppercase", uppercase);
    registry.add_fn("lowercase", lowercase);
    registry.add_fn("parse_json", parse_json);
    registry.add_fn("date", date);
    registry.add_fn("datetime", datetime);
}

fn trim(value: Value, _event: &TransformEvent) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(s.trim().to_string())),
        other => Ok(other),
    }
}

fn uppercase(value: Value, _event: &TransformEvent) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(s.to_uppercase())),
        other => Ok(other),
    }
}

fn lowercase(value: Value, _event: &TransformEvent) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(s.to_lowercase())),
        other => Ok(other),
    }
}

/// Decode a JSON-encoded string column into a structured value. Non-string
/// and unparsable inputs pass through unchanged.
fn parse_json(value: Value, _event: &TransformEvent) -> Result<Value> {
    match &value {
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed) => Ok(parsed),
            Err(_) => Ok(value),
        },
        _ => Ok(value),
    }
}

/// Normalize a stored datetime into a `YYYY-MM-DD` date string.
fn date(value: Value, _event: &TransformEvent) -> Result<Value> {
    match parse_datetime(&value) {
        Some(dt) => Ok(Value::String(dt.format("%Y-%m-%d").to_string())),
        None => Ok(value),
    }
}

/// Normalize a stored datetime into RFC 3339.
fn datetime(value: Value, _event: &TransformEvent) -> Result<Value> {
    match parse_datetime(&value) {
        Some(dt) => Ok(Value::String(dt.to_rfc3339())),
        None => Ok(value),
    }
}

fn parse_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(naive.and_utc());
            }
            None
        }
        Value::Number(n) => {
            let secs = n.as_i64()?;
            DateTime::from_timestamp(secs, 0)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PropertyNode;
    use serde_json::{json, Map};

    fn apply(name: &str, value: Value) -> Value {
        let registry = TransformerRegistry::with_builtins();
        let property = PropertyNode::new("x");
        let record = Map::new();
        let event = TransformEvent {
            owner_type: None,
            property_name: "x",
            property: &property,
            parent_type: None,
            parent_property: None,
            record: &record,
        };
        registry.resolve(name).unwrap().transform(value, &event).unwrap()
    }

    #[test]
    fn test_string_transforms() {
        assert_eq!(apply("trim", json!("  a  ")), json!("a"));
        assert_eq!(apply("uppercase", json!("abc")), json!("ABC"));
        assert_eq!(apply("lowercase", json!("AbC")), json!("abc"));
        // Non-strings pass through.
        assert_eq!(apply("trim", json!(5)), json!(5));
    }

    #[test]
    fn test_parse_json() {
        assert_eq!(apply("parse_json", json!("[1,2]")), json!([1, 2]));
        assert_eq!(apply("parse_json", json!("not json")), json!("not json"));
    }

    #[test]
    fn test_date_formats() {
        assert_eq!(apply("date", json!("2024-03-05 10:30:00")), json!("2024-03-05"));
        assert_eq!(
            apply("datetime", json!("2024-03-05 10:30:00")),
            json!("2024-03-05T10:30:00+00:00")
        );
        // Epoch seconds.
        assert_eq!(apply("date", json!(0)), json!("1970-01-01"));
        // Unparsable input passes through.
        assert_eq!(apply("date", json!("soon")), json!("soon"));
    }
}
