//! Bidirectional mapping between typed DynamoDB-JSON attribute values and
//! plain JSON, used when the consumer runs in `json_mode`.
//!
//! Numbers travel as strings on the DynamoDB wire to preserve precision.
//! Translating to plain JSON parses them into JSON numbers when they fit,
//! and falls back to the original string when they don't; the reverse
//! direction renders JSON numbers back into their string form.

use crate::protocol::{AttributeMap, AttributeValue};
use serde_json::{Map, Value};

/// Translate one typed attribute value into its plain JSON equivalent.
///
/// The set types have no JSON counterpart and become arrays; binary values
/// stay in their base64 string form.
pub fn attribute_to_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => number_to_json(n),
        AttributeValue::B(b) => Value::String(b.clone()),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::L(items) => Value::Array(items.iter().map(attribute_to_json).collect()),
        AttributeValue::M(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), attribute_to_json(value)))
                .collect(),
        ),
        AttributeValue::SS(items) => {
            Value::Array(items.iter().cloned().map(Value::String).collect())
        }
        AttributeValue::NS(items) => {
            Value::Array(items.iter().map(|n| number_to_json(n)).collect())
        }
        AttributeValue::BS(items) => {
            Value::Array(items.iter().cloned().map(Value::String).collect())
        }
    }
}

/// Translate a plain JSON value into its typed form.
///
/// This is the inverse of [`attribute_to_json`] up to the lossy cases that
/// mapping documents: sets come back as lists, and binary values as strings.
pub fn attribute_from_json(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(items) => {
            AttributeValue::L(items.iter().map(attribute_from_json).collect())
        }
        Value::Object(entries) => AttributeValue::M(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), attribute_from_json(value)))
                .collect(),
        ),
    }
}

/// Translate a full attribute map (an item image or key set) to plain JSON.
pub fn map_to_json(map: &AttributeMap) -> Value {
    Value::Object(
        map.iter()
            .map(|(key, value)| (key.clone(), attribute_to_json(value)))
            .collect::<Map<_, _>>(),
    )
}

/// Translate a plain JSON object back into an attribute map. Non-object
/// values yield an empty map.
pub fn map_from_json(value: &Value) -> AttributeMap {
    match value {
        Value::Object(entries) => entries
            .iter()
            .map(|(key, value)| (key.clone(), attribute_from_json(value)))
            .collect(),
        _ => AttributeMap::new(),
    }
}

fn number_to_json(n: &str) -> Value {
    if let Ok(integer) = n.parse::<i64>() {
        return Value::Number(integer.into());
    }
    if let Ok(integer) = n.parse::<u64>() {
        return Value::Number(integer.into());
    }
    if let Some(number) = n.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
        return Value::Number(number);
    }
    Value::String(n.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_to_json() {
        let item: AttributeMap = serde_json::from_value(json!({
            "id": {"S": "order-1"},
            "total": {"N": "19.99"},
            "paid": {"BOOL": false},
            "note": {"NULL": true},
            "tags": {"SS": ["a", "b"]},
            "lines": {"L": [
                {"M": {"sku": {"S": "x"}, "qty": {"N": "2"}}}
            ]}
        }))
        .unwrap();

        assert_eq!(
            map_to_json(&item),
            json!({
                "id": "order-1",
                "total": 19.99,
                "paid": false,
                "note": null,
                "tags": ["a", "b"],
                "lines": [{"sku": "x", "qty": 2}]
            }),
        );
    }

    #[test]
    fn test_json_to_document_and_back() {
        let document = json!({
            "id": "user-7",
            "age": 41,
            "active": true,
            "address": {"city": "Lisbon", "zip": "1100"},
            "scores": [1, 2.5, 3]
        });

        let item = map_from_json(&document);
        assert_eq!(item["id"], AttributeValue::S("user-7".to_string()));
        assert_eq!(item["age"], AttributeValue::N("41".to_string()));

        assert_eq!(map_to_json(&item), document);
    }

    #[test]
    fn test_unrepresentable_number_stays_a_string() {
        // Overflows f64 entirely; there is no JSON number to map it to.
        assert_eq!(
            attribute_to_json(&AttributeValue::N("1e999".to_string())),
            Value::String("1e999".to_string()),
        );
    }
}
