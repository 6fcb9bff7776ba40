//! Firestore REST value encoding
//!
//! Firestore wraps every value in a typed object (`{"stringValue": "x"}`,
//! `{"integerValue": "14"}`, ...). Documents are converted to and from plain
//! JSON so the serde models in `scadenze_shared` can be used directly.

use serde_json::{Map, Number, Value};

/// Plain JSON object from a document's `fields` map.
pub fn decode_fields(fields: &Map<String, Value>) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(k, v)| (k.clone(), decode_value(v)))
            .collect(),
    )
}

/// Plain JSON from one typed Firestore value.
pub fn decode_value(value: &Value) -> Value {
    let Some((kind, inner)) = value.as_object().and_then(|o| o.iter().next()) else {
        return Value::Null;
    };

    match kind.as_str() {
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "booleanValue" => inner.clone(),
        "nullValue" => Value::Null,
        // 64-bit integers travel as strings.
        "integerValue" => match inner {
            Value::String(s) => s
                .parse::<i64>()
                .map(|n| Value::Number(n.into()))
                .unwrap_or(Value::Null),
            other => other.clone(),
        },
        "doubleValue" => match inner {
            Value::String(s) => s
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            other => other.clone(),
        },
        "mapValue" => inner
            .get("fields")
            .and_then(Value::as_object)
            .map(decode_fields)
            .unwrap_or_else(|| Value::Object(Map::new())),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "geoPointValue" => inner.clone(),
        _ => Value::Null,
    }
}

/// Typed Firestore value from plain JSON.
pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => serde_json::json!({ "nullValue": null }),
        Value::Bool(b) => serde_json::json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => serde_json::json!({ "integerValue": i.to_string() }),
            None => serde_json::json!({ "doubleValue": n.as_f64() }),
        },
        Value::String(s) => serde_json::json!({ "stringValue": s }),
        Value::Array(values) => serde_json::json!({
            "arrayValue": { "values": values.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(map) => serde_json::json!({
            "mapValue": { "fields": encode_fields(map) }
        }),
    }
}

/// Typed `fields` map from a plain JSON object.
pub fn encode_fields(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), encode_value(v)))
        .collect()
}
