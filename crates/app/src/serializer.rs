//! JSON serialization of response payloads.
//!
//! Routes may carry a [`ResponseSerializers`] table keyed by status code. A
//! JSON payload sent with a status that has an entry is serialized with it,
//! everything else goes through plain `serde_json`.

use http::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Turns a JSON payload into its wire text.
pub type SerializeFn = Arc<dyn Fn(&Value) -> Result<String, serde_json::Error> + Send + Sync>;

/// Per-status serializers of one route.
#[derive(Clone, Default)]
pub struct ResponseSerializers {
    by_status: HashMap<StatusCode, SerializeFn>,
}

impl ResponseSerializers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(mut self, status: StatusCode, f: F) -> Self
    where
        F: Fn(&Value) -> Result<String, serde_json::Error> + Send + Sync + 'static,
    {
        self.by_status.insert(status, Arc::new(f));
        self
    }

    /// Registers a serializer that only writes the properties `schema` declares.
    ///
    /// See [`from_schema`].
    pub fn with_schema(mut self, status: StatusCode, schema: Value) -> Self {
        self.by_status.insert(status, from_schema(schema));
        self
    }

    pub fn get(&self, status: StatusCode) -> Option<&SerializeFn> {
        self.by_status.get(&status)
    }

    pub fn is_empty(&self) -> bool {
        self.by_status.is_empty()
    }
}

impl fmt::Debug for ResponseSerializers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.by_status.keys()).finish()
    }
}

/// Builds a serializer from a JSON-schema-like shape.
///
/// Objects keep only the keys listed under `properties`, arrays apply `items`
/// to each element, anything else is written as is. A schema with neither
/// `type` nor `properties` is taken to be the `properties` map itself, so
/// `{"id": {"type": "number"}}` works as a shorthand.
pub fn from_schema(schema: Value) -> SerializeFn {
    let schema = if schema.get("type").is_none() && schema.get("properties").is_none() {
        serde_json::json!({ "type": "object", "properties": schema })
    } else {
        schema
    };

    Arc::new(move |value| serde_json::to_string(&project(value, &schema)))
}

fn project(value: &Value, schema: &Value) -> Value {
    match value {
        Value::Object(object) => match schema.get("properties").and_then(Value::as_object) {
            Some(properties) => {
                let projected: Map<String, Value> = properties
                    .iter()
                    .filter_map(|(key, property)| object.get(key).map(|value| (key.clone(), project(value, property))))
                    .collect();
                Value::Object(projected)
            }
            None => value.clone(),
        },
        Value::Array(items) => match schema.get("items") {
            Some(item_schema) => Value::Array(items.iter().map(|item| project(item, item_schema)).collect()),
            None => value.clone(),
        },
        _ => value.clone(),
    }
}

pub(crate) fn serialize(
    serializers: Option<&ResponseSerializers>,
    status: StatusCode,
    value: &Value,
) -> Result<String, serde_json::Error> {
    match serializers.and_then(|serializers| serializers.get(status)) {
        Some(serialize) => serialize(value),
        None => serde_json::to_string(value),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    status_code: u16,
    error: &'a str,
    message: &'a str,
}

/// The fixed `{statusCode, error, message}` error document.
pub(crate) fn serialize_error(status: StatusCode, message: &str) -> String {
    let body = ErrorBody { status_code: status.as_u16(), error: status.canonical_reason().unwrap_or(""), message };
    // a struct of integers and strings always serializes
    serde_json::to_string(&body).unwrap_or_default()
}
