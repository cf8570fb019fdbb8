// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The unit of delivery.
//!
//! The pipeline treats records as opaque: it only needs a stable identifier for
//! diagnostics and a way to turn the record into its JSON wire form. Records are moved
//! between pipeline stages, never cloned.

use serde_json::{Map, Value};

pub trait Record: Send + Sync + 'static {
    /// Stable identifier used in logs and unsent-event entries.
    fn id(&self) -> &str;

    /// Serializes the record into the JSON body posted to the endpoint.
    fn to_payload(&self) -> Result<Value, serde_json::Error>;
}

/// A record backed by an arbitrary JSON object.
///
/// The identifier is taken from `messageId` (or `message_id`); when neither is present a
/// UUID v4 is generated and written back into the object as `messageId` so the endpoint
/// and the unsent log agree on it.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRecord {
    id: String,
    body: Map<String, Value>,
}

impl JsonRecord {
    /// Wraps a JSON value, returning `None` unless it is an object.
    #[must_use]
    pub fn new(value: Value) -> Option<Self> {
        let Value::Object(mut body) = value else {
            return None;
        };

        let existing = ["messageId", "message_id"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        let id = match existing {
            Some(id) => id,
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                body.insert("messageId".to_string(), Value::String(id.clone()));
                id
            }
        };

        Some(Self { id, body })
    }

    #[must_use]
    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }
}

impl Record for JsonRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn to_payload(&self) -> Result<Value, serde_json::Error> {
        Ok(Value::Object(self.body.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_record_uses_message_id() {
        let record = JsonRecord::new(json!({"messageId": "abc", "event": "Signed Up"}))
            .expect("object should be accepted");
        assert_eq!(record.id(), "abc");
        assert_eq!(
            record.to_payload().expect("payload"),
            json!({"messageId": "abc", "event": "Signed Up"})
        );
    }

    #[test]
    fn test_json_record_accepts_snake_case_id() {
        let record = JsonRecord::new(json!({"message_id": "snake"})).expect("object");
        assert_eq!(record.id(), "snake");
    }

    #[test]
    fn test_json_record_generates_missing_id() {
        let record = JsonRecord::new(json!({"event": "Page Viewed"})).expect("object");
        assert!(uuid::Uuid::parse_str(record.id()).is_ok());
        assert_eq!(
            record.body().get("messageId").and_then(Value::as_str),
            Some(record.id())
        );
    }

    #[test]
    fn test_json_record_rejects_non_objects() {
        assert!(JsonRecord::new(json!([1, 2, 3])).is_none());
        assert!(JsonRecord::new(json!("text")).is_none());
    }
}
