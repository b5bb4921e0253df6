//! The result envelope every tool invocation produces.
//!
//! ```json
//! { "content": [{ "type": "text", "text": "<pretty JSON>" }], "isError": false }
//! ```
//!
//! The embedded JSON object always carries `success` and `timestamp`.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// RFC 3339 UTC timestamp with millisecond precision.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolEnvelope {
    pub content: Vec<EnvelopeContent>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolEnvelope {
    /// Wrap handler output.
    ///
    /// Objects get `success: true` and `timestamp` filled in when absent;
    /// an object that reports `success: false` yields `isError: true`.
    /// Anything else is wrapped as `{ success, result, timestamp }`.
    pub fn success(output: Value) -> Self {
        let payload = match output {
            Value::Object(mut map) => {
                map.entry("success").or_insert(Value::Bool(true));
                map.entry("timestamp").or_insert_with(|| Value::String(timestamp()));
                map
            }
            other => {
                let mut map = Map::new();
                map.insert("success".into(), Value::Bool(true));
                map.insert("result".into(), other);
                map.insert("timestamp".into(), Value::String(timestamp()));
                map
            }
        };
        let is_error = payload.get("success") == Some(&Value::Bool(false));
        Self::from_payload(Value::Object(payload), is_error)
    }

    /// Failure payload for unknown tools, invalid arguments, handler
    /// errors and panics.
    pub fn failure(tool: &str, error: impl std::fmt::Display) -> Self {
        let payload = json!({
            "success": false,
            "status": "failed",
            "tool": tool,
            "error": error.to_string(),
            "timestamp": timestamp(),
        });
        Self::from_payload(payload, true)
    }

    fn from_payload(payload: Value, is_error: bool) -> Self {
        let text = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
        Self {
            content: vec![EnvelopeContent {
                content_type: "text".into(),
                text,
            }],
            is_error,
        }
    }

    /// The JSON object carried in the first text item.
    pub fn payload(&self) -> Option<Value> {
        self.content
            .iter()
            .find(|c| c.content_type == "text")
            .and_then(|c| serde_json::from_str(&c.text).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_output_gets_success_and_timestamp() {
        let env = ToolEnvelope::success(json!({ "datasetId": "ds_1" }));
        assert!(!env.is_error);
        let payload = env.payload().unwrap();
        assert_eq!(payload["success"], true);
        assert_eq!(payload["datasetId"], "ds_1");
        let ts = payload["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok(), "{ts}");
    }

    #[test]
    fn existing_fields_are_kept() {
        let env = ToolEnvelope::success(json!({
            "success": false,
            "error": "crawl failed",
            "timestamp": "2025-01-01T00:00:00.000Z"
        }));
        assert!(env.is_error);
        let payload = env.payload().unwrap();
        assert_eq!(payload["timestamp"], "2025-01-01T00:00:00.000Z");
        assert_eq!(payload["error"], "crawl failed");
    }

    #[test]
    fn scalar_output_is_wrapped() {
        let env = ToolEnvelope::success(json!("hello"));
        let payload = env.payload().unwrap();
        assert_eq!(payload["success"], true);
        assert_eq!(payload["result"], "hello");
        assert!(payload.get("timestamp").is_some());
    }

    #[test]
    fn failure_shape() {
        let env = ToolEnvelope::failure("bs.query_entity", "not_found: bs.query_entity");
        assert!(env.is_error);
        let payload = env.payload().unwrap();
        assert_eq!(payload["success"], false);
        assert_eq!(payload["status"], "failed");
        assert_eq!(payload["tool"], "bs.query_entity");
        assert_eq!(payload["error"], "not_found: bs.query_entity");
        assert!(payload["timestamp"].is_string());
    }

    #[test]
    fn wire_shape() {
        let env = ToolEnvelope::failure("x", "boom");
        let wire = serde_json::to_value(&env).unwrap();
        assert_eq!(wire["isError"], true);
        assert_eq!(wire["content"][0]["type"], "text");
        assert!(wire["content"][0]["text"].as_str().unwrap().contains('\n'));
    }
}
