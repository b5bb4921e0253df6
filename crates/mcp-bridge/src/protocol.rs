//! JSON-RPC 2.0 types for the provider dialect.
//!
//! Each message is a single line of JSON (newline-delimited).

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A JSON-RPC 2.0 request (has an `id`, expects a response).
///
/// Field order matters on the wire: providers that sniff the `id` with a
/// prefix match expect `jsonrpc`, then `id`, then `method`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification (no `id`, fire-and-forget).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A JSON-RPC 2.0 response.
///
/// `id` is kept as a raw value because providers echo it back either as
/// a number or as a decimal string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The request id this response answers, if it is one we could have sent.
    pub fn request_id(&self) -> Option<u64> {
        match &self.id {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Check if the response represents an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Extract the result value, returning an error if the response is an error.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a protocol frame from the provider turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Response(JsonRpcResponse),
    /// A request or notification initiated by the provider.
    ServerMessage { method: String, id: Option<Value> },
    /// Has `jsonrpc` but neither `method` nor a usable response shape.
    Unrecognized(Value),
}

impl Inbound {
    pub fn classify(value: Value) -> Self {
        if let Some(method) = value.get("method").and_then(Value::as_str) {
            return Inbound::ServerMessage {
                method: method.to_string(),
                id: value.get("id").cloned(),
            };
        }
        let looks_like_response = value.get("id").is_some()
            && (value.get("result").is_some() || value.get("error").is_some());
        if !looks_like_response {
            return Inbound::Unrecognized(value);
        }
        match serde_json::from_value::<JsonRpcResponse>(value.clone()) {
            Ok(resp) => Inbound::Response(resp),
            Err(_) => Inbound::Unrecognized(value),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handshake and tool payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const CLIENT_NAME: &str = "brainslot-mcp";
/// Reported when the provider's `serverInfo` carries no version.
pub const FALLBACK_SERVER_VERSION: &str = "1.0.0";

/// Client info sent during `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Parameters for the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// The parts of the `initialize` result the bridge cares about.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

impl InitializeResult {
    pub fn server_version(&self) -> String {
        self.server_info
            .as_ref()
            .and_then(|info| info.version.clone())
            .unwrap_or_else(|| FALLBACK_SERVER_VERSION.to_string())
    }

    /// Keys of the advertised `capabilities` object.
    pub fn feature_names(&self) -> Vec<String> {
        self.capabilities
            .as_ref()
            .map(|caps| caps.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// A single tool definition returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// The result payload from `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<ProviderToolDef>,
}

/// Build the `initialize` request parameters.
pub fn initialize_params(protocol_version: &str) -> InitializeParams {
    InitializeParams {
        protocol_version: protocol_version.to_string(),
        capabilities: serde_json::json!({ "tools": {}, "resources": {}, "prompts": {} }),
        client_info: ClientInfo {
            name: CLIENT_NAME.into(),
            version: env!("CARGO_PKG_VERSION").into(),
        },
    }
}

/// What a `tools/call` result means for the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// First text content item, or the raw result if the shape differs.
    Output(Value),
    /// The provider set `isError: true`; carries its text.
    ToolError(String),
}

pub fn interpret_call_result(result: Value) -> CallOutcome {
    let first_text = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|items| {
            items.iter().find_map(|item| {
                let is_text = item.get("type").and_then(Value::as_str) == Some("text");
                if is_text {
                    item.get("text").and_then(Value::as_str).map(str::to_string)
                } else {
                    None
                }
            })
        });

    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if is_error {
        let text = first_text.unwrap_or_else(|| result.to_string());
        return CallOutcome::ToolError(text);
    }

    match first_text {
        Some(text) => CallOutcome::Output(Value::String(text)),
        None => CallOutcome::Output(result),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_jsonrpc_id_method_in_order() {
        let req = JsonRpcRequest::new(7, "tools/call", Some(json!({ "name": "echo" })));
        let line = serde_json::to_string(&req).unwrap();
        assert!(line.starts_with(r#"{"jsonrpc":"2.0","id":7,"method":"tools/call""#));
    }

    #[test]
    fn notification_has_no_id_or_params_when_absent() {
        let notif = JsonRpcNotification::new("notifications/initialized", None);
        let line = serde_json::to_string(&notif).unwrap();
        assert_eq!(line, r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
    }

    #[test]
    fn response_id_accepts_number_or_string() {
        let n: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":3,"result":null}"#).unwrap();
        let s: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"3","result":null}"#).unwrap();
        let bad: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"abc","result":null}"#).unwrap();
        assert_eq!(n.request_id(), Some(3));
        assert_eq!(s.request_id(), Some(3));
        assert_eq!(bad.request_id(), None);
    }

    #[test]
    fn error_response_into_result() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32600,"message":"Invalid request","data":{"hint":"x"}}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        assert!(resp.is_error());
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, -32600);
        assert_eq!(err.data, Some(json!({ "hint": "x" })));
        assert_eq!(err.to_string(), "JSON-RPC error -32600: Invalid request");
    }

    #[test]
    fn classify_server_initiated_messages() {
        let notif = Inbound::classify(json!({ "jsonrpc": "2.0", "method": "notifications/progress" }));
        assert!(matches!(notif, Inbound::ServerMessage { ref method, id: None } if method == "notifications/progress"));

        let resp = Inbound::classify(json!({ "jsonrpc": "2.0", "id": 1, "result": {} }));
        assert!(matches!(resp, Inbound::Response(_)));

        let odd = Inbound::classify(json!({ "jsonrpc": "2.0", "id": 1 }));
        assert!(matches!(odd, Inbound::Unrecognized(_)));
    }

    #[test]
    fn initialize_params_shape() {
        let params = serde_json::to_value(initialize_params("2025-06-18")).unwrap();
        assert_eq!(params["protocolVersion"], "2025-06-18");
        assert_eq!(params["clientInfo"]["name"], "brainslot-mcp");
        assert_eq!(params["capabilities"], json!({ "tools": {}, "resources": {}, "prompts": {} }));
    }

    #[test]
    fn initialize_result_version_and_features() {
        let result: InitializeResult = serde_json::from_value(json!({
            "capabilities": { "tools": {}, "logging": {} },
            "serverInfo": { "name": "crawler", "version": "2.3.1" }
        }))
        .unwrap();
        assert_eq!(result.server_version(), "2.3.1");
        let mut features = result.feature_names();
        features.sort();
        assert_eq!(features, vec!["logging", "tools"]);

        let bare = InitializeResult::default();
        assert_eq!(bare.server_version(), "1.0.0");
        assert!(bare.feature_names().is_empty());
    }

    #[test]
    fn call_result_first_text_item() {
        let outcome = interpret_call_result(json!({
            "content": [
                { "type": "image", "data": "..." },
                { "type": "text", "text": "hi" }
            ]
        }));
        assert_eq!(outcome, CallOutcome::Output(json!("hi")));
    }

    #[test]
    fn call_result_unexpected_shape_returned_raw() {
        let raw = json!({ "value": 0.92 });
        assert_eq!(interpret_call_result(raw.clone()), CallOutcome::Output(raw));
    }

    #[test]
    fn call_result_is_error_surfaces_text() {
        let outcome = interpret_call_result(json!({
            "content": [{ "type": "text", "text": "unknown tool" }],
            "isError": true
        }));
        assert_eq!(outcome, CallOutcome::ToolError("unknown tool".into()));
    }
}
