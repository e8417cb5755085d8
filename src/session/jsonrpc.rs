//! JSON-RPC 2.0 frame types exchanged over the SSE transport (§6).

// self
use crate::{_prelude::*, error::JsonRpcError};

/// One inbound JSON-RPC 2.0 request or notification.
#[derive(Clone, Debug, Deserialize)]
pub struct JsonRpcRequest {
	/// Protocol marker; always `"2.0"` for conforming clients.
	#[serde(default)]
	pub jsonrpc: String,
	/// Request id; absent for notifications, which never receive a reply.
	#[serde(default)]
	pub id: Option<serde_json::Value>,
	/// Method name, e.g. `initialize`, `tools/list`, `tools/call`, `ping`.
	pub method: String,
	/// Method parameters, defaulting to `null` when omitted.
	#[serde(default)]
	pub params: serde_json::Value,
}

/// One outbound JSON-RPC 2.0 response.
#[derive(Clone, Debug, Serialize)]
pub struct JsonRpcResponse {
	jsonrpc: &'static str,
	id: serde_json::Value,
	#[serde(skip_serializing_if = "Option::is_none")]
	result: Option<serde_json::Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	error: Option<JsonRpcError>,
}
impl JsonRpcResponse {
	/// Builds a success reply.
	pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
		Self { jsonrpc: "2.0", id, result: Some(result), error: None }
	}

	/// Builds an error reply.
	pub fn error(id: serde_json::Value, error: JsonRpcError) -> Self {
		Self { jsonrpc: "2.0", id, result: None, error: Some(error) }
	}

	/// Standard `-32601 Method not found` reply.
	pub fn method_not_found(id: serde_json::Value, method: &str) -> Self {
		Self::error(id, JsonRpcError { code: -32601, message: format!("Method not found: {method}."), data: None })
	}

	/// Standard `-32600 Invalid request` reply, used when a frame has no usable id.
	pub fn invalid_request(message: impl Into<String>) -> Self {
		Self::error(serde_json::Value::Null, JsonRpcError { code: -32600, message: message.into(), data: None })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn success_reply_omits_error_field() {
		let reply = JsonRpcResponse::success(serde_json::json!(1), serde_json::json!({"ok": true}));
		let value = serde_json::to_value(&reply).unwrap();

		assert!(value.get("error").is_none());
		assert_eq!(value["result"]["ok"], true);
	}

	#[test]
	fn error_reply_omits_result_field() {
		let reply = JsonRpcResponse::method_not_found(serde_json::json!(1), "bogus");
		let value = serde_json::to_value(&reply).unwrap();

		assert!(value.get("result").is_none());
		assert_eq!(value["error"]["code"], -32601);
	}
}
