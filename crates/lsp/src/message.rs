//! JSON-RPC 2.0 message model.
//!
//! Dynamic shapes only: requests and notifications carry `serde_json::Value`
//! params so the proxy can rewrite ids and URIs without knowing every
//! method. Typed access goes through `lsp_types`' request/notification
//! traits at the call sites that need it.

use serde::de::Error as _;
use serde::{Deserialize, Serialize};

use crate::JsonValue;

/// A JSON-RPC request id. LSP clients send numbers; the proxy rewrites
/// them to opaque strings on the server-facing side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
	Number(i64),
	String(String),
}

impl std::fmt::Display for RequestId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Number(n) => n.fmt(f),
			Self::String(s) => s.fmt(f),
		}
	}
}

impl From<i64> for RequestId {
	fn from(n: i64) -> Self {
		Self::Number(n)
	}
}

impl From<String> for RequestId {
	fn from(s: String) -> Self {
		Self::String(s)
	}
}

/// A request with unparsed params.
#[derive(Debug, Clone, PartialEq)]
pub struct AnyRequest {
	pub id: RequestId,
	pub method: String,
	pub params: JsonValue,
}

/// A notification with unparsed params.
#[derive(Debug, Clone, PartialEq)]
pub struct AnyNotification {
	pub method: String,
	pub params: JsonValue,
}

/// A response carrying either a result or an error.
#[derive(Debug, Clone, PartialEq)]
pub struct AnyResponse {
	pub id: RequestId,
	pub result: Option<JsonValue>,
	pub error: Option<ResponseError>,
}

impl AnyResponse {
	pub fn new_ok(id: RequestId, result: JsonValue) -> Self {
		Self {
			id,
			result: Some(result),
			error: None,
		}
	}

	pub fn new_err(id: RequestId, error: ResponseError) -> Self {
		Self {
			id,
			result: None,
			error: Some(error),
		}
	}

	pub fn into_result(self) -> Result<JsonValue, ResponseError> {
		match self.error {
			Some(err) => Err(err),
			None => Ok(self.result.unwrap_or(JsonValue::Null)),
		}
	}
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
	pub code: i64,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<JsonValue>,
}

impl ResponseError {
	pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			code: code.0,
			message: message.into(),
			data: None,
		}
	}
}

impl std::fmt::Display for ResponseError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{} (code {})", self.message, self.code)
	}
}

/// Well-known JSON-RPC / LSP error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub i64);

impl ErrorCode {
	pub const PARSE_ERROR: Self = Self(-32700);
	pub const INVALID_REQUEST: Self = Self(-32600);
	pub const METHOD_NOT_FOUND: Self = Self(-32601);
	pub const INVALID_PARAMS: Self = Self(-32602);
	pub const INTERNAL_ERROR: Self = Self(-32603);
	pub const SERVER_NOT_INITIALIZED: Self = Self(-32002);
	pub const REQUEST_FAILED: Self = Self(-32803);
	pub const SERVER_CANCELLED: Self = Self(-32802);
	pub const CONTENT_MODIFIED: Self = Self(-32801);
	pub const REQUEST_CANCELLED: Self = Self(-32800);
}

/// Any message crossing the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
	Request(AnyRequest),
	Notification(AnyNotification),
	Response(AnyResponse),
}

impl Message {
	pub fn method(&self) -> Option<&str> {
		match self {
			Self::Request(req) => Some(&req.method),
			Self::Notification(notif) => Some(&notif.method),
			Self::Response(_) => None,
		}
	}

	pub fn id(&self) -> Option<&RequestId> {
		match self {
			Self::Request(req) => Some(&req.id),
			Self::Response(resp) => Some(&resp.id),
			Self::Notification(_) => None,
		}
	}
}

impl From<AnyRequest> for Message {
	fn from(req: AnyRequest) -> Self {
		Self::Request(req)
	}
}

impl From<AnyNotification> for Message {
	fn from(notif: AnyNotification) -> Self {
		Self::Notification(notif)
	}
}

impl From<AnyResponse> for Message {
	fn from(resp: AnyResponse) -> Self {
		Self::Response(resp)
	}
}

// The wire shape. One raw struct covers all three variants so that
// classification happens after parsing, where we can produce a precise
// error for ambiguous frames.
#[derive(Serialize, Deserialize)]
struct RawMessage {
	jsonrpc: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	id: Option<RequestId>,
	#[serde(skip_serializing_if = "Option::is_none")]
	method: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	params: Option<JsonValue>,
	#[serde(skip_serializing_if = "Option::is_none")]
	result: Option<JsonValue>,
	#[serde(skip_serializing_if = "Option::is_none")]
	error: Option<ResponseError>,
}

impl Serialize for Message {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let raw = match self.clone() {
			Self::Request(req) => RawMessage {
				jsonrpc: "2.0".into(),
				id: Some(req.id),
				method: Some(req.method),
				params: Some(req.params),
				result: None,
				error: None,
			},
			Self::Notification(notif) => RawMessage {
				jsonrpc: "2.0".into(),
				id: None,
				method: Some(notif.method),
				params: Some(notif.params),
				result: None,
				error: None,
			},
			Self::Response(resp) => RawMessage {
				jsonrpc: "2.0".into(),
				id: Some(resp.id),
				method: None,
				params: None,
				// `result` must be present (possibly null) when there is no error.
				result: if resp.error.is_none() { Some(resp.result.unwrap_or(JsonValue::Null)) } else { resp.result },
				error: resp.error,
			},
		};
		raw.serialize(serializer)
	}
}

impl<'de> Deserialize<'de> for Message {
	fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let raw = RawMessage::deserialize(deserializer)?;
		if raw.jsonrpc != "2.0" {
			return Err(D::Error::custom(format!("unsupported jsonrpc version {:?}", raw.jsonrpc)));
		}
		match (raw.id, raw.method) {
			(Some(id), Some(method)) => Ok(Self::Request(AnyRequest {
				id,
				method,
				params: raw.params.unwrap_or(JsonValue::Null),
			})),
			(None, Some(method)) => Ok(Self::Notification(AnyNotification {
				method,
				params: raw.params.unwrap_or(JsonValue::Null),
			})),
			(Some(id), None) => Ok(Self::Response(AnyResponse {
				id,
				result: raw.result,
				error: raw.error,
			})),
			(None, None) => Err(D::Error::custom("message has neither method nor id")),
		}
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use serde_json::json;

	use super::*;

	#[test]
	fn request_round_trip() {
		let msg = Message::Request(AnyRequest {
			id: RequestId::Number(7),
			method: "textDocument/hover".into(),
			params: json!({"position": {"line": 1, "character": 2}}),
		});
		let text = serde_json::to_string(&msg).unwrap();
		assert!(text.contains("\"jsonrpc\":\"2.0\""));
		let parsed: Message = serde_json::from_str(&text).unwrap();
		assert_eq!(parsed, msg);
	}

	#[test]
	fn response_with_null_result_stays_response() {
		let msg = Message::Response(AnyResponse::new_ok(RequestId::Number(1), JsonValue::Null));
		let text = serde_json::to_string(&msg).unwrap();
		assert!(text.contains("\"result\":null"));
		let parsed: Message = serde_json::from_str(&text).unwrap();
		assert!(matches!(parsed, Message::Response(resp) if resp.result == Some(JsonValue::Null)));
	}

	#[test]
	fn notification_has_no_id() {
		let text = r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#;
		let parsed: Message = serde_json::from_str(text).unwrap();
		assert!(matches!(parsed, Message::Notification(notif) if notif.method == "initialized"));
	}

	#[test]
	fn string_and_number_ids_both_parse() {
		let numeric: Message = serde_json::from_str(r#"{"jsonrpc":"2.0","id":3,"result":{}}"#).unwrap();
		assert_eq!(numeric.id(), Some(&RequestId::Number(3)));
		let string: Message = serde_json::from_str(r#"{"jsonrpc":"2.0","id":"abc","result":{}}"#).unwrap();
		assert_eq!(string.id(), Some(&RequestId::String("abc".into())));
	}

	#[test]
	fn wrong_version_is_rejected() {
		let err = serde_json::from_str::<Message>(r#"{"jsonrpc":"1.0","id":1,"method":"x"}"#).unwrap_err();
		assert!(err.to_string().contains("jsonrpc"));
	}

	#[test]
	fn error_response_round_trip() {
		let msg = Message::Response(AnyResponse::new_err(
			RequestId::String("r1".into()),
			ResponseError::new(ErrorCode::METHOD_NOT_FOUND, "no such method"),
		));
		let text = serde_json::to_string(&msg).unwrap();
		let parsed: Message = serde_json::from_str(&text).unwrap();
		let Message::Response(resp) = parsed else {
			panic!("expected response");
		};
		assert_eq!(resp.error.unwrap().code, ErrorCode::METHOD_NOT_FOUND.0);
	}
}
