//! JSON-RPC 2.0 envelopes.
//!
//! Messages may cross an agent boundary wrapped in a JSON-RPC request whose
//! `params` is the bare message; the answer then comes back as the `result` of
//! a JSON-RPC response with the same `id`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Invalid JSON was received.
pub const PARSE_ERROR: i32 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i32 = -32600;
/// The method does not exist.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i32 = -32602;
/// Internal error.
pub const INTERNAL_ERROR: i32 = -32603;

/// Method name of wrapped league messages.
pub const METHOD: &str = "league.message";

const VERSION: &str = "2.0";

/// JSON-RPC message identifier (number or string).
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Num(i64),
    Str(String),
}

/// JSON-RPC request or notification.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RpcId>,
}

/// JSON-RPC error object.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC response.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Option<RpcId>,
}

impl RpcResponse {
    /// Construct a success response with the given result.
    pub fn success(id: Option<RpcId>, result: Value) -> Self {
        Self {
            jsonrpc: VERSION.to_owned(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Construct an error response.
    pub fn error(id: Option<RpcId>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: VERSION.to_owned(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }
}

/// Wraps a bare message into a request.
pub fn wrap_request(message: Value, id: i64) -> RpcRequest {
    RpcRequest {
        jsonrpc: VERSION.to_owned(),
        method: METHOD.to_owned(),
        params: Some(message),
        id: Some(RpcId::Num(id)),
    }
}

/// Inbound document, bare or JSON-RPC wrapped.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// A bare message.
    Bare(Value),
    /// A JSON-RPC request carrying a message in `params`.
    JsonRpc {
        /// Id to echo in the response.
        id: Option<RpcId>,
        /// The wrapped message, `Null` if absent.
        params: Value,
    },
}

/// Detects and strips a JSON-RPC request envelope.
pub fn unwrap_request(value: Value) -> Result<Envelope, RpcResponse> {
    if value.get("jsonrpc").is_none() {
        return Ok(Envelope::Bare(value));
    }
    let request: RpcRequest = serde_json::from_value(value)
        .map_err(|e| RpcResponse::error(None, INVALID_REQUEST, e.to_string()))?;
    if request.jsonrpc != VERSION {
        return Err(RpcResponse::error(
            request.id,
            INVALID_REQUEST,
            format!("unsupported jsonrpc version '{}'", request.jsonrpc),
        ));
    }
    Ok(Envelope::JsonRpc {
        id: request.id,
        params: request.params.unwrap_or(Value::Null),
    })
}

/// Extracts the result of a response, bare documents pass through.
///
/// JSON-RPC errors and malformed responses yield `None`.
pub fn unwrap_response(value: Value) -> Option<Value> {
    if value.get("jsonrpc").is_none() {
        return Some(value);
    }
    let response: RpcResponse = serde_json::from_value(value).ok()?;
    if response.error.is_some() {
        return None;
    }
    response.result
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn bare_documents_pass_through() {
        let doc = json!({"message_type": "START_LEAGUE"});
        assert_eq!(unwrap_request(doc.clone()), Ok(Envelope::Bare(doc.clone())));
        assert_eq!(unwrap_response(doc.clone()), Some(doc));
    }

    #[test]
    fn wrapped_request_round_trip() {
        let doc = json!({"message_type": "START_LEAGUE"});
        let wire = serde_json::to_value(wrap_request(doc.clone(), 7)).unwrap();
        assert_eq!(wire["jsonrpc"], "2.0");
        assert_eq!(wire["id"], 7);

        let Ok(Envelope::JsonRpc { id, params }) = unwrap_request(wire) else {
            panic!("expected a JSON-RPC envelope");
        };
        assert_eq!(id, Some(RpcId::Num(7)));
        assert_eq!(params, doc);
    }

    #[test]
    fn error_responses_unwrap_to_none() {
        let err = serde_json::to_value(RpcResponse::error(Some(RpcId::Num(1)), INTERNAL_ERROR, "boom")).unwrap();
        assert_eq!(unwrap_response(err), None);

        let ok = serde_json::to_value(RpcResponse::success(
            Some(RpcId::Str("a".into())),
            json!({"status": "ok"}),
        ))
        .unwrap();
        assert_eq!(unwrap_response(ok), Some(json!({"status": "ok"})));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let err = unwrap_request(json!({"jsonrpc": "1.0", "method": "x", "id": 3})).unwrap_err();
        assert_eq!(err.error.unwrap().code, INVALID_REQUEST);
        assert_eq!(err.id, Some(RpcId::Num(3)));
    }
}
