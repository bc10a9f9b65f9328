//! Tool-call wire protocol — JSON-RPC style
//!
//! Wire format:
//!
//! Agent → Server (inbound call, POST keyed by session id):
//!   { "id": "req-7", "method": "report_status", "params": { "status": "working" } }
//!
//! Server → Agent (RPC response):
//!   { "id": "req-7", "result": { "ok": true } }
//!   { "id": "req-7", "error": { "code": -32602, "message": "missing field" } }
//!
//! Server → Agent (event on the session stream, no id):
//!   { "event": "endpoint", "data": { "url": "/toolcall/rpc/sess-..." } }

use serde::{Deserialize, Serialize};

/// JSON-RPC error codes used on the tool-call channel.
pub mod codes {
    pub const INVALID_PARAMS: i32 = -32602;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const ACCESS_DENIED: i32 = -32000;
    pub const SESSION_GONE: i32 = -32001;
    pub const NOT_FOUND: i32 = -32002;
    pub const CONFLICT: i32 = -32003;
}

/// RPC request from an agent.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// RPC response to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn method_not_found(id: impl Into<String>, method: &str) -> Self {
        Self::err(id, codes::METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::err(id, codes::INVALID_PARAMS, message)
    }

    pub fn access_denied(id: impl Into<String>, method: &str) -> Self {
        Self::err(
            id,
            codes::ACCESS_DENIED,
            format!("Access level does not permit: {method}"),
        )
    }
}

/// RPC error detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

/// Server-pushed event on a session's stream (no id, no request correlation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub event: String,
    pub data: serde_json::Value,
}

impl EventMessage {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// First event on every stream: where the agent posts its inbound calls.
    pub fn endpoint(url: &str) -> Self {
        Self::new("endpoint", serde_json::json!({ "url": url }))
    }

    /// Ask the agent to wind down gracefully.
    pub fn shutdown_request(reason: &str) -> Self {
        Self::new("shutdown_request", serde_json::json!({ "reason": reason }))
    }

    /// Free-text instruction from the captain.
    pub fn captain_message(text: &str) -> Self {
        Self::new("captain_message", serde_json::json!({ "text": text }))
    }

    /// Answer to a previously raised human-input request.
    pub fn human_input_answer(request_id: &str, answer: &str) -> Self {
        Self::new(
            "human_input_answer",
            serde_json::json!({ "request_id": request_id, "answer": answer }),
        )
    }

    /// Verdict on a stop-approval request.
    pub fn stop_approval_response(request_id: &str, approved: bool, response: Option<&str>) -> Self {
        Self::new(
            "stop_approval_response",
            serde_json::json!({
                "request_id": request_id,
                "approved": approved,
                "response": response,
            }),
        )
    }

    pub fn ping() -> Self {
        Self::new("ping", serde_json::json!({}))
    }
}

/// Out-of-band messages routed from tool-call handlers to the captain loop.
#[derive(Clone, Debug)]
pub enum CaptainSignal {
    /// A recon agent submitted a report (raw, unparsed payload).
    ReconReport {
        agent_id: String,
        payload: serde_json::Value,
    },
    /// Free-text signal from any agent.
    Message { agent_id: String, text: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_response_ok_omits_error() {
        let resp = RpcResponse::ok("r1", serde_json::json!({ "ok": true }));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""result""#));
        assert!(!json.contains(r#""error""#));
    }

    #[test]
    fn rpc_response_err_carries_code() {
        let resp = RpcResponse::invalid_params("r2", "missing field: status");
        assert_eq!(resp.error.as_ref().unwrap().code, codes::INVALID_PARAMS);
        assert!(resp.result.is_none());
    }

    #[test]
    fn rpc_request_default_params() {
        let req: RpcRequest =
            serde_json::from_str(r#"{ "id": "1", "method": "get_all_context" }"#).unwrap();
        assert_eq!(req.method, "get_all_context");
        assert!(req.params.is_null());
    }

    #[test]
    fn endpoint_event_shape() {
        let evt = EventMessage::endpoint("/toolcall/rpc/sess-1");
        assert_eq!(evt.event, "endpoint");
        assert_eq!(evt.data["url"], "/toolcall/rpc/sess-1");
    }
}
