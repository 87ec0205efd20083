//! JSON-RPC framing for the MCP wire protocol.
//!
//! Client messages decode into rmcp's `ClientJsonRpcMessage` and replies are
//! `ServerJsonRpcMessage`s. Only failures that happen before a request id is
//! known (parse errors, malformed envelopes, session errors) are framed here.

use rmcp::model::{ClientJsonRpcMessage, ClientRequest, ErrorCode, JsonRpcMessage, ProtocolVersion};
use rmcp::ErrorData as McpError;
use serde_json::{json, Value};

pub const JSONRPC_VERSION: &str = "2.0";

/// Server-defined error code used for missing or unknown sessions.
pub const SESSION_ERROR_CODE: ErrorCode = ErrorCode(-32000);

/// MCP protocol revisions this server can speak, newest first.
const SUPPORTED_PROTOCOL_VERSIONS: [ProtocolVersion; 3] = [
    ProtocolVersion::V_2025_06_18,
    ProtocolVersion::V_2025_03_26,
    ProtocolVersion::V_2024_11_05,
];

/// Request methods with typed parameters. A request naming one of these
/// that rmcp could only decode as a custom request had bad parameters.
pub const TYPED_METHODS: &[&str] = &["initialize", "ping", "tools/list", "tools/call", "logging/setLevel"];

/// Decode an already-parsed JSON body. Batches are not supported.
pub fn decode_message(value: Value) -> Result<ClientJsonRpcMessage, McpError> {
    if value.is_array() {
        return Err(invalid_request("Batch requests are not supported"));
    }
    serde_json::from_value(value)
        .map_err(|e| invalid_request(&format!("Invalid JSON-RPC message: {e}")))
}

/// A well-formed `initialize` request.
pub fn is_initialize_request(message: &ClientJsonRpcMessage) -> bool {
    matches!(
        message,
        JsonRpcMessage::Request(req) if matches!(req.request, ClientRequest::InitializeRequest(_))
    )
}

/// Error envelope with a `null` id.
pub fn failure(error: &McpError) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": Value::Null,
        "error": error,
    })
}

pub fn invalid_request(message: &str) -> McpError {
    McpError::invalid_request(message.to_string(), None)
}

pub fn parse_error(message: &str) -> McpError {
    McpError::parse_error(message.to_string(), None)
}

pub fn session_error(message: &str) -> McpError {
    McpError::new(SESSION_ERROR_CODE, message.to_string(), None)
}

/// Pick the protocol revision for a session: the client's if supported,
/// otherwise the newest one we know.
pub fn negotiate_protocol_version(requested: &ProtocolVersion) -> ProtocolVersion {
    let supported = SUPPORTED_PROTOCOL_VERSIONS;
    if supported.contains(requested) {
        requested.clone()
    } else {
        supported[0].clone()
    }
}
