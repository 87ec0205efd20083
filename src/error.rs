//! Error types for the Sheets MCP server.
//!
//! Tool execution errors are returned with `is_error: true` in CallToolResult,
//! while protocol errors (unknown tool, malformed envelope) become JSON-RPC
//! error objects and transport errors become HTTP status codes.

use rmcp::model::{CallToolResult, Content};
use thiserror::Error;

/// Failure reported by the spreadsheet REST API (or by the HTTP layer under it).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ApiError {
    /// HTTP status returned by the API, if a response was received.
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Transport-level failure with no HTTP status.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self.status, Some(429 | 500 | 502 | 503 | 504))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::new(e.status().map(|s| s.as_u16()), e.to_string())
    }
}

/// Tool execution errors - returned with is_error: true in CallToolResult
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("No service account credentials on this request")]
    MissingCredentials,

    #[error("Failed to obtain access token: {0}")]
    TokenExchange(String),

    #[error("{}", describe_api_error(.0))]
    Api(#[from] ApiError),
}

impl ToolError {
    /// Convert to MCP CallToolResult with is_error: true
    pub fn to_tool_result(&self) -> CallToolResult {
        CallToolResult::error(vec![Content::text(format!("Error: {self}"))])
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        ToolError::InvalidParams(e.to_string())
    }
}

fn describe_api_error(e: &ApiError) -> String {
    let (summary, help) = match e.status {
        Some(401) => (
            "Authentication failed".to_string(),
            "Please check that your service account credentials are valid.".to_string(),
        ),
        Some(403) => (
            "Permission denied".to_string(),
            "Please ensure the service account has access to the spreadsheet. \
             Share the spreadsheet with the service account email address."
                .to_string(),
        ),
        Some(404) => (
            "Spreadsheet or range not found".to_string(),
            "Please check that the spreadsheet ID and range are correct. \
             The spreadsheet ID can be found in the URL: \
             https://docs.google.com/spreadsheets/d/[SPREADSHEET_ID]/edit"
                .to_string(),
        ),
        Some(429) => (
            "Rate limit exceeded".to_string(),
            "Too many requests. Please wait a moment and try again.".to_string(),
        ),
        Some(400) => (
            "Invalid request".to_string(),
            if e.message.is_empty() {
                "Please check your input parameters.".to_string()
            } else {
                e.message.clone()
            },
        ),
        _ if !e.message.is_empty() => (e.message.clone(), String::new()),
        _ => ("An unexpected error occurred".to_string(), String::new()),
    };
    if help.is_empty() {
        summary
    } else {
        format!("{summary}\n\n{help}")
    }
}
