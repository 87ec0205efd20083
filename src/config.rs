//! Server configuration.

use crate::sheets::DEFAULT_SHEETS_BASE_URL;
use std::collections::HashSet;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_MCP_PATH: &str = "/mcp";
pub const DEFAULT_SSE_KEEP_ALIVE_SECS: u64 = 15;
/// Largest POST body the endpoint will buffer.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Path of the single MCP endpoint.
    pub path: String,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    /// `None` disables SSE keep-alive comments.
    pub sse_keep_alive: Option<Duration>,
    /// POST bodies above this size are refused with 413.
    pub max_body_bytes: usize,
    /// Allowed `Origin` values. Empty allows any origin.
    pub allowed_origins: HashSet<String>,
    pub sheets_base_url: String,
    /// Overrides the token endpoint named in each credential.
    pub token_uri: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            path: DEFAULT_MCP_PATH.to_string(),
            idle_timeout: crate::session::DEFAULT_IDLE_TIMEOUT,
            sweep_interval: crate::session::DEFAULT_SWEEP_INTERVAL,
            sse_keep_alive: keep_alive_from_secs(DEFAULT_SSE_KEEP_ALIVE_SECS),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            allowed_origins: HashSet::new(),
            sheets_base_url: DEFAULT_SHEETS_BASE_URL.to_string(),
            token_uri: None,
        }
    }
}

/// Parse a listening port, falling back to [`DEFAULT_PORT`] on bad input.
pub fn parse_port(raw: &str) -> u16 {
    match raw.trim().parse::<u16>() {
        Ok(port) if port != 0 => port,
        _ => {
            warn!(value = raw, default = DEFAULT_PORT, "Invalid port, using default");
            DEFAULT_PORT
        }
    }
}

pub fn keep_alive_from_secs(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

/// Trim and de-duplicate a comma-split origin list, dropping empty entries.
pub fn parse_origins<I, S>(values: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .map(|s| s.as_ref().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Endpoint paths always start with a slash and never end with one.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_MCP_PATH.to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
