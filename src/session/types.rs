//! Session info types.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

/// Status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session accepts requests.
    Active,
    /// Client asked for deletion; the next sweep removes the session.
    Terminating,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Terminating => write!(f, "terminating"),
        }
    }
}

/// Point-in-time view of one session record.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Unique session identifier.
    pub id: String,
    pub status: SessionStatus,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Seconds since the last request touched the session.
    pub idle_secs: u64,
    /// Requests currently executing against the session.
    pub in_flight: usize,
    #[serde(skip)]
    pub opened: Instant,
    #[serde(skip)]
    pub last_seen: Instant,
}
