//! Session table.
//!
//! One `SessionStore` exists per server and is handed to the dispatcher and
//! the reaper by the caller that builds them. All table operations are
//! synchronous and finish under a single lock acquisition; transports are
//! closed only after the lock is released.

use super::transport::{SessionHooks, SessionTransport};
use super::types::{SessionInfo, SessionStatus};
use crate::tool_registry::ToolRegistry;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Error type for session lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    UnknownSession(String),
    #[error("Session is being deleted: {0}")]
    Terminating(String),
    #[error("Session already has an open event stream: {0}")]
    StreamConflict(String),
}

struct SessionRecord {
    created_at: Instant,
    updated_at: Instant,
    created_at_utc: DateTime<Utc>,
    delete_requested: bool,
    in_flight: usize,
    transport: Arc<SessionTransport>,
}

impl SessionRecord {
    fn info(&self, id: &str, now: Instant) -> SessionInfo {
        SessionInfo {
            id: id.to_string(),
            status: if self.delete_requested {
                SessionStatus::Terminating
            } else {
                SessionStatus::Active
            },
            created_at: self.created_at_utc,
            idle_secs: now.saturating_duration_since(self.updated_at).as_secs(),
            in_flight: self.in_flight,
            opened: self.created_at,
            last_seen: self.updated_at,
        }
    }
}

struct StoreInner {
    sessions: Mutex<HashMap<String, SessionRecord>>,
    registry: Arc<ToolRegistry>,
}

impl StoreInner {
    fn sessions(&self) -> MutexGuard<'_, HashMap<String, SessionRecord>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, session_id: &str) {
        if let Some(record) = self.sessions().get_mut(session_id) {
            record.updated_at = Instant::now();
            record.in_flight = record.in_flight.saturating_sub(1);
        }
    }
}

impl SessionHooks for StoreInner {
    fn on_initialized(&self, transport: Arc<SessionTransport>) {
        let now = Instant::now();
        let id = transport.session_id().to_string();
        self.sessions().entry(id.clone()).or_insert(SessionRecord {
            created_at: now,
            updated_at: now,
            created_at_utc: Utc::now(),
            delete_requested: false,
            in_flight: 0,
            transport,
        });
        info!(session_id = %id, "Session registered");
    }

    fn on_closed(&self, session_id: &str) {
        if self.sessions().remove(session_id).is_some() {
            info!(session_id = %session_id, "Session removed after transport closed");
        }
    }
}

/// Handle to the session table. Clones share the same table.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

impl SessionStore {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                sessions: Mutex::new(HashMap::new()),
                registry,
            }),
        }
    }

    /// Transport of a known session, refreshed; otherwise a new transport
    /// with a fresh id. A new transport enters the table only once it has
    /// accepted an `initialize` request.
    pub fn get_or_create(&self, session_id: Option<&str>) -> Arc<SessionTransport> {
        if let Some(id) = session_id {
            if let Some(record) = self.inner.sessions().get_mut(id) {
                record.updated_at = Instant::now();
                return record.transport.clone();
            }
        }

        let id = Uuid::new_v4().to_string();
        debug!(session_id = %id, "Provisioning session transport");
        let hooks: Weak<dyn SessionHooks> = Arc::downgrade(&self.inner) as Weak<dyn SessionHooks>;
        Arc::new(SessionTransport::new(
            id,
            self.inner.registry.clone(),
            hooks,
        ))
    }

    /// Transport of a session that still accepts work, refreshed.
    pub fn lookup(&self, session_id: &str) -> Result<Arc<SessionTransport>, SessionError> {
        let mut sessions = self.inner.sessions();
        let record = live_record(&mut sessions, session_id)?;
        record.updated_at = Instant::now();
        Ok(record.transport.clone())
    }

    /// Start a request on an existing session. The returned guard keeps the
    /// session out of sweeps until it is dropped.
    pub fn begin_request(&self, session_id: &str) -> Result<RequestGuard, SessionError> {
        let mut sessions = self.inner.sessions();
        let record = live_record(&mut sessions, session_id)?;
        record.updated_at = Instant::now();
        record.in_flight += 1;
        Ok(RequestGuard {
            inner: self.inner.clone(),
            session_id: session_id.to_string(),
            transport: record.transport.clone(),
        })
    }

    /// Refresh a session's activity time. Unknown ids are ignored.
    pub fn touch(&self, session_id: &str) -> bool {
        match self.inner.sessions().get_mut(session_id) {
            Some(record) => {
                record.updated_at = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Flag a session for deletion. Returns `false` for unknown ids.
    pub fn mark_delete_requested(&self, session_id: &str) -> bool {
        match self.inner.sessions().get_mut(session_id) {
            Some(record) => {
                record.delete_requested = true;
                record.updated_at = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Remove a session and close its transport.
    pub fn remove(&self, session_id: &str) -> bool {
        let removed = self.inner.sessions().remove(session_id);
        match removed {
            Some(record) => {
                record.transport.close();
                true
            }
            None => false,
        }
    }

    /// Evict sessions idle longer than `idle_timeout` and sessions whose
    /// deletion was requested. Sessions with requests in flight are kept.
    pub fn sweep_at(&self, now: Instant, idle_timeout: Duration) -> Vec<String> {
        let evicted: Vec<(String, SessionRecord)> = {
            let mut sessions = self.inner.sessions();
            let expired: Vec<String> = sessions
                .iter()
                .filter(|(_, r)| r.in_flight == 0)
                .filter(|(_, r)| {
                    r.delete_requested
                        || now.saturating_duration_since(r.updated_at) > idle_timeout
                })
                .map(|(id, _)| id.clone())
                .collect();
            expired
                .into_iter()
                .filter_map(|id| sessions.remove(&id).map(|r| (id, r)))
                .collect()
        };

        evicted
            .into_iter()
            .map(|(id, record)| {
                info!(
                    session_id = %id,
                    reason = if record.delete_requested { "deleted" } else { "idle" },
                    "Evicting session"
                );
                record.transport.close();
                id
            })
            .collect()
    }

    /// Close every session. Used at shutdown.
    pub fn close_all(&self) -> usize {
        let drained: Vec<SessionRecord> = self.inner.sessions().drain().map(|(_, r)| r).collect();
        let count = drained.len();
        for record in drained {
            record.transport.close();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.inner.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.inner.sessions().contains_key(session_id)
    }

    pub fn snapshot(&self, session_id: &str) -> Option<SessionInfo> {
        let now = Instant::now();
        self.inner
            .sessions()
            .get(session_id)
            .map(|r| r.info(session_id, now))
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let now = Instant::now();
        let mut sessions: Vec<SessionInfo> = self
            .inner
            .sessions()
            .iter()
            .map(|(id, r)| r.info(id, now))
            .collect();
        sessions.sort_by_key(|s| s.opened);
        sessions
    }
}

fn live_record<'a>(
    sessions: &'a mut HashMap<String, SessionRecord>,
    session_id: &str,
) -> Result<&'a mut SessionRecord, SessionError> {
    match sessions.get_mut(session_id) {
        None => Err(SessionError::UnknownSession(session_id.to_string())),
        Some(r) if r.delete_requested => Err(SessionError::Terminating(session_id.to_string())),
        Some(r) => Ok(r),
    }
}

/// An in-flight request on a session. Dropping it refreshes the session and
/// settles the in-flight count, also when the request future is cancelled.
pub struct RequestGuard {
    inner: Arc<StoreInner>,
    session_id: String,
    transport: Arc<SessionTransport>,
}

impl RequestGuard {
    pub fn transport(&self) -> &Arc<SessionTransport> {
        &self.transport
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.inner.settle(&self.session_id);
    }
}
