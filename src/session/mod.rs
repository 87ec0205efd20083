//! Session multiplexing.
//!
//! One server process serves many MCP clients. Each client gets a session
//! id at initialization; the id selects the session's transport for every
//! later request.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │  McpHttpService (dispatcher)                          │
//! │    ├─ no session header + initialize → get_or_create  │
//! │    └─ session header → begin_request / lookup         │
//! │                                                       │
//! │  SessionStore                                         │
//! │    └─ sessions: HashMap<String, SessionRecord>        │
//! │         └─ transport: Arc<SessionTransport>           │
//! │                                                       │
//! │  Reaper task ── sweep_at(now) every interval          │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! A transport registers its own record once it accepts `initialize` and
//! removes it again when it closes.

mod reaper;
mod store;
mod transport;
mod types;

pub use reaper::{spawn_reaper, DEFAULT_IDLE_TIMEOUT, DEFAULT_SWEEP_INTERVAL};
pub use store::{RequestGuard, SessionError, SessionStore};
pub use transport::{SessionTransport, TransportError};
pub use types::{SessionInfo, SessionStatus};

#[cfg(test)]
pub(crate) use store::tests as store_tests;
