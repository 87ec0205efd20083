//! Per-session protocol handler.
//!
//! A `SessionTransport` is created for a client's `initialize` request and
//! bound to the session record for the rest of the session's life. It runs
//! the MCP lifecycle for that client and owns the session's standalone SSE
//! stream. Message handling is serialized per session by the protocol state
//! lock; the stream is not covered by it.

use super::store::SessionError;
use crate::context::RequestContext;
use crate::protocol;
use crate::tool_registry::{self, ToolRegistry};
use bytes::Bytes;
use rmcp::model::{
    ClientJsonRpcMessage, ClientNotification, ClientRequest, ErrorCode, Implementation,
    InitializeRequestParam, InitializeResult, JsonRpcMessage, ListToolsResult, LoggingLevel,
    LoggingMessageNotificationParam, Notification, ProtocolVersion, ServerCapabilities,
    ServerJsonRpcMessage, ServerNotification, ServerResult,
};
use rmcp::ErrorData as McpError;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Buffered server-to-client messages per SSE stream.
const STREAM_CAPACITY: usize = 64;
const SERVER_NAME: &str = env!("CARGO_PKG_NAME");
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Failures of the transport itself, as opposed to protocol errors which
/// are answered in-band.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("session transport is closed")]
    Closed,
    #[error("session {0} could not be registered")]
    Unregistered(String),
}

/// Callbacks into the owner of the session table.
pub(crate) trait SessionHooks: Send + Sync {
    /// The transport accepted its `initialize` request.
    fn on_initialized(&self, transport: Arc<SessionTransport>);
    /// The transport closed; drop its record.
    fn on_closed(&self, session_id: &str);
}

/// Rank of a logging level, lowest first.
fn severity(level: LoggingLevel) -> u8 {
    match level {
        LoggingLevel::Debug => 0,
        LoggingLevel::Info => 1,
        LoggingLevel::Notice => 2,
        LoggingLevel::Warning => 3,
        LoggingLevel::Error => 4,
        LoggingLevel::Critical => 5,
        LoggingLevel::Alert => 6,
        LoggingLevel::Emergency => 7,
    }
}

fn server_info(protocol_version: ProtocolVersion) -> InitializeResult {
    InitializeResult {
        protocol_version,
        capabilities: ServerCapabilities::builder()
            .enable_logging()
            .enable_tools()
            .build(),
        server_info: Implementation {
            name: SERVER_NAME.to_string(),
            version: SERVER_VERSION.to_string(),
            ..Default::default()
        },
        instructions: Some(tool_registry::instructions()),
    }
}

struct ProtocolState {
    protocol_version: Option<ProtocolVersion>,
    client_ready: bool,
    log_level: LoggingLevel,
}

pub struct SessionTransport {
    session_id: String,
    registry: Arc<ToolRegistry>,
    hooks: Weak<dyn SessionHooks>,
    state: tokio::sync::Mutex<ProtocolState>,
    stream: Mutex<Option<mpsc::Sender<Bytes>>>,
    closed: AtomicBool,
}

impl SessionTransport {
    pub(crate) fn new(
        session_id: String,
        registry: Arc<ToolRegistry>,
        hooks: Weak<dyn SessionHooks>,
    ) -> Self {
        Self {
            session_id,
            registry,
            hooks,
            state: tokio::sync::Mutex::new(ProtocolState {
                protocol_version: None,
                client_ready: false,
                log_level: LoggingLevel::Info,
            }),
            stream: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Handle one client message. Requests produce a JSON-RPC response;
    /// notifications and client responses produce nothing.
    pub async fn handle_message(
        self: &Arc<Self>,
        ctx: RequestContext,
        message: ClientJsonRpcMessage,
    ) -> Result<Option<ServerJsonRpcMessage>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut state = self.state.lock().await;

        match message {
            JsonRpcMessage::Request(req) => {
                let id = req.id;
                debug!(
                    session_id = %self.session_id,
                    request_id = %ctx.request_id(),
                    method = req.request.method(),
                    "Handling request"
                );
                let outcome = match req.request {
                    ClientRequest::InitializeRequest(init) => {
                        self.initialize(&mut state, init.params)?
                    }
                    _ if state.protocol_version.is_none() => {
                        Err(McpError::invalid_request("Session not initialized", None))
                    }
                    request => self.dispatch(&mut state, ctx, request).await,
                };
                Ok(Some(match outcome {
                    Ok(result) => ServerJsonRpcMessage::response(result, id),
                    Err(e) => ServerJsonRpcMessage::error(e, id),
                }))
            }
            JsonRpcMessage::Notification(note) => {
                match note.notification {
                    ClientNotification::InitializedNotification(_) => state.client_ready = true,
                    ClientNotification::CancelledNotification(cancel) => debug!(
                        session_id = %self.session_id,
                        request_id = %cancel.params.request_id,
                        "Client cancelled a request"
                    ),
                    other => debug!(
                        session_id = %self.session_id,
                        notification = ?other,
                        "Ignoring notification"
                    ),
                }
                Ok(None)
            }
            JsonRpcMessage::Response(resp) => {
                debug!(session_id = %self.session_id, id = %resp.id, "Ignoring client response");
                Ok(None)
            }
            JsonRpcMessage::Error(err) => {
                debug!(
                    session_id = %self.session_id,
                    id = %err.id,
                    code = err.error.code.0,
                    "Client reported an error"
                );
                Ok(None)
            }
        }
    }

    fn initialize(
        self: &Arc<Self>,
        state: &mut ProtocolState,
        params: InitializeRequestParam,
    ) -> Result<Result<ServerResult, McpError>, TransportError> {
        if state.protocol_version.is_some() {
            return Ok(Err(McpError::invalid_request(
                "Server already initialized",
                None,
            )));
        }

        let hooks = self
            .hooks
            .upgrade()
            .ok_or_else(|| TransportError::Unregistered(self.session_id.clone()))?;
        let version = protocol::negotiate_protocol_version(&params.protocol_version);
        state.protocol_version = Some(version.clone());
        hooks.on_initialized(self.clone());

        info!(
            session_id = %self.session_id,
            client = %params.client_info.name,
            protocol_version = %version,
            "Session initialized"
        );
        Ok(Ok(ServerResult::InitializeResult(server_info(version))))
    }

    async fn dispatch(
        &self,
        state: &mut ProtocolState,
        ctx: RequestContext,
        request: ClientRequest,
    ) -> Result<ServerResult, McpError> {
        match request {
            ClientRequest::PingRequest(_) => Ok(ServerResult::empty(())),
            ClientRequest::ListToolsRequest(_) => Ok(ServerResult::ListToolsResult(ListToolsResult {
                tools: self.registry.list(),
                ..Default::default()
            })),
            ClientRequest::CallToolRequest(call) => {
                let name = call.params.name;
                let result = self
                    .registry
                    .call(&name, ctx, call.params.arguments)
                    .await
                    .ok_or_else(|| McpError::invalid_params(format!("Unknown tool: {name}"), None))?;
                if result.is_error == Some(true) {
                    self.log(
                        state,
                        LoggingLevel::Warning,
                        json!({ "tool": name, "message": "tool call failed" }),
                    );
                }
                Ok(ServerResult::CallToolResult(result))
            }
            ClientRequest::SetLevelRequest(set) => {
                state.log_level = set.params.level;
                Ok(ServerResult::empty(()))
            }
            ClientRequest::CustomRequest(custom)
                if protocol::TYPED_METHODS.contains(&custom.method.as_str()) =>
            {
                Err(McpError::invalid_params(
                    format!("Invalid params for {}", custom.method),
                    None,
                ))
            }
            other => Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("Method not found: {}", other.method()),
                None,
            )),
        }
    }

    fn log(&self, state: &ProtocolState, level: LoggingLevel, data: Value) {
        if severity(level) < severity(state.log_level) {
            return;
        }
        let params = LoggingMessageNotificationParam {
            level,
            logger: Some(SERVER_NAME.to_string()),
            data,
        };
        self.notify(&ServerJsonRpcMessage::notification(
            ServerNotification::LoggingMessageNotification(Notification::new(params)),
        ));
    }

    /// Push a message onto the session's SSE stream. Returns `false` when no
    /// stream is open or the stream is backed up.
    pub fn notify(&self, message: &ServerJsonRpcMessage) -> bool {
        let Ok(data) = serde_json::to_string(message) else {
            return false;
        };
        let stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        match stream.as_ref() {
            Some(tx) => tx.try_send(sse_frame(&data)).is_ok(),
            None => false,
        }
    }

    /// Open the standalone server-to-client stream. Only one may be open at
    /// a time; the stream ends when the transport closes.
    pub fn open_stream(
        &self,
        keep_alive: Option<Duration>,
    ) -> Result<mpsc::Receiver<Bytes>, SessionError> {
        if self.is_closed() {
            return Err(SessionError::UnknownSession(self.session_id.clone()));
        }
        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        if stream.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(SessionError::StreamConflict(self.session_id.clone()));
        }

        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        if let Some(period) = keep_alive {
            let weak = tx.downgrade();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(period).await;
                    let Some(tx) = weak.upgrade() else { break };
                    if tx.send(Bytes::from_static(b": keep-alive\n\n")).await.is_err() {
                        break;
                    }
                }
            });
        }
        *stream = Some(tx);
        debug!(session_id = %self.session_id, "SSE stream opened");
        Ok(rx)
    }

    /// Close the transport: end its stream and unregister its record.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(hooks) = self.hooks.upgrade() {
            hooks.on_closed(&self.session_id);
        } else {
            warn!(session_id = %self.session_id, "Session table gone before transport closed");
        }
        debug!(session_id = %self.session_id, "Session transport closed");
    }
}

fn sse_frame(data: &str) -> Bytes {
    Bytes::from(format!("event: message\ndata: {data}\n\n"))
}
