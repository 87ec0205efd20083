//! Streamable HTTP endpoint.
//!
//! `McpHttpService` routes every request on the MCP path by HTTP method and
//! `mcp-session-id` header:
//!
//! - `POST` without a session carrying `initialize` creates a session.
//! - `POST` with a live session forwards the message to its transport.
//! - `GET` with a live session opens the session's SSE stream.
//! - `DELETE` flags the session; the reaper removes it.
//!
//! The full stack is `OriginCheckService` → `AuthGateService` → `McpHttpService`.

mod origin;
pub mod response;

pub use origin::OriginCheckService;

use crate::auth::AuthGateService;
use crate::config::ServerConfig;
use crate::context::RequestContext;
use crate::protocol;
use crate::session::{SessionError, SessionStore, SessionTransport};
use bytes::Bytes;
use http_body::{Body, Frame};
use http_body_util::{BodyExt, LengthLimitError, Limited, StreamBody};
use hyper::header::{HeaderValue, ACCEPT, ALLOW};
use hyper::http::{HeaderMap, Method, Request, Response, StatusCode};
use response::{
    empty_response, json_response, sse_message_response, sse_stream_response, text_response,
    ResponseBody, JSON_CONTENT_TYPE, SSE_CONTENT_TYPE,
};
use rmcp::model::ClientJsonRpcMessage;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_service::Service;
use tracing::{debug, error, info};

/// Header carrying the session id in both directions.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

const NO_VALID_SESSION: &str = "Bad Request: No valid session ID provided";
const INTERNAL_FAILURE: &str = "Failed to handle request";

type BoxError = Box<dyn StdError + Send + Sync>;

/// The complete middleware chain served on every connection.
pub type HttpStack = OriginCheckService<AuthGateService<McpHttpService>>;

/// Build the service stack for `config` on top of `store`.
pub fn build_service(store: SessionStore, config: &ServerConfig) -> HttpStack {
    let dispatcher = McpHttpService::new(store, config.path.clone(), config.sse_keep_alive)
        .with_max_body_bytes(config.max_body_bytes);
    OriginCheckService::new(
        AuthGateService::new(dispatcher),
        Arc::new(config.allowed_origins.clone()),
    )
}

/// Protocol dispatcher.
#[derive(Clone)]
pub struct McpHttpService {
    store: SessionStore,
    path: Arc<str>,
    sse_keep_alive: Option<Duration>,
    max_body_bytes: usize,
}

impl McpHttpService {
    pub fn new(
        store: SessionStore,
        path: impl Into<String>,
        sse_keep_alive: Option<Duration>,
    ) -> Self {
        Self {
            store,
            path: Arc::from(path.into()),
            sse_keep_alive,
            max_body_bytes: crate::config::DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    async fn route<B>(self, req: Request<B>) -> Response<ResponseBody>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        if req.uri().path() != &*self.path {
            return text_response(StatusCode::NOT_FOUND, "Not Found");
        }
        let ctx = req
            .extensions()
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_else(RequestContext::anonymous);

        match req.method() {
            &Method::POST => self.handle_post(req, ctx).await,
            &Method::GET => self.handle_get(req.headers()),
            &Method::DELETE => self.handle_delete(req.headers()),
            _ => {
                let mut resp = text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
                resp.headers_mut()
                    .insert(ALLOW, HeaderValue::from_static("GET, POST, DELETE"));
                resp
            }
        }
    }

    async fn handle_post<B>(&self, req: Request<B>, ctx: RequestContext) -> Response<ResponseBody>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let session_id = session_header(req.headers());
        let sse_reply = prefers_sse_reply(req.headers());

        let body = match Limited::new(req.into_body(), self.max_body_bytes).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<LengthLimitError>() => {
                debug!(limit = self.max_body_bytes, "Request body too large");
                return json_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    &protocol::failure(&protocol::invalid_request("Request body too large")),
                );
            }
            Err(e) => {
                debug!(error = %e, "Failed to read request body");
                return rpc_error(protocol::parse_error(&format!("Failed to read body: {e}")));
            }
        };
        let value: Value = match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(e) => return rpc_error(protocol::parse_error(&format!("Parse error: {e}"))),
        };
        let message = match protocol::decode_message(value) {
            Ok(message) => message,
            Err(e) => return rpc_error(e),
        };

        match session_id {
            Some(id) => {
                let guard = match self.store.begin_request(&id) {
                    Ok(guard) => guard,
                    Err(e) => {
                        debug!(session_id = %id, error = %e, "Rejecting POST");
                        return rpc_error(protocol::session_error(NO_VALID_SESSION));
                    }
                };
                let transport = guard.transport().clone();
                self.forward(&transport, ctx, message, sse_reply).await
            }
            None if protocol::is_initialize_request(&message) => {
                let transport = self.store.get_or_create(None);
                let resp = self.forward(&transport, ctx, message, sse_reply).await;
                self.store.touch(transport.session_id());
                resp
            }
            None => {
                debug!("POST without session header");
                rpc_error(protocol::session_error(NO_VALID_SESSION))
            }
        }
    }

    async fn forward(
        &self,
        transport: &Arc<SessionTransport>,
        ctx: RequestContext,
        message: ClientJsonRpcMessage,
        sse_reply: bool,
    ) -> Response<ResponseBody> {
        let session_id = transport.session_id();
        let request_id = ctx.request_id().to_string();
        match transport.handle_message(ctx, message).await {
            Ok(Some(reply)) => {
                let resp = if sse_reply {
                    sse_message_response(StatusCode::OK, &reply)
                } else {
                    json_response(StatusCode::OK, &reply)
                };
                with_session_header(resp, session_id)
            }
            Ok(None) => with_session_header(empty_response(StatusCode::ACCEPTED), session_id),
            Err(e) => {
                error!(
                    session_id = %session_id,
                    request_id = %request_id,
                    error = %e,
                    "Session transport failed"
                );
                json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &json!({ "error": INTERNAL_FAILURE }),
                )
            }
        }
    }

    fn handle_get(&self, headers: &HeaderMap) -> Response<ResponseBody> {
        let transport = match session_header(headers).map(|id| self.store.lookup(&id)) {
            Some(Ok(transport)) => transport,
            _ => return text_response(StatusCode::BAD_REQUEST, "Invalid or missing session ID"),
        };
        if !accepts(headers, SSE_CONTENT_TYPE) {
            return text_response(
                StatusCode::NOT_ACCEPTABLE,
                "Not Acceptable: Client must accept text/event-stream",
            );
        }

        match transport.open_stream(self.sse_keep_alive) {
            Ok(rx) => {
                let frames = ReceiverStream::new(rx).map(|chunk| Ok::<_, Infallible>(Frame::data(chunk)));
                let body = StreamBody::new(frames).boxed();
                with_session_header(sse_stream_response(body), transport.session_id())
            }
            Err(SessionError::StreamConflict(id)) => {
                debug!(session_id = %id, "Second SSE stream refused");
                text_response(
                    StatusCode::CONFLICT,
                    "Conflict: Only one SSE stream is allowed per session",
                )
            }
            Err(_) => text_response(StatusCode::BAD_REQUEST, "Invalid or missing session ID"),
        }
    }

    fn handle_delete(&self, headers: &HeaderMap) -> Response<ResponseBody> {
        match session_header(headers) {
            Some(id) if self.store.mark_delete_requested(&id) => {
                info!(session_id = %id, "Session deletion requested");
                with_session_header(text_response(StatusCode::OK, "Session deleted"), &id)
            }
            _ => text_response(StatusCode::BAD_REQUEST, "Invalid session ID"),
        }
    }
}

impl<B> Service<Request<B>> for McpHttpService
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = Response<ResponseBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { Ok(this.route(req).await) })
    }
}

fn rpc_error(error: rmcp::ErrorData) -> Response<ResponseBody> {
    json_response(StatusCode::BAD_REQUEST, &protocol::failure(&error))
}

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn with_session_header(mut resp: Response<ResponseBody>, session_id: &str) -> Response<ResponseBody> {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        resp.headers_mut().insert(SESSION_ID_HEADER, value);
    }
    resp
}

/// Media types listed in `Accept`, lowercased and without parameters.
fn accepted_types(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|t| t.split(';').next())
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn accepts(headers: &HeaderMap, media_type: &str) -> bool {
    let (major, _) = media_type.split_once('/').unwrap_or((media_type, ""));
    let wildcard = format!("{major}/*");
    accepted_types(headers)
        .iter()
        .any(|t| t == media_type || t == "*/*" || *t == wildcard)
}

/// A single reply goes out as SSE only for clients that accept SSE but
/// not JSON.
fn prefers_sse_reply(headers: &HeaderMap) -> bool {
    let types = accepted_types(headers);
    types.iter().any(|t| t == SSE_CONTENT_TYPE) && !accepts(headers, JSON_CONTENT_TYPE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::{bearer_header, service_account_json};
    use crate::session::store_tests::open_session;
    use crate::sheets::mock::MockSheetsApi;
    use crate::tool_registry::ToolRegistry;
    use http_body_util::Full;
    use hyper::header::{AUTHORIZATION, CONTENT_TYPE, ORIGIN};
    use std::collections::HashSet;
    use tokio::time::Instant;

    struct Harness {
        api: Arc<MockSheetsApi>,
        store: SessionStore,
        service: HttpStack,
    }

    fn harness_with(api: MockSheetsApi, config: ServerConfig) -> Harness {
        let api = Arc::new(api);
        let registry = Arc::new(ToolRegistry::with_sheets_tools(api.clone()));
        let store = SessionStore::new(registry);
        let service = build_service(store.clone(), &config);
        Harness {
            api,
            store,
            service,
        }
    }

    fn harness() -> Harness {
        harness_with(MockSheetsApi::new(), ServerConfig::default())
    }

    fn authorized(method: Method, session: Option<&str>) -> hyper::http::request::Builder {
        let mut builder = Request::builder()
            .method(method)
            .uri("/mcp")
            .header(AUTHORIZATION, bearer_header(&service_account_json()))
            .header(ACCEPT, "application/json, text/event-stream");
        if let Some(id) = session {
            builder = builder.header(SESSION_ID_HEADER, id);
        }
        builder
    }

    fn post(session: Option<&str>, body: Value) -> Request<Full<Bytes>> {
        authorized(Method::POST, session)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap()
    }

    fn empty(method: Method, session: Option<&str>) -> Request<Full<Bytes>> {
        authorized(method, session).body(Full::new(Bytes::new())).unwrap()
    }

    fn rpc(id: i64, method: &str, params: Value) -> Value {
        json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
    }

    fn init() -> Value {
        rpc(
            1,
            "initialize",
            json!({
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": { "name": "test-client", "version": "0.0.1" },
            }),
        )
    }

    impl Harness {
        async fn send(&self, req: Request<Full<Bytes>>) -> Response<ResponseBody> {
            let mut service = self.service.clone();
            service.call(req).await.unwrap()
        }

        async fn initialize(&self) -> String {
            let resp = self.send(post(None, init())).await;
            assert_eq!(resp.status(), StatusCode::OK);
            resp.headers()[SESSION_ID_HEADER].to_str().unwrap().to_string()
        }
    }

    async fn body_json(resp: Response<ResponseBody>) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(resp: Response<ResponseBody>) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_creates_session() {
        let h = harness();
        let resp = h.send(post(None, init())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let id = resp.headers()[SESSION_ID_HEADER].to_str().unwrap().to_string();
        let body = body_json(resp).await;
        assert_eq!(body["result"]["protocolVersion"], json!("2025-03-26"));
        assert!(h.store.contains(&id));

        let resp = h.send(post(Some(&id), rpc(2, "tools/list", json!({})))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[SESSION_ID_HEADER], id.as_str());
        let body = body_json(resp).await;
        assert!(!body["result"]["tools"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resumed_requests_never_add_sessions() {
        let h = harness();
        let id = h.initialize().await;
        for i in 0..5 {
            let resp = h.send(post(Some(&id), rpc(10 + i, "ping", json!({})))).await;
            assert_eq!(resp.status(), StatusCode::OK);
        }
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn test_tool_call_scenario() {
        let h = harness();
        h.api.respond(Ok(json!({
            "range": "Sheet1!A1:B1",
            "values": [["x", "y"]],
        })));
        let s1 = h.initialize().await;

        let call = rpc(
            2,
            "tools/call",
            json!({
                "name": "sheets_get_values",
                "arguments": { "spreadsheetId": "abc", "range": "Sheet1!A1:B1" },
            }),
        );
        let resp = h.send(post(Some(&s1), call.clone())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_ne!(body["result"]["isError"], json!(true));
        let text = body["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("\"rowCount\": 1"));

        assert_eq!(h.store.len(), 1);
        let info = h.store.snapshot(&s1).unwrap();
        assert!(info.last_seen > info.opened);
        assert_eq!(h.api.calls()[0].0, "robot@demo-project.iam.gserviceaccount.com");

        let resp = h.send(post(Some("S2"), call)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], json!(-32000));
        assert_eq!(h.store.len(), 1);
        assert_eq!(h.api.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_session_is_rejected_for_every_method() {
        let h = harness();

        let resp = h.send(post(Some("nope"), rpc(1, "ping", json!({})))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["code"], json!(-32000));

        let resp = h.send(empty(Method::GET, Some("nope"))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(resp).await, "Invalid or missing session ID");

        let resp = h.send(empty(Method::DELETE, Some("nope"))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(resp).await, "Invalid session ID");

        let resp = h.send(empty(Method::GET, None)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_non_initialize_without_session_is_rejected() {
        let h = harness();
        let resp = h.send(post(None, rpc(1, "tools/list", json!({})))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], json!(-32000));
        assert_eq!(body["error"]["message"], json!(NO_VALID_SESSION));
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_bad_credentials_never_reach_dispatcher() {
        let h = harness();

        let missing = Request::builder()
            .method(Method::POST)
            .uri("/mcp")
            .body(Full::new(Bytes::from(init().to_string())))
            .unwrap();
        let resp = h.send(missing).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(resp).await["error"],
            json!("Authorization header is required")
        );

        let mut wrong_type = service_account_json();
        wrong_type["type"] = json!("authorized_user");
        for header in [
            "Basic abc".to_string(),
            "Bearer".to_string(),
            "Bearer !!!not-base64!!!".to_string(),
            bearer_header(&wrong_type),
        ] {
            let req = Request::builder()
                .method(Method::POST)
                .uri("/mcp")
                .header(AUTHORIZATION, header)
                .body(Full::new(Bytes::from(init().to_string())))
                .unwrap();
            let resp = h.send(req).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        }

        assert!(h.store.is_empty());
        assert_eq!(h.api.call_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_is_deferred_until_sweep() {
        let h = harness();
        let id = h.initialize().await;

        let resp = h.send(empty(Method::DELETE, Some(&id))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "Session deleted");
        assert!(h.store.contains(&id));

        let resp = h.send(post(Some(&id), rpc(2, "ping", json!({})))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["code"], json!(-32000));

        let resp = h.send(empty(Method::DELETE, Some(&id))).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let evicted = h.store.sweep_at(Instant::now(), Duration::from_secs(600));
        assert_eq!(evicted, vec![id.clone()]);
        assert!(!h.store.contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_evicted_session_is_rejected() {
        let h = harness();
        let id = h.initialize().await;

        tokio::time::advance(Duration::from_secs(601)).await;
        let evicted = h.store.sweep_at(Instant::now(), Duration::from_secs(600));
        assert_eq!(evicted, vec![id.clone()]);

        let resp = h.send(post(Some(&id), rpc(2, "ping", json!({})))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], json!(-32000));
        assert_eq!(body["error"]["message"], json!(NO_VALID_SESSION));

        let resp = h.send(empty(Method::GET, Some(&id))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_requests_on_one_session_are_serialized() {
        let h = harness_with(
            MockSheetsApi::with_delay(Duration::from_millis(50)),
            ServerConfig::default(),
        );
        let id = h.initialize().await;
        let call = |n: i64| {
            post(
                Some(&id),
                rpc(
                    n,
                    "tools/call",
                    json!({ "name": "sheets_get_metadata", "arguments": { "spreadsheetId": "abc" } }),
                ),
            )
        };

        let (a, b) = tokio::join!(h.send(call(2)), h.send(call(3)));
        assert_eq!(a.status(), StatusCode::OK);
        assert_eq!(b.status(), StatusCode::OK);
        assert_eq!(h.api.call_count(), 2);
        assert_eq!(h.api.max_concurrency(), 1);
        assert_eq!(h.store.snapshot(&id).unwrap().in_flight, 0);
    }

    #[tokio::test]
    async fn test_separate_sessions_run_concurrently() {
        let h = harness_with(
            MockSheetsApi::with_delay(Duration::from_millis(50)),
            ServerConfig::default(),
        );
        let first = h.initialize().await;
        let second = h.initialize().await;
        assert_ne!(first, second);
        let call = |id: &str| {
            post(
                Some(id),
                rpc(
                    2,
                    "tools/call",
                    json!({ "name": "sheets_get_metadata", "arguments": { "spreadsheetId": "abc" } }),
                ),
            )
        };

        tokio::join!(h.send(call(&first)), h.send(call(&second)));
        assert_eq!(h.api.max_concurrency(), 2);
    }

    #[tokio::test]
    async fn test_notifications_are_accepted() {
        let h = harness();
        let id = h.initialize().await;
        let note = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
        let resp = h.send(post(Some(&id), note)).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(resp.headers()[SESSION_ID_HEADER], id.as_str());
        assert!(body_text(resp).await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_bodies() {
        let h = harness();
        let req = authorized(Method::POST, None)
            .body(Full::new(Bytes::from_static(b"{not json")))
            .unwrap();
        let resp = h.send(req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["code"], json!(-32700));

        let resp = h.send(post(None, json!({ "hello": "world" }))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["code"], json!(-32600));
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_body_is_refused() {
        let config = ServerConfig {
            max_body_bytes: 1024,
            ..ServerConfig::default()
        };
        let h = harness_with(MockSheetsApi::new(), config);

        let mut padded = init();
        padded["params"]["clientInfo"]["name"] = json!("x".repeat(4096));
        let resp = h.send(post(None, padded)).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body_json(resp).await["error"]["code"], json!(-32600));
        assert!(h.store.is_empty());

        h.initialize().await;
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_is_generic_500() {
        let h = harness();
        let transport = h.store.get_or_create(None);
        transport.close();

        let dispatcher = McpHttpService::new(h.store.clone(), "/mcp", None);
        let message = protocol::decode_message(init()).unwrap();
        let resp = dispatcher
            .forward(&transport, RequestContext::anonymous(), message, false)
            .await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(resp.headers().get(SESSION_ID_HEADER).is_none());
        let body = body_json(resp).await;
        assert_eq!(body, json!({ "error": "Failed to handle request" }));
    }

    #[tokio::test]
    async fn test_sse_only_client_gets_sse_framed_reply() {
        let h = harness();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/mcp")
            .header(AUTHORIZATION, bearer_header(&service_account_json()))
            .header(ACCEPT, SSE_CONTENT_TYPE)
            .body(Full::new(Bytes::from(init().to_string())))
            .unwrap();
        let resp = h.send(req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[CONTENT_TYPE], SSE_CONTENT_TYPE);
        let text = body_text(resp).await;
        assert!(text.starts_with("event: message\ndata: {"));
        assert!(text.ends_with("\n\n"));
    }

    #[tokio::test]
    async fn test_get_opens_single_stream() {
        let h = harness();
        let id = h.initialize().await;

        let first = h.send(empty(Method::GET, Some(&id))).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()[CONTENT_TYPE], SSE_CONTENT_TYPE);

        let second = h.send(empty(Method::GET, Some(&id))).await;
        assert_eq!(second.status(), StatusCode::CONFLICT);

        // Eviction closes the transport, which ends the open stream.
        assert!(h.store.remove(&id));
        let text = body_text(first).await;
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn test_get_requires_event_stream_accept() {
        let h = harness();
        let id = h.initialize().await;
        let req = Request::builder()
            .method(Method::GET)
            .uri("/mcp")
            .header(AUTHORIZATION, bearer_header(&service_account_json()))
            .header(ACCEPT, JSON_CONTENT_TYPE)
            .header(SESSION_ID_HEADER, id.as_str())
            .body(Full::new(Bytes::new()))
            .unwrap();
        let resp = h.send(req).await;
        assert_eq!(resp.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn test_other_methods_and_paths() {
        let h = harness();
        let resp = h.send(empty(Method::PUT, None)).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(resp.headers()[ALLOW], "GET, POST, DELETE");

        let req = Request::builder()
            .method(Method::POST)
            .uri("/other")
            .header(AUTHORIZATION, bearer_header(&service_account_json()))
            .body(Full::new(Bytes::from(init().to_string())))
            .unwrap();
        let resp = h.send(req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_origin_allow_list() {
        let config = ServerConfig {
            allowed_origins: HashSet::from(["http://localhost".to_string()]),
            ..ServerConfig::default()
        };
        let h = harness_with(MockSheetsApi::new(), config);

        let req = authorized(Method::POST, None)
            .header(ORIGIN, "http://evil.test")
            .body(Full::new(Bytes::from(init().to_string())))
            .unwrap();
        assert_eq!(h.send(req).await.status(), StatusCode::FORBIDDEN);

        let req = authorized(Method::POST, None)
            .header(ORIGIN, "http://localhost")
            .body(Full::new(Bytes::from(init().to_string())))
            .unwrap();
        assert_eq!(h.send(req).await.status(), StatusCode::OK);
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn test_session_opened_in_store_is_reachable_over_http() {
        let h = harness();
        let id = open_session(&h.store).await;
        let resp = h.send(post(Some(&id), rpc(5, "ping", json!({})))).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn test_accept_negotiation() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        assert!(prefers_sse_reply(&headers));
        assert!(accepts(&headers, SSE_CONTENT_TYPE));

        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json;q=0.9, text/event-stream"),
        );
        assert!(!prefers_sse_reply(&headers));

        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        assert!(!prefers_sse_reply(&headers));
        assert!(accepts(&headers, SSE_CONTENT_TYPE));

        assert!(!prefers_sse_reply(&HeaderMap::new()));
    }
}
