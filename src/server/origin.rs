//! Origin allow-list.

use super::response::{text_response, ResponseBody};
use hyper::http::{header::ORIGIN, Request, Response, StatusCode};
use std::collections::HashSet;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_service::Service;
use tracing::debug;

/// Rejects requests whose `Origin` is not allow-listed. Requests without an
/// `Origin` header pass, and an empty allow-list admits every origin.
#[derive(Clone)]
pub struct OriginCheckService<S> {
    inner: S,
    allowed_origins: Arc<HashSet<String>>,
}

impl<S> OriginCheckService<S> {
    pub fn new(inner: S, allowed_origins: Arc<HashSet<String>>) -> Self {
        Self {
            inner,
            allowed_origins,
        }
    }
}

impl<B, S> Service<Request<B>> for OriginCheckService<S>
where
    B: http_body::Body + Send + 'static,
    B::Error: std::fmt::Display,
    S: Service<Request<B>, Response = Response<ResponseBody>, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<ResponseBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let allowed_origins = self.allowed_origins.clone();
        let mut inner = self.inner.clone();
        Box::pin(async move {
            if !allowed_origins.is_empty() {
                if let Some(origin) = req.headers().get(ORIGIN).and_then(|v| v.to_str().ok()) {
                    if !allowed_origins.contains(origin) {
                        debug!(origin = origin, "Rejecting request from unlisted origin");
                        return Ok(text_response(StatusCode::FORBIDDEN, "Forbidden"));
                    }
                }
            }
            inner.call(req).await
        })
    }
}
