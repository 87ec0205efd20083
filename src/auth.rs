//! Authentication gate.
//!
//! Every request must carry `Authorization: Bearer <base64 service account JSON>`.
//! The gate runs before any session logic: a request that fails here never
//! reaches the dispatcher, so it can neither create nor touch a session.

use crate::context::RequestContext;
use crate::server::response::{json_response, ResponseBody};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use hyper::header::AUTHORIZATION;
use hyper::http::{HeaderMap, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tower_service::Service;
use tracing::debug;

/// Required authorization scheme token.
pub const AUTH_SCHEME: &str = "Bearer";
/// Required value of the credential's `type` field.
pub const SERVICE_ACCOUNT_TYPE: &str = "service_account";
/// Token endpoint used when the credential does not name one.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Google service account key, as found in the downloaded JSON key file.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceAccountCredential {
    #[serde(rename = "type")]
    pub account_type: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_uri: Option<String>,
}

impl ServiceAccountCredential {
    pub fn token_uri(&self) -> &str {
        self.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI)
    }
}

impl std::fmt::Debug for ServiceAccountCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountCredential")
            .field("client_email", &self.client_email)
            .field("project_id", &self.project_id)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Reasons a request is rejected by the gate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authorization header is required")]
    MissingHeader,
    #[error("Invalid authorization format")]
    InvalidFormat,
    #[error("credential is not valid base64")]
    InvalidEncoding,
    #[error("credential is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("invalid service account: {0}")]
    InvalidCredential(&'static str),
}

impl AuthError {
    /// Short error title for the response body.
    fn title(&self) -> &'static str {
        match self {
            Self::MissingHeader => "Authorization header is required",
            Self::InvalidFormat => "Invalid authorization format",
            Self::InvalidEncoding | Self::InvalidJson(_) | Self::InvalidCredential(_) => {
                "Invalid service account key"
            }
        }
    }

    fn hint(&self) -> String {
        match self {
            Self::MissingHeader => {
                "Please provide the service account key in the Authorization header".to_string()
            }
            Self::InvalidFormat => {
                "Authorization header must be in format: Bearer <base64 service account JSON>"
                    .to_string()
            }
            other => format!("The provided service account key is not valid: {other}"),
        }
    }

    pub fn into_response(self) -> Response<ResponseBody> {
        json_response(
            StatusCode::UNAUTHORIZED,
            &json!({ "error": self.title(), "message": self.hint() }),
        )
    }
}

/// Validate the credential header and decode the service account it carries.
pub fn authenticate(headers: &HeaderMap) -> Result<ServiceAccountCredential, AuthError> {
    let header = headers.get(AUTHORIZATION).ok_or(AuthError::MissingHeader)?;
    let header = header.to_str().map_err(|_| AuthError::InvalidFormat)?;

    let parts: Vec<&str> = header.split(' ').collect();
    let [scheme, value] = parts.as_slice() else {
        return Err(AuthError::InvalidFormat);
    };
    if *scheme != AUTH_SCHEME || value.is_empty() {
        return Err(AuthError::InvalidFormat);
    }

    let decoded = decode_base64(value)?;
    let document: Value =
        serde_json::from_slice(&decoded).map_err(|e| AuthError::InvalidJson(e.to_string()))?;
    validate_service_account(document)
}

fn decode_base64(value: &str) -> Result<Vec<u8>, AuthError> {
    [STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(value).ok())
        .ok_or(AuthError::InvalidEncoding)
}

fn validate_service_account(document: Value) -> Result<ServiceAccountCredential, AuthError> {
    let non_empty = |field: &str| {
        document
            .get(field)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty())
    };

    if document.get("type").and_then(Value::as_str) != Some(SERVICE_ACCOUNT_TYPE) {
        return Err(AuthError::InvalidCredential(
            "type must be \"service_account\"",
        ));
    }
    if !non_empty("private_key") {
        return Err(AuthError::InvalidCredential("missing private_key"));
    }
    if !non_empty("client_email") {
        return Err(AuthError::InvalidCredential("missing client_email"));
    }

    serde_json::from_value(document).map_err(|e| AuthError::InvalidJson(e.to_string()))
}

/// Tower service that authenticates a request before handing it to `inner`.
#[derive(Clone)]
pub struct AuthGateService<S> {
    inner: S,
}

impl<S> AuthGateService<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<B, S> Service<Request<B>> for AuthGateService<S>
where
    B: Send + 'static,
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

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let mut inner = self.inner.clone();
        Box::pin(async move {
            match authenticate(req.headers()) {
                Ok(credential) => {
                    let ctx = RequestContext::new(credential);
                    debug!(request_id = %ctx.request_id(), "Request authenticated");
                    req.extensions_mut().insert(ctx);
                    inner.call(req).await
                }
                Err(e) => {
                    debug!(error = %e, "Rejecting unauthenticated request");
                    Ok(e.into_response())
                }
            }
        })
    }
}
