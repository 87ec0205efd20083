//! Per-request context.
//!
//! The authentication gate builds a [`RequestContext`] for every inbound HTTP
//! request and stores it in the request's extensions. The dispatcher takes it
//! out again and hands it, by value, through the session transport to the
//! tool handler. Nothing here outlives the request.

use crate::auth::ServiceAccountCredential;
use crate::error::ToolError;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    credential: Option<Arc<ServiceAccountCredential>>,
}

impl RequestContext {
    /// Context for an authenticated request.
    pub fn new(credential: ServiceAccountCredential) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            credential: Some(Arc::new(credential)),
        }
    }

    /// Context with no credential attached (no gate in front of the dispatcher).
    pub fn anonymous() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            credential: None,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Credential of the current request. Tools must call this rather than
    /// caching credentials per session; each request may carry a different one.
    pub fn credential(&self) -> Result<&ServiceAccountCredential, ToolError> {
        self.credential
            .as_deref()
            .ok_or(ToolError::MissingCredentials)
    }
}
