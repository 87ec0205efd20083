//! Google Sheets access.
//!
//! Tool handlers describe each outbound call as an [`ApiRequest`] and hand it
//! to a [`SheetsApi`] together with the current request's credential. The
//! production implementation is [`GoogleSheetsClient`]; tests use a recording
//! mock.

mod client;
#[cfg(test)]
pub(crate) mod mock;
pub mod tools;

pub use client::{GoogleSheetsClient, RetryPolicy, DEFAULT_SHEETS_BASE_URL, SHEETS_SCOPE};

use crate::auth::ServiceAccountCredential;
use crate::error::ToolError;
use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMethod {
    Get,
    Post,
    Put,
}

/// One REST call against the Sheets API, relative to the API base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: ApiMethod,
    /// Path segments, unescaped. `["spreadsheets", id, "values", "Sheet1!A1:B2"]`.
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    fn new<I, S>(method: ApiMethod, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method,
            segments: segments.into_iter().map(Into::into).collect(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ApiMethod::Get, segments)
    }

    pub fn post<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ApiMethod::Post, segments)
    }

    pub fn put<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ApiMethod::Put, segments)
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Path relative to the base URL, for logging.
    pub fn path(&self) -> String {
        self.segments.join("/")
    }
}

/// Executes Sheets API calls on behalf of one service account.
#[async_trait]
pub trait SheetsApi: Send + Sync {
    async fn execute(
        &self,
        credential: &ServiceAccountCredential,
        request: ApiRequest,
    ) -> Result<Value, ToolError>;
}
