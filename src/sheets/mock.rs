//! Recording `SheetsApi` for tests.

use super::{ApiRequest, SheetsApi};
use crate::auth::ServiceAccountCredential;
use crate::error::ToolError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub(crate) struct MockSheetsApi {
    calls: Mutex<Vec<(String, ApiRequest)>>,
    responses: Mutex<VecDeque<Result<Value, ToolError>>>,
    delay: Option<Duration>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl MockSheetsApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay` before answering.
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Queue the next answer; calls beyond the queue answer `{}`.
    pub(crate) fn respond(&self, response: Result<Value, ToolError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub(crate) fn calls(&self) -> Vec<(String, ApiRequest)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Highest number of calls observed running at the same time.
    pub(crate) fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SheetsApi for MockSheetsApi {
    async fn execute(
        &self,
        credential: &ServiceAccountCredential,
        request: ApiRequest,
    ) -> Result<Value, ToolError> {
        self.calls
            .lock()
            .unwrap()
            .push((credential.client_email.clone(), request));

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(json!({})))
    }
}
