//! `reqwest` client for the Google Sheets v4 REST API.
//!
//! Service account credentials are exchanged for OAuth access tokens with the
//! JWT bearer grant. Tokens are cached until shortly before they expire,
//! keyed by a digest of the whole credential so that a cached token is only
//! handed to a caller presenting the same private key.

use super::{ApiMethod, ApiRequest, SheetsApi};
use crate::auth::ServiceAccountCredential;
use crate::error::{ApiError, ToolError};
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{sleep, Instant};
use tracing::{debug, instrument, warn};

pub const DEFAULT_SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4";
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Lifetime requested for the signed assertion.
const ASSERTION_TTL_SECS: u64 = 3600;
/// Tokens are refreshed this long before Google says they expire.
const TOKEN_EXPIRY_MARGIN_SECS: u64 = 60;
/// Timeout for a single HTTP request to Google.
const HTTP_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Backoff schedule for retriable API failures (429 and 5xx).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            factor: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scale = self.factor.saturating_pow(attempt);
        self.initial_delay
            .saturating_mul(scale)
            .min(self.max_delay)
    }
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// One credential's token. Its lock is held across a token exchange so
/// concurrent callers with that credential wait for one exchange; other
/// credentials have their own slots.
type TokenSlot = Arc<tokio::sync::Mutex<Option<CachedToken>>>;

pub struct GoogleSheetsClient {
    http: Client,
    base_url: String,
    token_uri_override: Option<String>,
    retry: RetryPolicy,
    tokens: Mutex<HashMap<String, TokenSlot>>,
}

impl GoogleSheetsClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            token_uri_override: None,
            retry: RetryPolicy::default(),
            tokens: Mutex::new(HashMap::new()),
        })
    }

    /// Send token exchanges here instead of the credential's `token_uri`.
    pub fn with_token_uri(mut self, token_uri: impl Into<String>) -> Self {
        self.token_uri_override = Some(token_uri.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn build_url(&self, request: &ApiRequest) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ApiError::transport(format!("invalid base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::transport("base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(&request.segments);
        Ok(url)
    }

    fn token_uri<'a>(&'a self, credential: &'a ServiceAccountCredential) -> &'a str {
        self.token_uri_override
            .as_deref()
            .unwrap_or_else(|| credential.token_uri())
    }

    fn token_slot(&self, cache_key: &str) -> TokenSlot {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        tokens.entry(cache_key.to_string()).or_default().clone()
    }

    fn forget_slot(&self, cache_key: &str, slot: &TokenSlot) {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        if tokens.get(cache_key).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            tokens.remove(cache_key);
        }
    }

    async fn access_token(&self, credential: &ServiceAccountCredential) -> Result<String, ToolError> {
        let cache_key = token_cache_key(credential, self.token_uri(credential));
        let slot = self.token_slot(&cache_key);
        let mut cached = slot.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.expires_at > Instant::now()) {
            return Ok(token.access_token.clone());
        }

        let (access_token, expires_in) = match self.exchange_token(credential).await {
            Ok(exchanged) => exchanged,
            Err(e) => {
                drop(cached);
                self.forget_slot(&cache_key, &slot);
                return Err(e);
            }
        };
        let lifetime = expires_in.saturating_sub(TOKEN_EXPIRY_MARGIN_SECS);
        *cached = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        });
        Ok(access_token)
    }

    #[instrument(skip_all, fields(client_email = %credential.client_email))]
    async fn exchange_token(
        &self,
        credential: &ServiceAccountCredential,
    ) -> Result<(String, u64), ToolError> {
        #[derive(Serialize)]
        struct Claims<'a> {
            iss: &'a str,
            scope: &'a str,
            aud: &'a str,
            iat: u64,
            exp: u64,
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            #[serde(default = "default_expires_in")]
            expires_in: u64,
        }

        fn default_expires_in() -> u64 {
            ASSERTION_TTL_SECS
        }

        let token_uri = self.token_uri(credential);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ToolError::TokenExchange(e.to_string()))?
            .as_secs();
        let claims = Claims {
            iss: &credential.client_email,
            scope: SHEETS_SCOPE,
            aud: credential.token_uri(),
            iat: now,
            exp: now + ASSERTION_TTL_SECS,
        };

        let key = EncodingKey::from_rsa_pem(credential.private_key.as_bytes())
            .map_err(|e| ToolError::TokenExchange(format!("invalid private_key: {e}")))?;
        let mut header = Header::new(Algorithm::RS256);
        header.kid = credential.private_key_id.clone();
        let assertion = jsonwebtoken::encode(&header, &claims, &key)
            .map_err(|e| ToolError::TokenExchange(e.to_string()))?;

        debug!("Exchanging service account assertion for access token");
        let response = self
            .http
            .post(token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| ToolError::TokenExchange(e.to_string()))?;
        if !response.status().is_success() {
            let err = api_error(response).await;
            return Err(ToolError::TokenExchange(err.message));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ToolError::TokenExchange(e.to_string()))?;
        Ok((token.access_token, token.expires_in))
    }

    async fn send_once(&self, token: &str, request: &ApiRequest) -> Result<Value, ApiError> {
        let url = self.build_url(request)?;
        let builder = match request.method {
            ApiMethod::Get => self.http.get(url),
            ApiMethod::Post => self.http.post(url),
            ApiMethod::Put => self.http.put(url),
        };
        let mut builder = builder.bearer_auth(token).query(&request.query);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::transport(format!("invalid JSON from Sheets API: {e}")))
    }
}

#[async_trait]
impl SheetsApi for GoogleSheetsClient {
    #[instrument(skip_all, fields(method = ?request.method, path = %request.path()))]
    async fn execute(
        &self,
        credential: &ServiceAccountCredential,
        request: ApiRequest,
    ) -> Result<Value, ToolError> {
        let token = self.access_token(credential).await?;
        let mut attempt = 0;
        loop {
            match self.send_once(&token, &request).await {
                Err(e) if e.is_retriable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        status = ?e.status,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Retriable Sheets API error"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                other => return other.map_err(ToolError::from),
            }
        }
    }
}

/// Cache key covering every field that takes part in the token exchange.
fn token_cache_key(credential: &ServiceAccountCredential, token_uri: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [
        credential.client_email.as_str(),
        credential.private_key_id.as_deref().unwrap_or_default(),
        credential.private_key.as_str(),
        token_uri,
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Build an `ApiError` from a non-success response, preferring Google's own message.
async fn api_error(response: Response) -> ApiError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ApiError::new(Some(status), extract_error_message(&body))
}

fn extract_error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    let error = value.get("error");
    error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .or_else(|| value.get("error_description").and_then(Value::as_str))
        .or_else(|| error.and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}
