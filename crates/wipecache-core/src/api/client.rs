//! HTTP implementation of the remote fetch boundary.
//!
//! `HttpAdapter` maps each [`Request`] onto a REST call against the dashboard
//! service and folds every outcome, including transport failures, into an
//! [`Envelope`].

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, Method, Url};
use serde_json::Value;
use tracing::{debug, warn};

use super::{ApiError, Envelope, Operation, RemoteFetch, Request};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Remote adapter for the dashboard REST service.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpAdapter {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpAdapter {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid API base URL: {}", base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("API base URL cannot be used as a base: {}", base_url);
        }

        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    /// Create a new adapter with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token),
        }
    }

    /// `{base}/{collection}/{scope}[/{key}][?variant=..]`
    pub fn url_for(&self, request: &Request) -> Url {
        let mut url = self.base_url.clone();
        let target = match request.operation {
            Operation::Update | Operation::Delete => request.target_key(),
            Operation::List | Operation::Create => None,
        };
        // cannot_be_a_base was rejected in new()
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push(request.collection.path())
                .push(&request.scope);
            if let Some(key) = target {
                segments.push(&key);
            }
        }
        if let Some(ref variant) = request.variant {
            url.query_pairs_mut().append_pair("variant", variant);
        }
        url
    }

    fn method_for(operation: Operation) -> Method {
        match operation {
            Operation::List => Method::GET,
            Operation::Create => Method::POST,
            Operation::Update => Method::PUT,
            Operation::Delete => Method::DELETE,
        }
    }

    async fn send(&self, request: &Request) -> Result<Value, ApiError> {
        let url = self.url_for(request);
        let method = Self::method_for(request.operation);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut builder = self
                .client
                .request(method.clone(), url.clone())
                .header(header::ACCEPT, "application/json");
            if let Some(ref token) = self.token {
                builder = builder.bearer_auth(token);
            }
            if matches!(request.operation, Operation::Create | Operation::Update) {
                if let Some(ref payload) = request.payload {
                    builder = builder.json(payload);
                }
            }

            let response = builder.send().await?;
            let status = response.status();

            if status.as_u16() == 429 {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited);
                }
                warn!(url = %url, retry = retries, backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2;
                continue;
            }

            let body = response.text().await?;
            if !status.is_success() {
                return Err(ApiError::from_status(status, &body));
            }
            debug!(url = %url, status = status.as_u16(), bytes = body.len(), "Response received");

            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&body)
                .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON: {}", e)));
        }
    }

    /// Accept both an envelope and a bare JSON body (wrapped as success).
    pub fn into_envelope(body: Value) -> Envelope {
        let is_envelope = body
            .as_object()
            .is_some_and(|map| map.get("success").is_some_and(Value::is_boolean));
        if is_envelope {
            match serde_json::from_value::<Envelope>(body) {
                Ok(envelope) => envelope,
                Err(e) => Envelope::failure(format!("Invalid envelope: {}", e)),
            }
        } else if body.is_null() {
            Envelope::ok_empty()
        } else {
            Envelope::ok(body)
        }
    }
}

#[async_trait]
impl RemoteFetch for HttpAdapter {
    async fn call(&self, request: Request) -> Envelope {
        match self.send(&request).await {
            Ok(body) => Self::into_envelope(body),
            Err(e) => {
                warn!(
                    collection = %request.collection,
                    scope = %request.scope,
                    operation = ?request.operation,
                    error = %e,
                    "Remote call failed"
                );
                Envelope::failure(e.to_string())
            }
        }
    }
}
