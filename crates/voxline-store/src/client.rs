//! The retrying, breaker-guarded request core.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use uuid::Uuid;

use crate::breaker::{BreakerState, CircuitBreaker};

/// Fixed backoff ladder: first retry after 1 s, second after 2 s.
/// `Retry-After` from the backend overrides the ladder when present.
const RETRY_DELAYS: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(2)];

/// Client configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub base_url: String,
    pub api_key: String,
    /// Per-attempt timeout.
    pub request_timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
}

/// Classified client failures.
///
/// Everything here is a value for the tool layer; nothing escapes as a
/// pipeline exception.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The breaker is open; the request never left the process.
    #[error("Backing store unavailable (circuit open)")]
    CircuitOpen,

    /// Per-attempt timeout elapsed on the final attempt.
    #[error("Backing store request timed out")]
    Timeout,

    /// Connection-level failure on the final attempt.
    #[error("Backing store unreachable: {0}")]
    Network(String),

    /// 401 — misconfigured credentials. Never retried.
    #[error("Backing store rejected credentials")]
    Unauthorized,

    /// Non-success status after retries were exhausted or not permitted.
    #[error("Backing store returned {status}: {message}")]
    Status { status: u16, message: String },

    /// 2xx body that did not decode as JSON.
    #[error("Backing store returned an unreadable body: {0}")]
    Decode(String),
}

/// One request as the policy layer sees it.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: &'static str,
    /// Path relative to the base URL, query string included.
    pub path: String,
    pub body: Option<Value>,
    /// Set by mutating endpoints; reused verbatim across every retry of
    /// the same logical call.
    pub idempotency_key: Option<Uuid>,
    /// 404 is a domain answer ("not available"), not an error.
    pub not_found_is_none: bool,
}

impl RequestSpec {
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: "GET",
            path: path.into(),
            body: None,
            idempotency_key: None,
            not_found_is_none: false,
        }
    }

    #[must_use]
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: "POST",
            path: path.into(),
            body: Some(body),
            idempotency_key: None,
            not_found_is_none: false,
        }
    }

    /// Mark this request as one of the three mutating operations; `key` is
    /// generated once per logical call by the tool handler.
    #[must_use]
    pub const fn idempotent(mut self, key: Uuid) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    /// Treat 404 as a normal "not found" answer.
    #[must_use]
    pub const fn not_found_ok(mut self) -> Self {
        self.not_found_is_none = true;
        self
    }
}

// ── Transport seam ─────────────────────────────────────────────────

/// One attempt as it goes on the wire.
#[derive(Debug, Clone)]
pub struct PreparedAttempt {
    pub method: &'static str,
    pub url: String,
    pub body: Option<Value>,
    pub bearer: String,
    /// Fresh per attempt, for trace correlation.
    pub request_id: Uuid,
    pub idempotency_key: Option<Uuid>,
    pub timeout: Duration,
}

/// A finished attempt.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    /// Parsed `Retry-After` seconds, when the backend sent one.
    pub retry_after: Option<u64>,
    pub body: Bytes,
}

/// Connection-level attempt failure.
#[derive(Debug, thiserror::Error)]
pub enum TransportFailure {
    #[error("attempt timed out")]
    Timeout,
    #[error("{0}")]
    Network(String),
}

/// Executes single attempts. The production implementation is
/// [`HttpTransport`]; tests script this seam directly.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        attempt: PreparedAttempt,
    ) -> Result<TransportResponse, TransportFailure>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| StoreError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        attempt: PreparedAttempt,
    ) -> Result<TransportResponse, TransportFailure> {
        let mut request = match attempt.method {
            "POST" => self.client.post(&attempt.url),
            _ => self.client.get(&attempt.url),
        }
        .timeout(attempt.timeout)
        .bearer_auth(&attempt.bearer)
        .header("X-Request-Id", attempt.request_id.to_string());

        if let Some(key) = attempt.idempotency_key {
            request = request.header("Idempotency-Key", key.to_string());
        }
        if let Some(body) = &attempt.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportFailure::Timeout
            } else {
                TransportFailure::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportFailure::Network(e.to_string()))?;

        Ok(TransportResponse {
            status,
            retry_after,
            body,
        })
    }
}

// ── Client ─────────────────────────────────────────────────────────

/// The single client every tool handler shares.
pub struct StoreClient {
    transport: Arc<dyn Transport>,
    breaker: Arc<CircuitBreaker>,
    config: StoreConfig,
}

impl StoreClient {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        breaker: Arc<CircuitBreaker>,
        config: StoreConfig,
    ) -> Self {
        Self {
            transport,
            breaker,
            config,
        }
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Reachability probe for the readiness endpoint. Bypasses the retry
    /// ladder but not the breaker bookkeeping.
    pub async fn probe(&self) -> Result<(), StoreError> {
        self.send(RequestSpec::get("/health")).await.map(|_| ())
    }

    /// Run one logical request through the full policy: breaker, bounded
    /// retry for 429/503/network failures, `Retry-After`, fresh request id
    /// per attempt, stable idempotency key across attempts.
    ///
    /// `Ok(None)` is the 404 answer on requests marked
    /// [`RequestSpec::not_found_ok`].
    pub async fn send(&self, spec: RequestSpec) -> Result<Option<Value>, StoreError> {
        if !self.breaker.try_acquire() {
            metrics::counter!("voxline_store_fast_fails_total").increment(1);
            return Err(StoreError::CircuitOpen);
        }

        let url = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            spec.path
        );

        let mut attempt_index: u32 = 0;
        loop {
            let request_id = Uuid::new_v4();
            let attempt = PreparedAttempt {
                method: spec.method,
                url: url.clone(),
                body: spec.body.clone(),
                bearer: self.config.api_key.clone(),
                request_id,
                idempotency_key: spec.idempotency_key,
                timeout: self.config.request_timeout,
            };

            tracing::debug!(
                method = spec.method,
                path = %spec.path,
                request_id = %request_id,
                attempt = attempt_index + 1,
                "Backing store request"
            );

            let retries_left = attempt_index < self.config.max_retries;
            let outcome = self.transport.execute(attempt).await;

            let (error, retry_after) = match self.classify(&spec, outcome) {
                Classified::Done(result) => return result,
                Classified::Retry { error, delay } => {
                    // Retries stop once the breaker opens mid-request.
                    let breaker_open = self.breaker.state() == BreakerState::Open;
                    if !retries_left || breaker_open {
                        return Err(error);
                    }
                    (error, delay)
                }
            };

            let ladder = RETRY_DELAYS
                .get(attempt_index as usize)
                .copied()
                .unwrap_or(Duration::from_secs(2));
            let delay = retry_after.unwrap_or(ladder);
            metrics::counter!("voxline_store_retries_total").increment(1);
            tracing::warn!(
                path = %spec.path,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "Retrying backing store request"
            );
            tokio::time::sleep(delay).await;
            attempt_index += 1;
        }
    }

    /// Map one attempt outcome to done-or-retry, updating the breaker.
    fn classify(
        &self,
        spec: &RequestSpec,
        outcome: Result<TransportResponse, TransportFailure>,
    ) -> Classified {
        match outcome {
            Ok(response) => self.classify_response(spec, response),
            Err(TransportFailure::Timeout) => {
                self.breaker.record_failure();
                Classified::Retry {
                    error: StoreError::Timeout,
                    delay: None,
                }
            }
            Err(TransportFailure::Network(message)) => {
                self.breaker.record_failure();
                Classified::Retry {
                    error: StoreError::Network(message),
                    delay: None,
                }
            }
        }
    }

    fn classify_response(&self, spec: &RequestSpec, response: TransportResponse) -> Classified {
        let status = response.status;
        match status {
            200..=299 => {
                self.breaker.record_success();
                if response.body.is_empty() {
                    return Classified::Done(Ok(Some(Value::Null)));
                }
                match serde_json::from_slice(&response.body) {
                    Ok(value) => Classified::Done(Ok(Some(value))),
                    Err(e) => Classified::Done(Err(StoreError::Decode(e.to_string()))),
                }
            }
            404 if spec.not_found_is_none => {
                // A domain answer from a healthy backend.
                self.breaker.record_success();
                Classified::Done(Ok(None))
            }
            401 => {
                // Responsive backend, broken configuration. Not retried and
                // not an availability failure.
                self.breaker.record_success();
                tracing::error!("Backing store rejected our API key, check credentials");
                Classified::Done(Err(StoreError::Unauthorized))
            }
            429 | 503 => {
                self.breaker.record_failure();
                Classified::Retry {
                    error: StoreError::Status {
                        status,
                        message: body_text(&response.body),
                    },
                    delay: response.retry_after.map(Duration::from_secs),
                }
            }
            500..=599 => {
                // Availability failure; 500-class statuses other than 503
                // are not retried.
                self.breaker.record_failure();
                Classified::Done(Err(StoreError::Status {
                    status,
                    message: body_text(&response.body),
                }))
            }
            _ => {
                // Any other response proves the backend is up; the request
                // itself failed.
                self.breaker.record_success();
                Classified::Done(Err(StoreError::Status {
                    status,
                    message: body_text(&response.body),
                }))
            }
        }
    }
}

enum Classified {
    Done(Result<Option<Value>, StoreError>),
    /// Retryable failure: retried while the budget lasts, surfaced as
    /// `error` once it runs out.
    Retry {
        error: StoreError,
        delay: Option<Duration>,
    },
}

fn body_text(body: &Bytes) -> String {
    String::from_utf8_lossy(body).chars().take(200).collect()
}
