//! Request engine: one logical operation against one storage object
//!
//! A [`Request`] owns a single signed exchange and drives it to exactly one
//! terminal outcome, following redirects and retrying transient failures
//! underneath. The state flow is
//!
//! ```text
//! Built -> InFlight -> Succeeded
//!                   -> Redirected    (new host/path, budget untouched)
//!                   -> RetryPending  (same target, budget decremented)
//!                   -> Failed        (budget exhausted)
//! ```
//!
//! Headers are signed once per logical operation. A same-target retry
//! resubmits them unchanged (a re-signed Date would no longer match the
//! recorded signature), and a redirect keeps them too: the canonical
//! resource does not change with the host, so the signature stays valid.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use hyper::header::{HeaderMap, LOCATION};
use hyper::{Method, StatusCode};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SslOptions;
use crate::transport::{Body, Transport, TransportCall, TransportError, TransportReply};

/// Additional same-target attempts after the first (5 attempts total).
pub const DEFAULT_RETRY_BUDGET: u32 = 4;

/// Client errors, in escalation order: validation failures never reach the
/// transport; response/transport failures surface only once the retry
/// budget is exhausted; flush exhaustion wraps the last of those.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid argument: {0}")]
    Validation(String),

    #[error("S3 error: {status} - {message}")]
    Response { status: StatusCode, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("flush gave up after {attempts} attempts: {source}")]
    FlushExhausted {
        attempts: u32,
        source: Box<StorageError>,
    },
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Full description of one attempt-cycle. Built by an `Item`, consumed by
/// a `Request`; never reused across logical operations.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Body,
    pub ssl: SslOptions,
    pub timeout: Duration,
    pub retry_budget: u32,
    pub retry_delay: Duration,
}

/// Terminal response of a successful operation. Streamed operations carry
/// an empty body here; their payload went through the chunk sink.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// One logical operation in flight.
pub struct Request {
    spec: RequestSpec,
    transport: Arc<dyn Transport>,
}

impl Request {
    pub fn new(spec: RequestSpec, transport: Arc<dyn Transport>) -> Self {
        Self { spec, transport }
    }

    /// Execute, buffering the full response body.
    pub async fn execute(self) -> Result<Response> {
        self.run(None).await
    }

    /// Execute, forwarding body chunks to `sink` as they arrive instead of
    /// buffering. The returned response carries an empty body.
    pub async fn execute_streaming(
        self,
        sink: &mut (dyn FnMut(Bytes) + Send),
    ) -> Result<Response> {
        self.run(Some(sink)).await
    }

    async fn run(self, mut sink: Option<&mut (dyn FnMut(Bytes) + Send)>) -> Result<Response> {
        let mut url = self.spec.url.clone();
        let mut attempts_left = self.spec.retry_budget + 1;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let call = TransportCall {
                method: self.spec.method.clone(),
                url: url.clone(),
                headers: self.spec.headers.clone(),
                body: self.spec.body.clone(),
                ssl: self.spec.ssl.clone(),
                timeout: self.spec.timeout,
            };

            let last_error = match self.transport.submit(call).await {
                Ok(reply) if reply.status.is_success() => {
                    let streaming = sink.is_some();
                    match Self::drain(reply, sink.as_deref_mut(), self.spec.timeout).await {
                        Ok(response) => {
                            debug!(
                                method = %self.spec.method,
                                url = %url,
                                status = %response.status,
                                attempts = attempt,
                                "request completed"
                            );
                            return Ok(response);
                        }
                        // Streamed chunks were already delivered; replaying
                        // the exchange would hand them to the sink twice.
                        Err(e) if streaming => return Err(e),
                        Err(e) => e,
                    }
                }
                Ok(reply) if reply.status.is_redirection() => {
                    match reply
                        .headers
                        .get(LOCATION)
                        .and_then(|value| value.to_str().ok())
                    {
                        Some(target) => {
                            let next = redirect_target(&url, target);
                            debug!(from = %url, to = %next, "following redirect");
                            url = next;
                            // A redirect hop does not consume retry budget
                            continue;
                        }
                        None => StorageError::Response {
                            status: reply.status,
                            message: "redirect without Location header".to_string(),
                        },
                    }
                }
                Ok(reply) => {
                    let status = reply.status;
                    let message = Self::read_message(reply).await;
                    StorageError::Response { status, message }
                }
                Err(e) => StorageError::Transport(e),
            };

            attempts_left -= 1;
            if attempts_left == 0 {
                warn!(
                    method = %self.spec.method,
                    url = %url,
                    attempts = attempt,
                    error = %last_error,
                    "retry budget exhausted"
                );
                return Err(last_error);
            }

            warn!(
                method = %self.spec.method,
                url = %url,
                attempt = attempt,
                remaining = attempts_left,
                error = %last_error,
                "transient failure, retrying"
            );

            let delay = backoff_delay(self.spec.retry_delay, attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Consume a successful reply: forward chunks to the sink, or buffer
    /// the body under the per-attempt timeout.
    async fn drain<'a>(
        reply: TransportReply,
        sink: Option<&mut (dyn FnMut(Bytes) + Send + 'a)>,
        limit: Duration,
    ) -> Result<Response> {
        let TransportReply {
            status,
            headers,
            mut body,
        } = reply;

        match sink {
            Some(deliver) => {
                while let Some(chunk) = body.next().await {
                    deliver(chunk?);
                }
                Ok(Response {
                    status,
                    headers,
                    body: Bytes::new(),
                })
            }
            None => {
                let collect = async {
                    let mut buf = BytesMut::new();
                    while let Some(chunk) = body.next().await {
                        buf.extend_from_slice(&chunk?);
                    }
                    Ok::<Bytes, StorageError>(buf.freeze())
                };
                let body = tokio::time::timeout(limit, collect)
                    .await
                    .map_err(|_| StorageError::Transport(TransportError::Timeout(limit)))??;
                Ok(Response {
                    status,
                    headers,
                    body,
                })
            }
        }
    }

    /// Best-effort error body for diagnostics; stream failures end the read.
    async fn read_message(reply: TransportReply) -> String {
        let mut body = reply.body;
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => buf.extend_from_slice(&bytes),
                Err(_) => break,
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// Resolve a redirect Location against the current target. Absolute URLs
/// replace scheme/host/path (the port normalized to be explicit); relative
/// ones replace only the path.
fn redirect_target(current: &str, location: &str) -> String {
    let (scheme, rest) = if let Some(rest) = location.strip_prefix("https://") {
        ("https", rest)
    } else if let Some(rest) = location.strip_prefix("http://") {
        ("http", rest)
    } else {
        // Relative target: keep the current scheme and authority
        let authority_end = current
            .find("://")
            .map(|i| i + 3)
            .and_then(|start| current[start..].find('/').map(|i| start + i))
            .unwrap_or(current.len());
        let path = if location.starts_with('/') { "" } else { "/" };
        return format!("{}{}{}", &current[..authority_end], path, location);
    };

    let (authority, path) = match rest.find('/') {
        Some(pos) => (&rest[..pos], &rest[pos..]),
        None => (rest, "/"),
    };

    if authority.contains(':') {
        format!("{scheme}://{authority}{path}")
    } else {
        let port = if scheme == "https" { 443 } else { 80 };
        format!("{scheme}://{authority}:{port}{path}")
    }
}

/// Simple pseudo-random jitter (0.0 - 1.0) without pulling in rand crate.
/// Uses current time nanoseconds as entropy source.
fn rand_jitter() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Exponential backoff with 20% jitter on top of the configured base.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    if base.is_zero() {
        return Duration::ZERO;
    }
    let base_ms = base.as_millis() as u64 * (1 << attempt.saturating_sub(1).min(6));
    let jitter = (base_ms as f64 * 0.2 * rand_jitter()) as u64;
    Duration::from_millis(base_ms + jitter)
}
