//! Shared HTTP plumbing for the REST collaborators
//!
//! A request counts as transiently failed on any transport error (refused,
//! reset or dropped connections, timeouts) and on 408, 429 and 5xx responses.
//! Malformed requests, redirect loops and undecodable bodies are not retried.

use datapipe_storage::{retry_if, RetryError, RetryPolicy};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::fmt;
use std::time::Duration;

/// Outcome of a request that did not produce a 2xx response
#[derive(Debug)]
pub enum HttpFailure {
    Transport(reqwest::Error),
    Status { status: StatusCode, body: String },
}

impl HttpFailure {
    pub fn is_transient(&self) -> bool {
        match self {
            HttpFailure::Transport(e) => !(e.is_builder() || e.is_redirect() || e.is_decode()),
            HttpFailure::Status { status, .. } => is_transient_status(*status),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            HttpFailure::Transport(e) => e.status().map(|s| s.as_u16()),
            HttpFailure::Status { status, .. } => Some(status.as_u16()),
        }
    }
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpFailure::Transport(e) => write!(f, "request error: {}", e),
            HttpFailure::Status { status, body } if body.is_empty() => {
                write!(f, "responded with {}", status)
            }
            HttpFailure::Status { status, body } => {
                write!(f, "responded with {}: {}", status, truncate(body, 512))
            }
        }
    }
}

pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

/// Client with a per-request timeout and the gateway user agent
pub fn build_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("datapipe/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
}

/// Send once; any non-2xx becomes `HttpFailure::Status` with the body read
pub async fn send(request: RequestBuilder) -> Result<Response, HttpFailure> {
    let response = request.send().await.map_err(HttpFailure::Transport)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(HttpFailure::Status { status, body })
}

/// Send `build()` until success, a non-transient failure, or the budget runs out
pub async fn send_with_retry<F>(
    policy: &RetryPolicy,
    operation: &str,
    build: F,
) -> Result<Response, RetryError<HttpFailure>>
where
    F: Fn() -> RequestBuilder,
{
    retry_if(policy, operation, || send(build()), HttpFailure::is_transient).await
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
