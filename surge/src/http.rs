//! Built-in HTTP requests.
//!
//! Requests made through this module are recorded into `http_reqs`, `http_req_failed` and
//! `http_req_duration`. They never return an error: transport failures come back as a
//! [`Response`] with status `0` and the failure in [`Response::error`].
use crate::transaction::{transaction_hook, VU_CONTEXT};
use reqwest::Client;
use std::time::Duration;
use surge_core::{DEFAULT_REQUEST_TIMEOUT, HTTP_LABELS};
use thiserror::Error;
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, trace};

pub(crate) fn build_client() -> Client {
    Client::builder()
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}

fn client() -> Client {
    VU_CONTEXT
        .try_with(|ctx| ctx.client.clone())
        .unwrap_or_else(|_| build_client())
}

#[derive(Debug, Clone)]
pub struct Response {
    pub url: String,
    /// HTTP status code, `0` when no response was received.
    pub status: u16,
    /// The response body, `None` when bodies are discarded or nothing was received.
    pub body: Option<Vec<u8>>,
    pub error: Option<String>,
    pub duration: Duration,
}

impl Response {
    pub fn body_text(&self) -> Option<&str> {
        self.body
            .as_deref()
            .and_then(|body| std::str::from_utf8(body).ok())
    }
}

#[derive(Debug)]
struct Exchange {
    status: u16,
    body: Option<Vec<u8>>,
}

#[derive(Debug, Error)]
enum RequestError {
    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {}", .0.status)]
    Status(Exchange),
}

/// Statuses which do not count towards `http_req_failed`.
pub fn is_expected_status(status: u16) -> bool {
    (200..400).contains(&status)
}

/// Issue a GET request to `url`.
pub async fn get(url: &str) -> Response {
    let discard = VU_CONTEXT
        .try_with(|ctx| ctx.discard_response_bodies)
        .unwrap_or(false);

    let start = Instant::now();
    let outcome = transaction_hook(HTTP_LABELS, send(url, discard)).await;
    let duration = start.elapsed();

    let (exchange, error) = match outcome {
        Ok(exchange) => (Some(exchange), None),
        Err(RequestError::Status(exchange)) => (Some(exchange), None),
        Err(err @ RequestError::Transport(_)) => {
            debug!("GET {url} failed: {err}");
            (None, Some(err.to_string()))
        }
    };

    let (status, body) = exchange
        .map(|e| (e.status, e.body))
        .unwrap_or((0, None));

    Response {
        url: url.to_string(),
        status,
        body,
        error,
        duration,
    }
}

async fn send(url: &str, discard: bool) -> Result<Exchange, RequestError> {
    let mut res = client().get(url).send().await?;
    let status = res.status().as_u16();

    let mut received = 0;
    let body = if discard {
        // Reading the body to the end lets the connection go back to the pool.
        while let Some(chunk) = res.chunk().await? {
            received += chunk.len();
        }
        None
    } else {
        let bytes = res.bytes().await?;
        received = bytes.len();
        Some(bytes.to_vec())
    };

    if let Some(registry) = crate::transaction::registry() {
        registry.record_data_received(received as u64);
    }
    trace!("GET {url} -> {status} ({received} bytes)");

    let exchange = Exchange { status, body };
    if is_expected_status(status) {
        Ok(exchange)
    } else {
        Err(RequestError::Status(exchange))
    }
}
