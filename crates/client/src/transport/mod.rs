//! Transport strategies: one request/response exchange with the service.
//!
//! Two implementations of [`Transport`] exist and one is picked when the client
//! is built:
//!
//! - [`HttpTransport`]: custom headers, credentials, blocking calls.
//! - [`ConstrainedTransport`]: for cross-origin endpoints when the runtime lacks
//!   a fully capable cross-origin transport. Only the content type header is
//!   sent and only non-blocking calls are allowed.
//!
//! Both speak the same wire contract: `POST <endpoint><operation>` with a JSON
//! body. Status 200 is success; anything else is a server error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::HeaderMap;
use serde_json::Value;
use xload_core::{ClientError, ClientResult};

mod constrained;
mod http;

pub use constrained::ConstrainedTransport;
pub use http::HttpTransport;

/// Content type sent with every request.
pub const JSON_CONTENT_TYPE: &str = "application/json;charset=UTF-8";

/// Which capability set the selected transport offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Full,
    Constrained,
}

impl TransportKind {
    pub fn supports_custom_headers(&self) -> bool {
        matches!(self, TransportKind::Full)
    }

    pub fn supports_credentials(&self) -> bool {
        matches!(self, TransportKind::Full)
    }

    pub fn supports_blocking(&self) -> bool {
        matches!(self, TransportKind::Full)
    }

    /// Pick the strategy for `endpoint` as seen from `origin`.
    pub fn select(endpoint: &Url, origin: Option<&Url>, full_cross_origin: bool) -> Self {
        if is_cross_origin(endpoint, origin) && !full_cross_origin {
            TransportKind::Constrained
        } else {
            TransportKind::Full
        }
    }
}

/// An endpoint is cross-origin when it is http(s) and its scheme, host, or port
/// differs from the hosting origin. No hosting origin means same-origin.
pub fn is_cross_origin(endpoint: &Url, origin: Option<&Url>) -> bool {
    let Some(origin) = origin else {
        return false;
    };
    matches!(endpoint.scheme(), "http" | "https") && endpoint.origin() != origin.origin()
}

/// A fully prepared request.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub url: String,
    /// Header snapshot taken when the call was sent.
    pub headers: HeaderMap,
    pub body: Value,
    /// Client-side timeout, measured from send to response. `None` or zero
    /// waits forever.
    pub timeout: Option<Duration>,
}

/// Result of one exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Status 200. An empty or unparseable body is reported as `Value::Null`.
    Success(Value),
    /// Any other status. Status 0 means no HTTP status was received.
    ServerError { status: u16, body: Option<Value> },
    /// The client-side timeout expired.
    Timeout,
}

impl Outcome {
    pub fn into_result(self) -> ClientResult<Value> {
        match self {
            Outcome::Success(body) => Ok(body),
            Outcome::ServerError { status, body } => Err(ClientError::server(status, body)),
            Outcome::Timeout => Err(ClientError::Timeout),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

/// Executes one exchange against the service.
#[async_trait]
pub trait Transport: Send + Sync + core::fmt::Debug {
    fn kind(&self) -> TransportKind;

    async fn send(&self, exchange: Exchange) -> Outcome;
}

/// Build the transport for `kind`.
pub fn build(kind: TransportKind) -> ClientResult<std::sync::Arc<dyn Transport>> {
    let client = reqwest::Client::builder()
        .build()
        .map_err(|e| ClientError::configuration(format!("failed to build HTTP client: {e}")))?;

    Ok(match kind {
        TransportKind::Full => std::sync::Arc::new(HttpTransport::new(client)),
        TransportKind::Constrained => std::sync::Arc::new(ConstrainedTransport::new(client)),
    })
}

/// POST the exchange and classify the response.
pub(crate) async fn post_json(client: &reqwest::Client, exchange: Exchange) -> Outcome {
    let mut request = client
        .post(&exchange.url)
        .headers(exchange.headers)
        .body(exchange.body.to_string());

    if let Some(timeout) = exchange.timeout.filter(|t| !t.is_zero()) {
        request = request.timeout(timeout);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(err) if err.is_timeout() => return Outcome::Timeout,
        Err(err) => {
            tracing::debug!("exchange with {} failed without status: {err}", exchange.url);
            return Outcome::ServerError {
                status: xload_core::error::NO_STATUS,
                body: None,
            };
        }
    };

    let status = response.status().as_u16();
    let body = match response.bytes().await {
        Ok(bytes) => parse_body(&bytes),
        Err(err) if err.is_timeout() => return Outcome::Timeout,
        Err(err) => {
            tracing::debug!("failed to read response body from {}: {err}", exchange.url);
            None
        }
    };

    if status == 200 {
        Outcome::Success(body.unwrap_or(Value::Null))
    } else {
        Outcome::ServerError { status, body }
    }
}

/// An empty or malformed body counts as absent.
pub(crate) fn parse_body(bytes: &[u8]) -> Option<Value> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    serde_json::from_slice(bytes).ok()
}
