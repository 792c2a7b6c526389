//! Feature-limited cross-origin transport.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap};

use super::{Exchange, Outcome, Transport, TransportKind, post_json};

/// Cross-origin transport without custom header support.
///
/// The client refuses to configure headers, credentials, or blocking calls for
/// this strategy; as a second line, only `Content-Type` survives here.
#[derive(Debug, Clone)]
pub struct ConstrainedTransport {
    client: reqwest::Client,
}

impl ConstrainedTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ConstrainedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Constrained
    }

    async fn send(&self, mut exchange: Exchange) -> Outcome {
        let mut headers = HeaderMap::new();
        if let Some(content_type) = exchange.headers.remove(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, content_type);
        }
        exchange.headers = headers;

        post_json(&self.client, exchange).await
    }
}
