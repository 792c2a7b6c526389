//! Full-featured HTTP transport.

use async_trait::async_trait;

use super::{Exchange, Outcome, Transport, TransportKind, post_json};

/// Sends every header in the snapshot, including credentials.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Full
    }

    async fn send(&self, exchange: Exchange) -> Outcome {
        post_json(&self.client, exchange).await
    }
}
