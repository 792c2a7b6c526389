//! Client facade.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use xload_core::{ClientError, ClientResult};

use crate::config::ClientConfig;
use crate::dispatcher::{Admission, Dispatcher, OperationCall};
use crate::family::{DELETE_JOB, JobFamily, STOP_JOB, WATCH_JOB};
use crate::orchestrator::JobRun;
use crate::transport::{self, Transport, TransportKind};

/// Client for one job service endpoint.
///
/// Cheap to clone; clones share the dispatcher (limit, backlog, headers).
#[derive(Debug, Clone)]
pub struct XLoadClient {
    dispatcher: Dispatcher,
}

impl XLoadClient {
    /// Resolve the endpoint, select the transport strategy and apply the
    /// configured headers, credentials and timeouts.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let endpoint = config.resolve_endpoint()?;
        let kind = TransportKind::select(&endpoint, config.origin.as_ref(), config.full_cross_origin);
        tracing::info!("using {kind:?} transport for {endpoint}");

        Self::with_transport(config, transport::build(kind)?)
    }

    /// Like [`XLoadClient::new`], with a caller-provided transport.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> ClientResult<Self> {
        let endpoint = config.resolve_endpoint()?;
        let dispatcher = Dispatcher::new(endpoint.as_str(), transport, config.active_request_limit);

        for (name, value) in &config.headers {
            dispatcher.set_header(name, value)?;
        }
        if let Some(credentials) = &config.credentials {
            dispatcher.set_credentials(&credentials.user, &credentials.password)?;
        }
        for (operation, timeout) in &config.timeouts {
            dispatcher.set_default_timeout(operation, Some(*timeout));
        }

        Ok(Self { dispatcher })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Base URL operation names are appended to.
    pub fn endpoint(&self) -> &str {
        self.dispatcher.endpoint()
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.dispatcher.transport_kind()
    }

    /// Blocking call: bypasses the admission limit.
    pub async fn call(&self, operation: &str, body: Value, timeout: Option<Duration>) -> ClientResult<Value> {
        self.dispatcher
            .call(OperationCall::new(operation, body).with_timeout(timeout))
            .await
    }

    /// Non-blocking call with a completion callback.
    pub fn submit(&self, call: OperationCall) -> Admission {
        self.dispatcher.submit(call)
    }

    /// Admission-controlled call, awaited.
    pub async fn send(&self, operation: &str, body: Value, timeout: Option<Duration>) -> ClientResult<Value> {
        self.dispatcher.send(operation, body, timeout).await
    }

    /// Poll a job. `request` must carry the job `id`; other fields are watch
    /// options.
    pub async fn watch_job(&self, request: Value, timeout: Option<Duration>) -> ClientResult<Value> {
        self.send(WATCH_JOB, request, timeout).await
    }

    pub async fn stop_job(&self, job_id: &str, timeout: Option<Duration>) -> ClientResult<Value> {
        self.send(STOP_JOB, json!({ "id": job_id }), timeout).await
    }

    pub async fn delete_job(&self, job_id: &str, timeout: Option<Duration>) -> ClientResult<Value> {
        self.send(DELETE_JOB, json!({ "id": job_id }), timeout).await
    }

    /// Download the result of a terminal job of `family`.
    pub async fn fetch_response(
        &self,
        family: &JobFamily,
        job_id: &str,
        timeout: Option<Duration>,
    ) -> ClientResult<Value> {
        self.send(&family.fetch_operation, json!({ "id": job_id }), timeout).await
    }

    /// Prepare a run of `family`. Nothing is sent until it is started.
    pub fn job(&self, family: JobFamily, request: Value) -> JobRun {
        JobRun::new(self.dispatcher.clone(), family, request)
    }

    pub fn run_pack_bins(&self, request: Value) -> JobRun {
        self.job(JobFamily::pack_bins(), request)
    }

    pub fn run_pack_positioned_bins(&self, request: Value) -> JobRun {
        self.job(JobFamily::pack_positioned_bins(), request)
    }

    pub fn set_header(&self, name: &str, value: &str) -> ClientResult<()> {
        self.dispatcher.set_header(name, value)
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.dispatcher.header(name)
    }

    pub fn set_credentials(&self, user: &str, password: &str) -> ClientResult<()> {
        self.dispatcher.set_credentials(user, password)
    }

    pub fn clear_credentials(&self) {
        self.dispatcher.clear_credentials()
    }

    pub fn set_active_request_limit(&self, limit: i64) {
        self.dispatcher.set_active_request_limit(limit)
    }

    pub fn active_request_limit(&self) -> Option<usize> {
        self.dispatcher.active_request_limit()
    }

    pub fn active_request_count(&self) -> usize {
        self.dispatcher.active_request_count()
    }

    pub fn pending_request_count(&self) -> usize {
        self.dispatcher.pending_request_count()
    }

    /// Drop all queued calls. Their callbacks are never invoked.
    pub fn cancel_pending_requests(&self) -> usize {
        self.dispatcher.cancel_pending()
    }

    pub fn set_default_timeout(&self, operation: &str, timeout: Option<Duration>) {
        self.dispatcher.set_default_timeout(operation, timeout)
    }
}

impl TryFrom<ClientConfig> for XLoadClient {
    type Error = ClientError;

    fn try_from(config: ClientConfig) -> Result<Self, Self::Error> {
        Self::new(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use crate::transport::Outcome;
    use reqwest::Url;

    #[test]
    fn cross_origin_without_full_support_is_constrained() {
        let config = ClientConfig::new("http://svc.example/rs/XLoad/")
            .with_origin(Url::parse("http://app.example/").unwrap())
            .with_full_cross_origin(false);
        let client = XLoadClient::new(config).unwrap();
        assert_eq!(client.transport_kind(), TransportKind::Constrained);
        assert!(client.set_header("X-Trace", "1").unwrap_err().is_configuration());
    }

    #[test]
    fn credentials_in_config_fail_under_constrained_transport() {
        let config = ClientConfig::new("http://svc.example/rs/XLoad/").with_credentials("user", "pass");
        let err = XLoadClient::with_transport(config, ScriptedTransport::constrained()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn applies_configuration() {
        let config = ClientConfig::new("")
            .with_origin(Url::parse("http://app.example/portal/").unwrap())
            .with_active_request_limit(3)
            .with_header("X-Tenant", "north")
            .with_credentials("user", "pass")
            .with_timeout(WATCH_JOB, Duration::from_secs(30));
        let client = XLoadClient::with_transport(config, ScriptedTransport::new()).unwrap();

        assert_eq!(client.endpoint(), "http://app.example/portal/rs/XLoad/");
        assert_eq!(client.active_request_limit(), Some(3));
        assert_eq!(client.header("x-tenant").as_deref(), Some("north"));
        assert_eq!(client.header("authorization").as_deref(), Some("Basic dXNlcjpwYXNz"));
        assert_eq!(
            client.dispatcher().default_timeout(WATCH_JOB),
            Some(Duration::from_secs(30))
        );

        client.set_credentials("", "").unwrap();
        assert_eq!(client.header("authorization"), None);
    }

    #[tokio::test]
    async fn maintenance_calls_send_job_id() {
        let transport = ScriptedTransport::new();
        transport.push(STOP_JOB, Outcome::Success(json!({"id": "J1", "status": "STOPPING"})));
        transport.push(DELETE_JOB, Outcome::Success(json!({})));
        transport.push("fetchPackedBinsResponse", Outcome::Success(json!({"bins": []})));
        let client =
            XLoadClient::with_transport(ClientConfig::new("http://svc/rs/XLoad/"), transport.clone()).unwrap();

        client.stop_job("J1", None).await.unwrap();
        client.delete_job("J1", Some(Duration::from_secs(1))).await.unwrap();
        client
            .fetch_response(&JobFamily::pack_bins(), "J1", None)
            .await
            .unwrap();

        let sent = transport.exchanges();
        assert!(sent.iter().all(|e| e.body == json!({"id": "J1"})));
        assert_eq!(transport.operations(), vec![STOP_JOB, DELETE_JOB, "fetchPackedBinsResponse"]);
        assert_eq!(sent[1].timeout, Some(Duration::from_secs(1)));
    }
}
