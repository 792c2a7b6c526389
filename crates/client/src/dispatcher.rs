//! Admission-controlled dispatch of operation calls.
//!
//! The dispatcher owns the only cross-call mutable state of the client: the
//! number of active non-blocking exchanges and the FIFO backlog of calls that
//! could not be admitted yet. Both live behind one mutex.
//!
//! ```text
//! submit(call)
//!   ├─ active < limit → active += 1, spawn exchange   → Admission::Dispatched
//!   └─ otherwise      → push to backlog               → Admission::Deferred
//!
//! exchange finished
//!   ├─ active -= 1
//!   ├─ active < limit and backlog non-empty → pop oldest, active += 1, spawn
//!   └─ run the call's completion callback
//! ```
//!
//! Blocking calls ([`Dispatcher::call`]) skip admission entirely.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use xload_core::{CallId, ClientError, ClientResult};

use crate::transport::{Exchange, JSON_CONTENT_TYPE, Transport, TransportKind};

/// Completion callback of a non-blocking call.
pub type Completion = Box<dyn FnOnce(ClientResult<Value>) + Send + 'static>;

/// One invocation of a named operation.
pub struct OperationCall {
    operation: String,
    body: Value,
    timeout: Option<Duration>,
    completion: Option<Completion>,
}

impl OperationCall {
    pub fn new(operation: impl Into<String>, body: Value) -> Self {
        Self {
            operation: operation.into(),
            body,
            timeout: None,
            completion: None,
        }
    }

    /// Override the operation's default timeout for this call. A zero
    /// duration counts as unset.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Callback invoked with the result once the exchange finishes.
    ///
    /// Not invoked if the call is removed from the backlog by
    /// [`Dispatcher::cancel_pending`].
    pub fn on_complete<F>(mut self, completion: F) -> Self
    where
        F: FnOnce(ClientResult<Value>) + Send + 'static,
    {
        self.completion = Some(Box::new(completion));
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl core::fmt::Debug for OperationCall {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OperationCall")
            .field("operation", &self.operation)
            .field("timeout", &self.timeout)
            .field("has_completion", &self.completion.is_some())
            .finish()
    }
}

/// Handle to an exchange that is in flight.
///
/// There is no way to abort it; dropping the handle detaches it.
#[derive(Debug)]
pub struct CallHandle {
    id: CallId,
    task: JoinHandle<()>,
}

impl CallHandle {
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Whether the exchange and its completion callback have finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the exchange and its completion callback have finished.
    pub async fn finished(self) {
        if let Err(err) = self.task.await {
            tracing::warn!("call {} ended abnormally: {err}", self.id);
        }
    }
}

/// Admission decision for a non-blocking call.
#[derive(Debug)]
pub enum Admission {
    /// The exchange started immediately.
    Dispatched(CallHandle),
    /// The call waits in the backlog. Not an error.
    Deferred,
}

impl Admission {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Admission::Deferred)
    }

    pub fn handle(&self) -> Option<&CallHandle> {
        match self {
            Admission::Dispatched(handle) => Some(handle),
            Admission::Deferred => None,
        }
    }

    pub fn into_handle(self) -> Option<CallHandle> {
        match self {
            Admission::Dispatched(handle) => Some(handle),
            Admission::Deferred => None,
        }
    }
}

/// Map a requested limit to the stored ceiling: `< 1` is unbounded.
pub fn normalize_limit(limit: i64) -> usize {
    if limit < 1 {
        usize::MAX
    } else {
        usize::try_from(limit).unwrap_or(usize::MAX)
    }
}

struct PendingEntry {
    id: CallId,
    call: OperationCall,
}

struct DispatcherState {
    active: usize,
    limit: usize,
    backlog: VecDeque<PendingEntry>,
    next_id: u64,
}

impl DispatcherState {
    fn next_id(&mut self) -> CallId {
        self.next_id += 1;
        CallId::new(self.next_id)
    }
}

struct DispatcherInner {
    endpoint: String,
    transport: Arc<dyn Transport>,
    headers: RwLock<HeaderMap>,
    timeouts: RwLock<HashMap<String, Duration>>,
    state: Mutex<DispatcherState>,
}

/// Admission-controlled front of a [`Transport`].
///
/// Cheap to clone; clones share state. Non-blocking calls spawn Tokio tasks,
/// so [`Dispatcher::submit`] must run inside a Tokio runtime.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl core::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("endpoint", &self.inner.endpoint)
            .field("transport", &self.inner.transport.kind())
            .field("active", &self.active_request_count())
            .field("pending", &self.pending_request_count())
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher sending to `endpoint` (operation names are appended
    /// verbatim). `limit <= 0` means unbounded.
    pub fn new(endpoint: impl Into<String>, transport: Arc<dyn Transport>, limit: i64) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));

        Self {
            inner: Arc::new(DispatcherInner {
                endpoint: endpoint.into(),
                transport,
                headers: RwLock::new(headers),
                timeouts: RwLock::new(HashMap::new()),
                state: Mutex::new(DispatcherState {
                    active: 0,
                    limit: normalize_limit(limit),
                    backlog: VecDeque::new(),
                    next_id: 0,
                }),
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.inner.transport.kind()
    }

    /// Send `call` without admission control and wait for its result.
    ///
    /// Any completion callback on the call is ignored; the result is returned.
    pub async fn call(&self, call: OperationCall) -> ClientResult<Value> {
        if !self.transport_kind().supports_blocking() {
            return Err(ClientError::configuration(
                "blocking calls are not supported by the cross-origin transport",
            ));
        }

        let exchange = self.prepare(&call);
        tracing::debug!("blocking call to {}", call.operation);
        self.inner.transport.send(exchange).await.into_result()
    }

    /// Admit `call` now or park it in the backlog.
    pub fn submit(&self, call: OperationCall) -> Admission {
        let mut state = self.lock_state();
        let id = state.next_id();

        if state.active >= state.limit {
            tracing::debug!(
                "deferring {id} ({}): {} active, {} queued",
                call.operation,
                state.active,
                state.backlog.len() + 1
            );
            state.backlog.push_back(PendingEntry { id, call });
            return Admission::Deferred;
        }

        state.active += 1;
        drop(state);

        Admission::Dispatched(self.spawn_exchange(id, call))
    }

    /// Submit through admission control and wait for the result.
    ///
    /// Returns [`ClientError::Dropped`] if the call was still queued when
    /// [`Dispatcher::cancel_pending`] cleared the backlog.
    pub async fn send(&self, operation: &str, body: Value, timeout: Option<Duration>) -> ClientResult<Value> {
        let (tx, rx) = oneshot::channel();
        let call = OperationCall::new(operation, body)
            .with_timeout(timeout)
            .on_complete(move |result| {
                let _ = tx.send(result);
            });

        self.submit(call);

        rx.await.unwrap_or(Err(ClientError::Dropped))
    }

    /// Drop every queued call without invoking its callback.
    ///
    /// In-flight exchanges are not affected. Returns how many calls were
    /// dropped.
    pub fn cancel_pending(&self) -> usize {
        let dropped: Vec<PendingEntry> = self.lock_state().backlog.drain(..).collect();
        if !dropped.is_empty() {
            tracing::debug!("dropped {} queued call(s)", dropped.len());
        }
        dropped.len()
    }

    /// Change the admission ceiling. `< 1` means unbounded.
    ///
    /// Takes effect at the next submission or completion; the backlog is not
    /// drained by this call.
    pub fn set_active_request_limit(&self, limit: i64) {
        self.lock_state().limit = normalize_limit(limit);
    }

    /// Current ceiling, or `None` if unbounded.
    pub fn active_request_limit(&self) -> Option<usize> {
        let limit = self.lock_state().limit;
        (limit != usize::MAX).then_some(limit)
    }

    pub fn active_request_count(&self) -> usize {
        self.lock_state().active
    }

    pub fn pending_request_count(&self) -> usize {
        self.lock_state().backlog.len()
    }

    /// Set a header sent with every subsequent call.
    pub fn set_header(&self, name: &str, value: &str) -> ClientResult<()> {
        if !self.transport_kind().supports_custom_headers() {
            return Err(ClientError::configuration(
                "custom request headers are not supported by the cross-origin transport",
            ));
        }

        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::configuration(format!("invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::configuration(format!("invalid value for header {name}: {e}")))?;

        self.write_headers().insert(name, value);
        Ok(())
    }

    /// Current value of a request header.
    pub fn header(&self, name: &str) -> Option<String> {
        self.read_headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }

    /// Install `Authorization: Basic <base64(user:password)>`.
    ///
    /// Empty user and password remove the header instead.
    pub fn set_credentials(&self, user: &str, password: &str) -> ClientResult<()> {
        if user.is_empty() && password.is_empty() {
            self.clear_credentials();
            return Ok(());
        }

        if !self.transport_kind().supports_credentials() {
            return Err(ClientError::configuration(
                "basic authentication is not supported by the cross-origin transport",
            ));
        }

        let token = BASE64.encode(format!("{user}:{password}"));
        let mut value = HeaderValue::from_str(&format!("Basic {token}"))
            .map_err(|e| ClientError::configuration(format!("invalid credentials: {e}")))?;
        value.set_sensitive(true);

        self.write_headers().insert(AUTHORIZATION, value);
        Ok(())
    }

    pub fn clear_credentials(&self) {
        self.write_headers().remove(AUTHORIZATION);
    }

    /// Set (or with `None` or zero, clear) the default timeout of an operation.
    pub fn set_default_timeout(&self, operation: &str, timeout: Option<Duration>) {
        let mut timeouts = self.inner.timeouts.write().unwrap_or_else(PoisonError::into_inner);
        match timeout.filter(|t| !t.is_zero()) {
            Some(timeout) => {
                timeouts.insert(operation.to_string(), timeout);
            }
            None => {
                timeouts.remove(operation);
            }
        }
    }

    pub fn default_timeout(&self, operation: &str) -> Option<Duration> {
        self.inner
            .timeouts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(operation)
            .copied()
    }

    fn prepare(&self, call: &OperationCall) -> Exchange {
        Exchange {
            url: format!("{}{}", self.inner.endpoint, call.operation),
            headers: self.read_headers().clone(),
            body: call.body.clone(),
            timeout: call
                .timeout
                .filter(|t| !t.is_zero())
                .or_else(|| self.default_timeout(&call.operation)),
        }
    }

    fn spawn_exchange(&self, id: CallId, call: OperationCall) -> CallHandle {
        let exchange = self.prepare(&call);
        let dispatcher = self.clone();

        tracing::debug!("dispatching {id} ({})", call.operation);

        let task = tokio::spawn(async move {
            let slot = SlotGuard(dispatcher.clone());
            let outcome = dispatcher.inner.transport.send(exchange).await;
            tracing::debug!(
                "{id} ({}) finished: {}",
                call.operation,
                if outcome.is_success() { "ok" } else { "failed" }
            );

            drop(slot);

            if let Some(completion) = call.completion {
                completion(outcome.into_result());
            }
        });

        CallHandle { id, task }
    }

    /// Free the finished call's slot and refill it with at most one queued call.
    fn release_slot(&self) {
        let next = {
            let mut state = self.lock_state();
            state.active = state.active.saturating_sub(1);
            if state.active < state.limit {
                let next = state.backlog.pop_front();
                if next.is_some() {
                    state.active += 1;
                }
                next
            } else {
                None
            }
        };

        if let Some(entry) = next {
            self.spawn_exchange(entry.id, entry.call);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, DispatcherState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_headers(&self) -> std::sync::RwLockReadGuard<'_, HeaderMap> {
        self.inner.headers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_headers(&self) -> std::sync::RwLockWriteGuard<'_, HeaderMap> {
        self.inner.headers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases an admitted call's slot when dropped, including when the
/// transport panics.
struct SlotGuard(Dispatcher);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.release_slot();
    }
}
