//! In-process transports for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::transport::{Exchange, Outcome, Transport, TransportKind};

/// Yield until `condition` holds. Panics if it never does.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

/// Replays queued outcomes per operation name and records every exchange.
#[derive(Debug)]
pub struct ScriptedTransport {
    kind: TransportKind,
    script: Mutex<HashMap<String, VecDeque<Outcome>>>,
    sent: Mutex<Vec<Exchange>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Self::with_kind(TransportKind::Full)
    }

    pub fn constrained() -> Arc<Self> {
        Self::with_kind(TransportKind::Constrained)
    }

    fn with_kind(kind: TransportKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            script: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, operation: &str, outcome: Outcome) {
        self.script
            .lock()
            .unwrap()
            .entry(operation.to_string())
            .or_default()
            .push_back(outcome);
    }

    pub fn exchanges(&self) -> Vec<Exchange> {
        self.sent.lock().unwrap().clone()
    }

    /// Operations called, in order.
    pub fn operations(&self) -> Vec<String> {
        self.exchanges()
            .iter()
            .map(|e| e.url.rsplit('/').next().unwrap_or_default().to_string())
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn send(&self, exchange: Exchange) -> Outcome {
        let operation = exchange.url.rsplit('/').next().unwrap_or_default().to_string();
        self.sent.lock().unwrap().push(exchange);

        self.script
            .lock()
            .unwrap()
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| panic!("no scripted outcome left for {operation}"))
    }
}

/// Holds every exchange whose body carries a numeric `tag` until released.
///
/// Untagged exchanges succeed immediately, echoing their body.
#[derive(Debug)]
pub struct GatedTransport {
    gate: Semaphore,
    started: Mutex<Vec<usize>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    finished: AtomicUsize,
}

impl GatedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            started: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        })
    }

    /// Let `n` held exchanges complete, oldest first.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Tags in the order their exchanges reached the transport.
    pub fn started(&self) -> Vec<usize> {
        self.started.lock().unwrap().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for GatedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Full
    }

    async fn send(&self, exchange: Exchange) -> Outcome {
        let Some(tag) = exchange.body.get("tag").and_then(Value::as_u64) else {
            return Outcome::Success(exchange.body);
        };

        self.started.lock().unwrap().push(tag as usize);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        self.gate.acquire().await.unwrap().forget();

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
        Outcome::Success(exchange.body)
    }
}

/// Panics on bodies with `"panic": true`; echoes every other body.
#[derive(Debug)]
pub struct PanickingTransport;

#[async_trait]
impl Transport for PanickingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Full
    }

    async fn send(&self, exchange: Exchange) -> Outcome {
        tokio::task::yield_now().await;
        if exchange.body.get("panic").and_then(Value::as_bool) == Some(true) {
            panic!("transport failure");
        }
        Outcome::Success(exchange.body)
    }
}
