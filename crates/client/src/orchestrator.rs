//! Job orchestration: start → watch* → fetch.
//!
//! A run is a small state machine driven on one task:
//!
//! ```text
//! Starting ──ok──▶ Watching ──terminal status──▶ Fetching ──ok──▶ Done
//!    │               │  ▲                            │  ▲
//!    │               │  └─ non-terminal / retry ─────┘  └─ retry
//!    └─ error ───────┴───────── unrecoverable ──────────┴──▶ Failed
//! ```
//!
//! The start call is never retried. Watch and fetch share one [`RetryState`],
//! which a successful watch resets.

use serde_json::{Map, Value, json};
use tokio::task::JoinHandle;
use xload_core::{ClientError, ClientResult, Job, RetryDecision, RetryPolicy, RetryState, RunId};

use crate::dispatcher::Dispatcher;
use crate::family::{JobFamily, WATCH_JOB};

/// Progress notification of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    /// A watch call returned this snapshot.
    Status(Job),
    /// A watch or fetch call failed recoverably; the same call is repeated
    /// after the retry interval. `attempt` counts retries since the last
    /// successful watch.
    Retrying { error: ClientError, attempt: u32 },
}

pub type ProgressCallback = Box<dyn FnMut(JobUpdate) + Send + 'static>;
pub type ResultCallback = Box<dyn FnOnce(ClientResult<Value>) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Starting,
    Watching,
    Fetching,
}

impl core::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            RunPhase::Starting => "starting",
            RunPhase::Watching => "watching",
            RunPhase::Fetching => "fetching",
        })
    }
}

/// One invocation of a job family.
///
/// Configure with the builder methods, then either [`JobRun::start`] it in the
/// background (result delivered to the result callback) or [`JobRun::run`] it
/// to completion.
pub struct JobRun {
    id: RunId,
    dispatcher: Dispatcher,
    family: JobFamily,
    request: Value,
    watch_options: Map<String, Value>,
    retry_policy: RetryPolicy,
    on_progress: Option<ProgressCallback>,
    on_result: Option<ResultCallback>,
}

impl core::fmt::Debug for JobRun {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobRun")
            .field("id", &self.id)
            .field("family", &self.family.operation)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

impl JobRun {
    pub fn new(dispatcher: Dispatcher, family: JobFamily, request: Value) -> Self {
        Self {
            id: RunId::new(),
            dispatcher,
            family,
            request,
            watch_options: Map::new(),
            retry_policy: RetryPolicy::default(),
            on_progress: None,
            on_result: None,
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    /// Extra fields sent with every watch call (e.g. a progress update
    /// period). Any `id` field is replaced by the job id.
    pub fn watch_options(mut self, options: Map<String, Value>) -> Self {
        self.watch_options = options;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: FnMut(JobUpdate) + Send + 'static,
    {
        self.on_progress = Some(Box::new(callback));
        self
    }

    pub fn on_result<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(ClientResult<Value>) + Send + 'static,
    {
        self.on_result = Some(Box::new(callback));
        self
    }

    /// Spawn the run. Requires a result callback.
    ///
    /// The callback receives exactly one result, unless a call of the run was
    /// removed from the backlog by `cancel_pending`, in which case the run ends
    /// silently.
    pub fn start(mut self) -> ClientResult<JobRunHandle> {
        let on_result = self
            .on_result
            .take()
            .ok_or_else(|| ClientError::configuration("a result callback is required to start a job run"))?;

        let id = self.id;
        let task = tokio::spawn(async move {
            match self.drive().await {
                Err(ClientError::Dropped) => {
                    tracing::warn!("run {id}: queued call dropped, no result will be reported");
                }
                result => on_result(result),
            }
        });

        Ok(JobRunHandle { id, task })
    }

    /// Drive the run to completion on the current task.
    ///
    /// A result callback, if set, is also invoked.
    pub async fn run(mut self) -> ClientResult<Value> {
        let result = self.drive().await;
        if let Some(on_result) = self.on_result.take() {
            if result != Err(ClientError::Dropped) {
                on_result(result.clone());
            }
        }
        result
    }

    async fn drive(&mut self) -> ClientResult<Value> {
        let id = self.id;
        tracing::info!("run {id}: starting {} job", self.family.operation);

        let started = self
            .dispatcher
            .send(&self.family.start_operation, self.request.clone(), None)
            .await
            .and_then(decode_job);

        let mut job = match started {
            Ok(job) => job,
            Err(err) => {
                tracing::error!("run {id}: {} failed while {}: {err}", self.family.start_operation, RunPhase::Starting);
                return Err(err);
            }
        };
        tracing::info!("run {id}: job {} created ({})", job.id, job.status);

        let mut retry = RetryState::new(self.retry_policy.clone());

        loop {
            let watched = self
                .dispatcher
                .send(WATCH_JOB, self.watch_body(&job.id), None)
                .await
                .and_then(decode_job);

            match watched {
                Ok(latest) => {
                    retry.reset();
                    tracing::debug!("run {id}: job {} is {}", latest.id, latest.status);
                    let terminal = latest.is_terminal();
                    job = latest;
                    self.report(JobUpdate::Status(job.clone()));
                    if terminal {
                        break;
                    }
                }
                Err(err) => self.back_off(&mut retry, err, RunPhase::Watching).await?,
            }
        }

        tracing::info!("run {id}: job {} ended with {}, fetching result", job.id, job.status);

        loop {
            match self
                .dispatcher
                .send(&self.family.fetch_operation, json!({ "id": job.id }), None)
                .await
            {
                Ok(result) => {
                    tracing::info!("run {id}: done");
                    return Ok(result);
                }
                Err(err) => self.back_off(&mut retry, err, RunPhase::Fetching).await?,
            }
        }
    }

    /// Wait out a recoverable failure, or hand back the error if the run must
    /// fail.
    async fn back_off(&mut self, retry: &mut RetryState, err: ClientError, phase: RunPhase) -> ClientResult<()> {
        let id = self.id;
        match retry.record_failure(&err) {
            RetryDecision::RetryAfter(delay) => {
                let attempt = retry.attempts();
                tracing::warn!("run {id}: {err} while {phase}, retry {attempt} in {delay:?}");
                self.report(JobUpdate::Retrying { error: err, attempt });
                tokio::time::sleep(delay).await;
                Ok(())
            }
            RetryDecision::GiveUp => {
                tracing::error!("run {id}: {err} while {phase}, giving up after {} retries", retry.attempts());
                Err(err)
            }
        }
    }

    fn watch_body(&self, job_id: &str) -> Value {
        let mut body = self.watch_options.clone();
        body.insert("id".to_string(), Value::String(job_id.to_string()));
        Value::Object(body)
    }

    fn report(&mut self, update: JobUpdate) {
        if let Some(on_progress) = self.on_progress.as_mut() {
            on_progress(update);
        }
    }
}

fn decode_job(body: Value) -> ClientResult<Job> {
    Job::from_value(body).map_err(|e| ClientError::decode(format!("expected a job object: {e}")))
}

/// Handle to a run started with [`JobRun::start`]. Runs cannot be cancelled.
#[derive(Debug)]
pub struct JobRunHandle {
    id: RunId,
    task: JoinHandle<()>,
}

impl JobRunHandle {
    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the run has ended and its result callback has returned.
    pub async fn finished(self) {
        if let Err(err) = self.task.await {
            tracing::warn!("run {} ended abnormally: {err}", self.id);
        }
    }
}
