//! `xload-core` — building blocks shared by the job client.
//!
//! This crate contains the **pure** parts of the client (no IO, no runtime):
//! the error taxonomy, job snapshots as reported by the service, and the retry
//! policy used while watching and fetching jobs.

pub mod error;
pub mod id;
pub mod job;
pub mod retry;

pub use error::{ClientError, ClientResult};
pub use id::{CallId, RunId};
pub use job::{Job, JobStatus};
pub use retry::{RetryDecision, RetryPolicy, RetryState};
