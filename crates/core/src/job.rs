//! Job snapshots as reported by the service.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Status of a remote job.
///
/// Only the in-flight markers are known to the client. Every other value the
/// service reports is terminal and kept verbatim in [`JobStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Queuing,
    Running,
    Stopping,
    Other(String),
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Queuing => "QUEUING",
            JobStatus::Running => "RUNNING",
            JobStatus::Stopping => "STOPPING",
            JobStatus::Other(s) => s,
        }
    }

    /// A job is terminal unless it is queuing, running, or stopping.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Other(_))
    }
}

impl From<String> for JobStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "QUEUING" => JobStatus::Queuing,
            "RUNNING" => JobStatus::Running,
            "STOPPING" => JobStatus::Stopping,
            _ => JobStatus::Other(value),
        }
    }
}

impl From<&str> for JobStatus {
    fn from(value: &str) -> Self {
        JobStatus::from(value.to_string())
    }
}

impl From<JobStatus> for String {
    fn from(value: JobStatus) -> Self {
        match value {
            JobStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of a job.
///
/// Fields other than `id` and `status` (progress information, timestamps, ...)
/// are not interpreted and are kept in `details`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl Job {
    pub fn new(id: impl Into<String>, status: impl Into<JobStatus>) -> Self {
        Self {
            id: id.into(),
            status: status.into(),
            details: Map::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Decode a job object from a response body.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}
