//! Job families: the operation names that make up one kind of server job.

/// Shared operation polling a job's status.
pub const WATCH_JOB: &str = "watchJob";
/// Shared operation asking the service to stop a job.
pub const STOP_JOB: &str = "stopJob";
/// Shared operation removing a job and its result.
pub const DELETE_JOB: &str = "deleteJob";

/// Operation names of one job kind.
///
/// `operation` is the synchronous variant, `start_operation` creates a job and
/// `fetch_operation` downloads its result once it is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFamily {
    pub operation: String,
    pub start_operation: String,
    pub fetch_operation: String,
}

impl JobFamily {
    /// Derive `start<Op>` and `fetch<Op>Response` from `operation`.
    pub fn new(operation: impl Into<String>) -> Self {
        let operation = operation.into();
        let capitalized = capitalize(&operation);
        Self {
            start_operation: format!("start{capitalized}"),
            fetch_operation: format!("fetch{capitalized}Response"),
            operation,
        }
    }

    /// Use a fetch operation name that does not follow the derivation.
    pub fn with_fetch_operation(mut self, fetch_operation: impl Into<String>) -> Self {
        self.fetch_operation = fetch_operation.into();
        self
    }

    /// Bin packing.
    pub fn pack_bins() -> Self {
        Self::new("packBins").with_fetch_operation("fetchPackedBinsResponse")
    }

    /// Bin packing with positioned items.
    pub fn pack_positioned_bins() -> Self {
        Self::new("packPositionedBins").with_fetch_operation("fetchPackedPositionedBinsResponse")
    }

    /// Look up a predefined family by its operation name.
    pub fn predefined(operation: &str) -> Option<Self> {
        match operation {
            "packBins" => Some(Self::pack_bins()),
            "packPositionedBins" => Some(Self::pack_positioned_bins()),
            _ => None,
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
