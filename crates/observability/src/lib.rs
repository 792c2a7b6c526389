//! Tracing/logging setup shared by the client binary and embedding processes.

/// Initialize process-wide observability with JSON logs.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(LogFormat::Json);
}

/// Initialize process-wide observability with the given output format.
pub fn init_with(format: LogFormat) {
    tracing::init(format);
}

/// Output format of the fmt subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event (default; suited to log shipping).
    #[default]
    Json,
    /// Human-readable single-line output.
    Compact,
}

impl LogFormat {
    /// Parse a format name (`json` or `compact`), case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "json" => Some(LogFormat::Json),
            "compact" | "text" => Some(LogFormat::Compact),
            _ => None,
        }
    }
}

/// Tracing configuration (filters, layers).
pub mod tracing;
