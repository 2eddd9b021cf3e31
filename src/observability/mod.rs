use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::protocol::mapping::Vendor;
use crate::protocol::result::ChatUsage;
use crate::stream::DecodeStats;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
pub fn init_tracing(log_level: &str) {
    let level = log_level.to_uppercase();

    if level == "DISABLED" {
        return;
    }

    let filter = EnvFilter::try_new(tracing_level(&level)).unwrap_or_else(|_| EnvFilter::new("INFO"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn tracing_level(level: &str) -> &str {
    match level {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    }
}

/// How a decoded sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamOutcome {
    #[default]
    Completed,
    Failed,
    Cancelled,
}

impl StreamOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StreamOutcome::Completed => "completed",
            StreamOutcome::Failed => "failed",
            StreamOutcome::Cancelled => "cancelled",
        }
    }
}

/// Log one line summarizing a finished stream.
pub fn log_stream_summary(
    vendor: Vendor,
    outcome: StreamOutcome,
    stats: DecodeStats,
    emitted: u64,
    usage: Option<&ChatUsage>,
    elapsed: Duration,
) {
    let usage = usage.copied().unwrap_or_default();
    info!(
        vendor = %vendor,
        outcome = outcome.as_str(),
        events = emitted,
        units = stats.units,
        malformed = stats.malformed,
        prompt_tokens = usage.prompt_tokens.unwrap_or(0),
        completion_tokens = usage.completion_tokens.unwrap_or(0),
        total_tokens = usage.total().unwrap_or(0),
        duration_ms = elapsed.as_millis() as u64,
        "stream finished"
    );
}
