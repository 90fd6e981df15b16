//! CLI command handlers.

pub mod cancel;
pub mod status;
pub mod watch;

use runwatch::{RunRecord, WatchError};

/// One-line summary of a run record for human output.
pub(crate) fn describe_record(record: &RunRecord) -> String {
    let mut line = format!("run {}: {}", record.id, record.status.as_str());
    if let Some(secs) = record.compute_time_seconds {
        line.push_str(&format!(" ({secs:.1}s compute)"));
    }
    if let Some(err) = record.error_message.as_deref().filter(|m| !m.is_empty()) {
        line.push_str(&format!(": {err}"));
    }
    line
}

/// Attach `action` to a failed control-plane call, flagging failures a
/// retry could fix.
pub(crate) fn control_call<T>(result: Result<T, WatchError>, action: &str) -> anyhow::Result<T> {
    result.map_err(|err| {
        let hint = if err.retryable() {
            " (transient; retrying may succeed)"
        } else {
            ""
        };
        anyhow::Error::new(err).context(format!("{action}{hint}"))
    })
}
