//! Human-facing counters and status line folded from the envelope log.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::envelope::{Envelope, EventKind};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub total_files: u64,
    pub files_analysed: u64,
    pub opportunities_found: u64,
    pub approaches_tested: u64,
    pub candidates_validated: u64,
    pub candidates_accepted: u64,
}

/// Per-type fold over accepted envelopes.
///
/// Fed from a deduplicated, append-only log, so every counter is
/// non-decreasing for the life of a session. `total_files` is the one
/// exception the producer controls: it is replaced by each selection event.
#[derive(Clone, Debug, Default)]
pub struct StatusAggregator {
    counters: Counters,
    detail: String,
    last_event_at: Option<DateTime<Utc>>,
}

impl StatusAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        self.last_event_at
    }

    pub fn apply(&mut self, envelope: &Envelope) {
        if let Some(ts) = envelope.timestamp {
            if self.last_event_at.is_none_or(|last| ts > last) {
                self.last_event_at = Some(ts);
            }
        }

        let Some(kind) = envelope.kind() else {
            self.detail = humanize_tag(envelope.event_type.as_str());
            return;
        };

        let c = &mut self.counters;
        let detail = match kind {
            EventKind::CloneStarted => Some("Cloning repository...".to_string()),
            EventKind::CloneCompleted => Some(
                match envelope
                    .data_str("commit_sha")
                    .or_else(|| envelope.data_str("sha"))
                {
                    Some(sha) => format!("Cloned at {}", short_sha(sha)),
                    None => "Repository cloned".to_string(),
                },
            ),
            EventKind::CloneFailed => Some(with_reason("Clone failed", envelope)),
            EventKind::DetectionCompleted => Some(describe_detection(envelope)),
            EventKind::BaselineStepCompleted => Some(describe_baseline_step(envelope)),
            EventKind::DiscoveryFilesSelected => {
                if let Some(count) = envelope
                    .data_u64("file_count")
                    .or_else(|| envelope.data_u64("count"))
                    .or_else(|| envelope.data.get("files")?.as_array().map(|f| f.len() as u64))
                {
                    c.total_files = count;
                }
                Some(format!("Selected {} files for analysis", c.total_files))
            }
            EventKind::DiscoveryFileAnalysed => {
                let found = envelope.data_u64("opportunities_found").unwrap_or(0);
                c.files_analysed = c.files_analysed.saturating_add(1);
                c.opportunities_found = c.opportunities_found.saturating_add(found);
                Some(match envelope.data_str("file") {
                    Some(file) => format!("Analysed {file} ({found} opportunities)"),
                    None => format!("Analysed file {} of {}", c.files_analysed, c.total_files),
                })
            }
            EventKind::PatchApproachStarted => {
                c.approaches_tested = c.approaches_tested.saturating_add(1);
                Some(match envelope.data_str("approach") {
                    Some(approach) => format!("Trying approach: {approach}"),
                    None => format!("Trying approach #{}", c.approaches_tested),
                })
            }
            EventKind::ValidationVerdict => {
                c.candidates_validated = c.candidates_validated.saturating_add(1);
                let accepted = envelope.data_bool("accepted") == Some(true);
                if accepted {
                    c.candidates_accepted = c.candidates_accepted.saturating_add(1);
                }
                Some(format!(
                    "Candidate {} ({} of {} accepted)",
                    if accepted { "accepted" } else { "rejected" },
                    c.candidates_accepted,
                    c.candidates_validated
                ))
            }
            EventKind::SelectionCompleted => Some(match envelope.data_u64("selected") {
                Some(n) => format!("Selected {n} improvements"),
                None => "Selection complete".to_string(),
            }),
            EventKind::RunCompleted => Some("Run completed".to_string()),
            EventKind::RunFailed => Some(with_reason("Run failed", envelope)),
            EventKind::RunCancelled => Some("Run cancelled".to_string()),
            EventKind::Heartbeat => None,
            other => Some(humanize_tag(other.as_str())),
        };

        if let Some(detail) = detail {
            self.detail = detail;
        }
    }
}

fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

fn with_reason(prefix: &str, envelope: &Envelope) -> String {
    match envelope
        .data_str("error")
        .or_else(|| envelope.data_str("reason"))
    {
        Some(reason) => format!("{prefix}: {reason}"),
        None => prefix.to_string(),
    }
}

fn describe_detection(envelope: &Envelope) -> String {
    match (envelope.data_str("language"), envelope.data_str("framework")) {
        (Some(lang), Some(fw)) => format!("Detected {lang} ({fw})"),
        (Some(lang), None) => format!("Detected {lang}"),
        (None, Some(fw)) => format!("Detected {fw}"),
        (None, None) => "Detection complete".to_string(),
    }
}

fn describe_baseline_step(envelope: &Envelope) -> String {
    let step = envelope
        .data_str("step")
        .or_else(|| envelope.data_str("name"))
        .unwrap_or("step");
    let outcome = match envelope.data_bool("success").or_else(|| envelope.data_bool("passed")) {
        Some(true) => "passed",
        Some(false) => "failed",
        None => "finished",
    };
    match envelope
        .data_f64("duration_seconds")
        .or_else(|| envelope.data_f64("duration"))
    {
        Some(secs) => format!("Baseline {step} {outcome} in {secs:.1}s"),
        None => format!("Baseline {step} {outcome}"),
    }
}

/// `"discovery.files.selected"` -> `"Discovery files selected"`.
fn humanize_tag(tag: &str) -> String {
    let spaced = tag.replace(['.', '_'], " ");
    let mut chars = spaced.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Working".to_string(),
    }
}
