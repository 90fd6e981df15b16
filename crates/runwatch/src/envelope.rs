//! Pipeline event envelopes as delivered on a run's event stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::WatchError;

/// The eight pipeline phases, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Clone,
    Detection,
    Baseline,
    Discovery,
    Patching,
    Validation,
    Selection,
    /// Terminal bookkeeping ("finishing up").
    Run,
}

impl Phase {
    pub const ALL: [Phase; 8] = [
        Phase::Clone,
        Phase::Detection,
        Phase::Baseline,
        Phase::Discovery,
        Phase::Patching,
        Phase::Validation,
        Phase::Selection,
        Phase::Run,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Clone => "clone",
            Phase::Detection => "detection",
            Phase::Baseline => "baseline",
            Phase::Discovery => "discovery",
            Phase::Patching => "patching",
            Phase::Validation => "validation",
            Phase::Selection => "selection",
            Phase::Run => "run",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Phase> {
        Phase::ALL.into_iter().find(|phase| phase.as_str() == tag)
    }

    /// Human label used by renderers.
    pub fn label(self) -> &'static str {
        match self {
            Phase::Clone => "Cloning repository",
            Phase::Detection => "Detecting stack",
            Phase::Baseline => "Running baseline",
            Phase::Discovery => "Discovering opportunities",
            Phase::Patching => "Generating patches",
            Phase::Validation => "Validating candidates",
            Phase::Selection => "Selecting results",
            Phase::Run => "Finishing up",
        }
    }
}

/// Phase tag with tolerance for values this build does not know.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PhaseTag {
    Known(Phase),
    Other(String),
}

impl PhaseTag {
    pub fn parse(tag: &str) -> Self {
        match Phase::from_tag(tag) {
            Some(phase) => PhaseTag::Known(phase),
            None => PhaseTag::Other(tag.to_string()),
        }
    }

    pub fn known(&self) -> Option<Phase> {
        match self {
            PhaseTag::Known(phase) => Some(*phase),
            PhaseTag::Other(_) => None,
        }
    }
}

/// Event types emitted by the pipeline producer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "clone.started")]
    CloneStarted,
    #[serde(rename = "clone.completed")]
    CloneCompleted,
    #[serde(rename = "clone.failed")]
    CloneFailed,
    #[serde(rename = "detection.started")]
    DetectionStarted,
    #[serde(rename = "detection.completed")]
    DetectionCompleted,
    #[serde(rename = "baseline.started")]
    BaselineStarted,
    #[serde(rename = "baseline.step.completed")]
    BaselineStepCompleted,
    #[serde(rename = "baseline.completed")]
    BaselineCompleted,
    #[serde(rename = "discovery.started")]
    DiscoveryStarted,
    #[serde(rename = "discovery.files.selected")]
    DiscoveryFilesSelected,
    #[serde(rename = "discovery.file.analysed")]
    DiscoveryFileAnalysed,
    #[serde(rename = "discovery.completed")]
    DiscoveryCompleted,
    #[serde(rename = "patch.approach.started")]
    PatchApproachStarted,
    #[serde(rename = "patch.approach.completed")]
    PatchApproachCompleted,
    #[serde(rename = "patch.generated")]
    PatchGenerated,
    #[serde(rename = "validation.started")]
    ValidationStarted,
    #[serde(rename = "validation.verdict")]
    ValidationVerdict,
    #[serde(rename = "validation.completed")]
    ValidationCompleted,
    #[serde(rename = "selection.started")]
    SelectionStarted,
    #[serde(rename = "selection.completed")]
    SelectionCompleted,
    #[serde(rename = "run.started")]
    RunStarted,
    #[serde(rename = "run.completed")]
    RunCompleted,
    #[serde(rename = "run.failed")]
    RunFailed,
    #[serde(rename = "run.cancelled")]
    RunCancelled,
    #[serde(rename = "heartbeat")]
    Heartbeat,
}

impl EventKind {
    pub const ALL: [EventKind; 25] = [
        EventKind::CloneStarted,
        EventKind::CloneCompleted,
        EventKind::CloneFailed,
        EventKind::DetectionStarted,
        EventKind::DetectionCompleted,
        EventKind::BaselineStarted,
        EventKind::BaselineStepCompleted,
        EventKind::BaselineCompleted,
        EventKind::DiscoveryStarted,
        EventKind::DiscoveryFilesSelected,
        EventKind::DiscoveryFileAnalysed,
        EventKind::DiscoveryCompleted,
        EventKind::PatchApproachStarted,
        EventKind::PatchApproachCompleted,
        EventKind::PatchGenerated,
        EventKind::ValidationStarted,
        EventKind::ValidationVerdict,
        EventKind::ValidationCompleted,
        EventKind::SelectionStarted,
        EventKind::SelectionCompleted,
        EventKind::RunStarted,
        EventKind::RunCompleted,
        EventKind::RunFailed,
        EventKind::RunCancelled,
        EventKind::Heartbeat,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::CloneStarted => "clone.started",
            EventKind::CloneCompleted => "clone.completed",
            EventKind::CloneFailed => "clone.failed",
            EventKind::DetectionStarted => "detection.started",
            EventKind::DetectionCompleted => "detection.completed",
            EventKind::BaselineStarted => "baseline.started",
            EventKind::BaselineStepCompleted => "baseline.step.completed",
            EventKind::BaselineCompleted => "baseline.completed",
            EventKind::DiscoveryStarted => "discovery.started",
            EventKind::DiscoveryFilesSelected => "discovery.files.selected",
            EventKind::DiscoveryFileAnalysed => "discovery.file.analysed",
            EventKind::DiscoveryCompleted => "discovery.completed",
            EventKind::PatchApproachStarted => "patch.approach.started",
            EventKind::PatchApproachCompleted => "patch.approach.completed",
            EventKind::PatchGenerated => "patch.generated",
            EventKind::ValidationStarted => "validation.started",
            EventKind::ValidationVerdict => "validation.verdict",
            EventKind::ValidationCompleted => "validation.completed",
            EventKind::SelectionStarted => "selection.started",
            EventKind::SelectionCompleted => "selection.completed",
            EventKind::RunStarted => "run.started",
            EventKind::RunCompleted => "run.completed",
            EventKind::RunFailed => "run.failed",
            EventKind::RunCancelled => "run.cancelled",
            EventKind::Heartbeat => "heartbeat",
        }
    }

    pub fn from_tag(tag: &str) -> Option<EventKind> {
        EventKind::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

/// Event type with pass-through for tags added by newer producers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventKindOrString {
    Known(EventKind),
    Other(String),
}

impl EventKindOrString {
    pub fn parse(tag: &str) -> Self {
        match EventKind::from_tag(tag) {
            Some(kind) => EventKindOrString::Known(kind),
            None => EventKindOrString::Other(tag.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKindOrString::Known(kind) => kind.as_str(),
            EventKindOrString::Other(tag) => tag,
        }
    }
}

impl From<EventKind> for EventKindOrString {
    fn from(value: EventKind) -> Self {
        EventKindOrString::Known(value)
    }
}

/// One observed occurrence in a run's pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: EventKindOrString,
    pub phase: PhaseTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(id: Option<&str>, event_type: &str, phase: &str, data: Value) -> Self {
        Self {
            id: id.map(str::to_string),
            event_type: EventKindOrString::parse(event_type),
            phase: PhaseTag::parse(phase),
            timestamp: None,
            data,
        }
    }

    /// Decode one `run_event` payload.
    ///
    /// Only `type` and `phase` are required (as strings). An `id` may be a
    /// string or a number; an unparseable `timestamp` becomes `None`.
    pub fn parse(payload: &str) -> Result<Self, WatchError> {
        let value: Value = serde_json::from_str(payload)
            .map_err(|err| WatchError::Malformed(format!("envelope is not JSON: {err}")))?;
        let Value::Object(mut map) = value else {
            return Err(WatchError::Malformed("envelope is not an object".into()));
        };

        let event_type = match map.get("type") {
            Some(Value::String(tag)) => EventKindOrString::parse(tag),
            _ => return Err(WatchError::Malformed("envelope type missing".into())),
        };
        let phase = match map.get("phase") {
            Some(Value::String(tag)) => PhaseTag::parse(tag),
            _ => return Err(WatchError::Malformed("envelope phase missing".into())),
        };
        let id = match map.get("id") {
            Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        let timestamp = map
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc));
        let data = map.remove("data").unwrap_or(Value::Null);

        Ok(Self {
            id,
            event_type,
            phase,
            timestamp,
            data,
        })
    }

    pub fn kind(&self) -> Option<EventKind> {
        match &self.event_type {
            EventKindOrString::Known(kind) => Some(*kind),
            EventKindOrString::Other(_) => None,
        }
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn data_u64(&self, key: &str) -> Option<u64> {
        match self.data.get(key)? {
            Value::Number(n) => n.as_u64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
                    .map(|f| f as u64)
            }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn data_f64(&self, key: &str) -> Option<f64> {
        match self.data.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn data_bool(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(Value::as_bool)
    }
}
