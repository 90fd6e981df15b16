//! Monotonic phase tracking.

use serde::Serialize;

use crate::envelope::{Envelope, Phase};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    Pending,
    Active,
    Complete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PhaseProgress {
    pub phase: Phase,
    pub state: PhaseState,
}

/// Folds envelopes into the highest phase reached so far.
///
/// The watermark only moves forward: a late envelope from an earlier phase
/// (reordering across a reconnect, or a redelivery) leaves it untouched.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PhaseTracker {
    watermark: Option<usize>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the envelope advanced the current phase.
    pub fn apply(&mut self, envelope: &Envelope) -> bool {
        let Some(phase) = envelope.phase.known() else {
            return false;
        };
        let index = phase.index();
        if self.watermark.is_none_or(|mark| index > mark) {
            self.watermark = Some(index);
            return true;
        }
        false
    }

    pub fn current(&self) -> Option<Phase> {
        self.watermark.map(|mark| Phase::ALL[mark])
    }

    pub fn watermark(&self) -> Option<usize> {
        self.watermark
    }

    /// Per-phase state. A terminal run reports every phase complete.
    pub fn progress(&self, terminal: bool) -> Vec<PhaseProgress> {
        Phase::ALL
            .into_iter()
            .map(|phase| {
                let state = if terminal {
                    PhaseState::Complete
                } else {
                    match self.watermark {
                        Some(mark) if phase.index() < mark => PhaseState::Complete,
                        Some(mark) if phase.index() == mark => PhaseState::Active,
                        _ => PhaseState::Pending,
                    }
                };
                PhaseProgress { phase, state }
            })
            .collect()
    }
}
