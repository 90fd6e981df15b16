//! Dedup set and resume cursor for one run's event stream.

use std::collections::HashSet;

use crate::envelope::Envelope;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    New,
    Duplicate,
}

/// Tracks which envelope ids have been appended to the log and the id to
/// resume from after a reconnect.
///
/// Envelopes without an id are always admitted; they cannot be recognized
/// on redelivery.
#[derive(Debug, Default, Clone)]
pub struct ResumeCursor {
    seen: HashSet<String>,
    last_event_id: Option<String>,
}

impl ResumeCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `envelope` is new, recording its id when it is.
    pub fn admit(&mut self, envelope: &Envelope) -> Admission {
        match &envelope.id {
            Some(id) => {
                if self.seen.insert(id.clone()) {
                    Admission::New
                } else {
                    Admission::Duplicate
                }
            }
            None => Admission::New,
        }
    }

    /// Record the transport id of the last processed message.
    pub fn advance(&mut self, id: impl Into<String>) {
        self.last_event_id = Some(id.into());
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    pub fn reset(&mut self) {
        self.seen.clear();
        self.last_event_id = None;
    }
}
