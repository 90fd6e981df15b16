//! Append-only envelope log shared between a session and its published views.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Serialize, Serializer};

use crate::envelope::Envelope;

/// Accepted envelopes in arrival order.
///
/// Clones share storage and each sees the prefix that existed when it was
/// taken, so publishing a snapshot does not copy the log. Only the session
/// that owns the log appends to it.
#[derive(Clone, Default)]
pub struct EnvelopeLog {
    entries: Arc<RwLock<Vec<Envelope>>>,
    len: usize,
}

impl EnvelopeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, envelope: Envelope) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.truncate(self.len);
        entries.push(envelope);
        self.len = entries.len();
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> Option<Envelope> {
        if index >= self.len {
            return None;
        }
        self.read(|entries| entries.get(index).cloned())
    }

    /// Envelopes from `start` to the end of this snapshot.
    pub fn since(&self, start: usize) -> Vec<Envelope> {
        self.read(|entries| entries.get(start..).map(<[Envelope]>::to_vec).unwrap_or_default())
    }

    pub fn to_vec(&self) -> Vec<Envelope> {
        self.since(0)
    }

    fn read<T>(&self, f: impl FnOnce(&[Envelope]) -> T) -> T {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        f(&entries[..self.len.min(entries.len())])
    }
}

impl PartialEq for EnvelopeLog {
    fn eq(&self, other: &Self) -> bool {
        if self.len != other.len {
            return false;
        }
        if Arc::ptr_eq(&self.entries, &other.entries) {
            return true;
        }
        self.read(|ours| other.read(|theirs| ours == theirs))
    }
}

impl fmt::Debug for EnvelopeLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeLog").field("len", &self.len).finish()
    }
}

impl Serialize for EnvelopeLog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.read(|entries| serializer.collect_seq(entries))
    }
}
