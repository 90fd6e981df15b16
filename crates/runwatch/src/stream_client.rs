//! Connection state machine for one run's event subscription.
//!
//! `StreamClient` performs no I/O. The session actor reports transport
//! outcomes to it (`on_open`, `on_frame`, `on_error`) and carries out the
//! decisions it returns, which keeps reconnect and dedup behavior testable
//! without sockets or timers.
//!
//! ```text
//! Idle -> Connecting -> Connected --error--> Waiting --delay--> Connecting
//!                           |
//!                         done --> Done (terminal, no further reconnects)
//! ```

use std::time::Duration;

use serde::Serialize;

use crate::config::WatchConfig;
use crate::cursor::{Admission, ResumeCursor};
use crate::envelope::Envelope;
use crate::errors::WatchError;
use crate::sse::SseEvent;

/// Message kind carrying a JSON envelope.
pub const RUN_EVENT: &str = "run_event";
/// Message kind signalling the producer has finished the run's sequence.
pub const DONE_EVENT: &str = "done";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting { attempt: u32 },
    Connected,
    /// A reconnect is scheduled.
    Waiting { attempt: u32 },
    /// The producer sent `done`; terminal.
    Done,
    /// Torn down by the owner, or reconnects suppressed; terminal.
    Closed,
}

/// Outcome of one delivered SSE message.
#[derive(Clone, Debug, PartialEq)]
pub enum Delivery {
    Accepted(Envelope),
    Duplicate,
    Malformed(WatchError),
    Done,
    Ignored,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuppressReason {
    Done,
    Inactive,
    Closed,
    AlreadyScheduled,
    AttemptsExhausted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectDecision {
    Schedule { delay: Duration, attempt: u32 },
    Suppressed(SuppressReason),
}

#[derive(Debug, Clone)]
pub struct StreamClient {
    state: ConnectionState,
    cursor: ResumeCursor,
    reconnect_delay: Duration,
    max_attempts: Option<u32>,
    consecutive_failures: u32,
    reconnects: u32,
}

impl StreamClient {
    pub fn new(config: &WatchConfig) -> Self {
        Self {
            state: ConnectionState::Idle,
            cursor: ResumeCursor::new(),
            reconnect_delay: config.reconnect_delay,
            max_attempts: config.max_reconnect_attempts,
            consecutive_failures: 0,
            reconnects: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_done(&self) -> bool {
        self.state == ConnectionState::Done
    }

    pub fn cursor(&self) -> &ResumeCursor {
        &self.cursor
    }

    /// Total reconnect attempts scheduled over the session.
    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }

    /// Move to `Connecting`. Returns the resume cursor to attach, or `None`
    /// in the outer option when no connection may be opened.
    pub fn begin_connect(&mut self) -> Option<Option<String>> {
        let attempt = match self.state {
            ConnectionState::Idle => 0,
            ConnectionState::Waiting { attempt } => attempt,
            ConnectionState::Connecting { .. } | ConnectionState::Connected => return None,
            ConnectionState::Done | ConnectionState::Closed => return None,
        };
        self.state = ConnectionState::Connecting { attempt };
        Some(self.cursor.last_event_id().map(str::to_string))
    }

    pub fn on_open(&mut self) {
        if matches!(self.state, ConnectionState::Connecting { .. }) {
            self.state = ConnectionState::Connected;
            self.consecutive_failures = 0;
        }
    }

    pub fn on_frame(&mut self, frame: &SseEvent) -> Delivery {
        match self.state {
            ConnectionState::Done | ConnectionState::Closed => return Delivery::Ignored,
            ConnectionState::Connecting { .. } => self.on_open(),
            _ => {}
        }

        match frame.kind() {
            DONE_EVENT => {
                self.state = ConnectionState::Done;
                Delivery::Done
            }
            RUN_EVENT => {
                let envelope = match Envelope::parse(&frame.data) {
                    Ok(envelope) => envelope,
                    Err(err) => return Delivery::Malformed(err),
                };
                match self.cursor.admit(&envelope) {
                    Admission::Duplicate => Delivery::Duplicate,
                    Admission::New => {
                        if let Some(id) = envelope.id.as_deref().or(frame.id.as_deref()) {
                            self.cursor.advance(id);
                        }
                        Delivery::Accepted(envelope)
                    }
                }
            }
            _ => Delivery::Ignored,
        }
    }

    /// Report a failed or dropped connection and decide whether to retry.
    pub fn on_error(&mut self, run_active: bool) -> ReconnectDecision {
        match self.state {
            ConnectionState::Done => return ReconnectDecision::Suppressed(SuppressReason::Done),
            ConnectionState::Closed => {
                return ReconnectDecision::Suppressed(SuppressReason::Closed);
            }
            ConnectionState::Waiting { .. } => {
                return ReconnectDecision::Suppressed(SuppressReason::AlreadyScheduled);
            }
            _ => {}
        }
        if !run_active {
            self.state = ConnectionState::Closed;
            return ReconnectDecision::Suppressed(SuppressReason::Inactive);
        }

        self.consecutive_failures += 1;
        if let Some(max) = self.max_attempts {
            if self.consecutive_failures > max {
                self.state = ConnectionState::Closed;
                return ReconnectDecision::Suppressed(SuppressReason::AttemptsExhausted);
            }
        }

        self.reconnects += 1;
        let attempt = self.reconnects;
        self.state = ConnectionState::Waiting { attempt };
        ReconnectDecision::Schedule {
            delay: self.reconnect_delay,
            attempt,
        }
    }

    /// Tear down; no further connections. A finished stream stays `Done`.
    pub fn close(&mut self) {
        if self.state != ConnectionState::Done {
            self.state = ConnectionState::Closed;
        }
    }
}
