//! Periodic re-fetch of the authoritative run record.
//!
//! Runs independently of the event stream: if the stream never connects,
//! the observer still sees the run reach a terminal status, at poll
//! granularity instead of event granularity.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::api::{ControlPlane, RunRecord};

pub struct FallbackPoller {
    plane: Arc<dyn ControlPlane>,
    run_id: String,
    interval: Duration,
}

impl FallbackPoller {
    pub fn new(plane: Arc<dyn ControlPlane>, run_id: impl Into<String>, interval: Duration) -> Self {
        Self {
            plane,
            run_id: run_id.into(),
            interval,
        }
    }

    /// Poll until a fetched record is terminal or the receiver goes away.
    ///
    /// The first fetch happens immediately. A `true` on `stream_done`
    /// triggers one extra fetch without waiting for the next tick, to pick
    /// up summary fields the stream does not carry.
    pub async fn run<M>(self, mut stream_done: watch::Receiver<bool>, tx: mpsc::Sender<M>)
    where
        M: From<RunRecord> + Send + 'static,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watching_done = !*stream_done.borrow();
        let mut polls = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = stream_done.changed(), if watching_done => {
                    match changed {
                        Ok(()) if *stream_done.borrow_and_update() => {
                            tracing::debug!(run_id = %self.run_id, "stream done; refreshing run record");
                            watching_done = false;
                            ticker.reset();
                        }
                        Ok(()) => continue,
                        Err(_) => {
                            watching_done = false;
                            continue;
                        }
                    }
                }
            }

            polls += 1;
            let record = match self.plane.fetch_run(&self.run_id).await {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(run_id = %self.run_id, poll = polls, "run poll failed: {err}");
                    continue;
                }
            };
            let terminal = record.status.is_terminal();
            tracing::debug!(run_id = %self.run_id, status = record.status.as_str(), "polled run record");
            if tx.send(M::from(record)).await.is_err() {
                return;
            }
            if terminal {
                tracing::debug!(run_id = %self.run_id, polls, "run terminal; poller stopping");
                return;
            }
        }
    }
}
