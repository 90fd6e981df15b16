//! Observation sessions: per-run state plus the actor that drives it.
//!
//! An `ObservationSession` owns everything learned about one run while it
//! is watched: the append-only envelope log, the stream client (dedup set
//! and resume cursor), the phase watermark, the status fold and the latest
//! polled run record. It is plain data; `ObservationHandle` spawns the
//! actor that feeds it.
//!
//! The actor is a single `select!` loop over one bounded channel, fed by
//! the connection task (one per attempt) and the fallback poller, plus the
//! reconnect deadline. Only the actor mutates the session, so no locking
//! is needed and messages are folded strictly in arrival order.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

use crate::api::{ControlPlane, RunRecord};
use crate::auth::TokenSource;
use crate::config::WatchConfig;
use crate::envelope::Phase;
use crate::envelope_log::EnvelopeLog;
use crate::errors::WatchError;
use crate::phase::{PhaseProgress, PhaseTracker};
use crate::poller::FallbackPoller;
use crate::sse::SseEvent;
use crate::status::{Counters, StatusAggregator};
use crate::stream_client::{ConnectionState, Delivery, ReconnectDecision, StreamClient};

/// Published snapshot of an observation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunView {
    pub run_id: String,
    /// Snapshot of the log; cloning a view does not copy the envelopes.
    pub envelopes: EnvelopeLog,
    pub connection: ConnectionState,
    pub is_connected: bool,
    pub is_done: bool,
    pub current_phase: Option<Phase>,
    pub phases: Vec<PhaseProgress>,
    pub counters: Counters,
    pub detail: String,
    pub run: Option<RunRecord>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    /// Whether a subscription was opened at all (false for runs already terminal at mount).
    pub live: bool,
}

impl RunView {
    /// Stream finished or the run record is terminal.
    pub fn is_terminal(&self) -> bool {
        self.is_done || self.run.as_ref().is_some_and(|run| run.status.is_terminal())
    }

    /// Nothing further will change: the run record is terminal and the
    /// stream is finished or closed, or nothing was ever observed live.
    pub fn is_settled(&self) -> bool {
        if !self.live {
            return true;
        }
        let run_terminal = self.run.as_ref().is_some_and(|run| run.status.is_terminal());
        run_terminal
            && matches!(
                self.connection,
                ConnectionState::Done | ConnectionState::Closed
            )
    }
}

/// What became of one inbound SSE message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ingest {
    Appended,
    Duplicate,
    Malformed,
    Done,
    Ignored,
}

#[derive(Debug)]
pub struct ObservationSession {
    run_id: String,
    log: EnvelopeLog,
    client: StreamClient,
    phases: PhaseTracker,
    status: StatusAggregator,
    run: Option<RunRecord>,
    run_active: bool,
    live: bool,
}

impl ObservationSession {
    pub fn new(run_id: impl Into<String>, is_active: bool, config: &WatchConfig) -> Self {
        Self {
            run_id: run_id.into(),
            log: EnvelopeLog::new(),
            client: StreamClient::new(config),
            phases: PhaseTracker::new(),
            status: StatusAggregator::new(),
            run: None,
            run_active: is_active,
            live: is_active,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn envelopes(&self) -> &EnvelopeLog {
        &self.log
    }

    pub fn client(&self) -> &StreamClient {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut StreamClient {
        &mut self.client
    }

    pub fn run_active(&self) -> bool {
        self.run_active
    }

    pub fn ingest(&mut self, frame: &SseEvent) -> Ingest {
        match self.client.on_frame(frame) {
            Delivery::Accepted(envelope) => {
                self.phases.apply(&envelope);
                self.status.apply(&envelope);
                self.log.push(envelope);
                Ingest::Appended
            }
            Delivery::Duplicate => Ingest::Duplicate,
            Delivery::Malformed(err) => {
                tracing::debug!(run_id = %self.run_id, "dropping malformed envelope: {err}");
                Ingest::Malformed
            }
            Delivery::Done => Ingest::Done,
            Delivery::Ignored => Ingest::Ignored,
        }
    }

    /// Reconcile with a freshly fetched run record.
    pub fn apply_record(&mut self, record: RunRecord) {
        self.run_active = !record.status.is_terminal();
        self.run = Some(record);
    }

    pub fn on_stream_error(&mut self) -> ReconnectDecision {
        self.client.on_error(self.run_active)
    }

    pub fn view(&self) -> RunView {
        let terminal = self.client.is_done()
            || self
                .run
                .as_ref()
                .is_some_and(|run| run.status.is_terminal());
        RunView {
            run_id: self.run_id.clone(),
            envelopes: self.log.clone(),
            connection: self.client.state(),
            is_connected: self.client.is_connected(),
            is_done: self.client.is_done(),
            current_phase: self.phases.current(),
            phases: self.phases.progress(terminal),
            counters: self.status.counters(),
            detail: self.status.detail().to_string(),
            run: self.run.clone(),
            last_event_at: self.status.last_event_at(),
            reconnect_attempts: self.client.reconnects(),
            live: self.live,
        }
    }
}

/// Aborts the task when dropped.
#[derive(Debug)]
struct TaskGuard(JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

type ConnectionSlot = Arc<Mutex<Option<AbortHandle>>>;

#[derive(Debug)]
enum SessionMsg {
    Opened { generation: u64 },
    Frame { generation: u64, frame: SseEvent },
    /// `None` means the server closed the stream without an error.
    Dropped { generation: u64, error: Option<WatchError> },
    Polled(RunRecord),
}

impl From<RunRecord> for SessionMsg {
    fn from(record: RunRecord) -> Self {
        SessionMsg::Polled(record)
    }
}

struct SessionActor {
    session: ObservationSession,
    plane: Arc<dyn ControlPlane>,
    tokens: Arc<dyn TokenSource>,
    tx: mpsc::Sender<SessionMsg>,
    rx: mpsc::Receiver<SessionMsg>,
    view_tx: watch::Sender<RunView>,
    done_tx: watch::Sender<bool>,
    connection: Option<TaskGuard>,
    connection_slot: ConnectionSlot,
    generation: u64,
    reconnect_at: Option<Instant>,
    dirty: bool,
}

impl SessionActor {
    async fn run(mut self) {
        tracing::info!(run_id = %self.session.run_id(), "observation started");
        self.connect();
        self.publish();

        loop {
            let deadline = self.reconnect_at;
            tokio::select! {
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.reconnect_at = None;
                    if self.session.run_active() {
                        self.connect();
                    } else {
                        tracing::info!(run_id = %self.session.run_id(), "run no longer active; not reconnecting");
                        self.session.client_mut().close();
                    }
                    self.dirty = true;
                }
                msg = self.rx.recv() => {
                    match msg {
                        Some(msg) => self.handle(msg),
                        None => break,
                    }
                }
            }
            self.publish();
        }
    }

    fn handle(&mut self, msg: SessionMsg) {
        match msg {
            SessionMsg::Opened { generation } if generation == self.generation => {
                tracing::info!(run_id = %self.session.run_id(), "event stream connected");
                self.session.client_mut().on_open();
                self.dirty = true;
            }
            SessionMsg::Frame { generation, frame } if generation == self.generation => {
                match self.session.ingest(&frame) {
                    Ingest::Appended => self.dirty = true,
                    Ingest::Done => {
                        tracing::info!(run_id = %self.session.run_id(), "event stream finished");
                        self.drop_connection();
                        let _ = self.done_tx.send(true);
                        self.dirty = true;
                    }
                    Ingest::Duplicate => {
                        tracing::debug!(run_id = %self.session.run_id(), id = ?frame.id, "duplicate envelope dropped");
                    }
                    Ingest::Malformed | Ingest::Ignored => {}
                }
            }
            SessionMsg::Dropped { generation, error } if generation == self.generation => {
                self.drop_connection();
                match &error {
                    Some(err) => {
                        tracing::warn!(run_id = %self.session.run_id(), "event stream error: {err}")
                    }
                    None => tracing::info!(run_id = %self.session.run_id(), "event stream closed by server"),
                }
                match self.session.on_stream_error() {
                    ReconnectDecision::Schedule { delay, attempt } => {
                        tracing::info!(
                            run_id = %self.session.run_id(),
                            attempt,
                            "reconnecting in {:?}",
                            delay
                        );
                        self.reconnect_at = Some(Instant::now() + delay);
                    }
                    ReconnectDecision::Suppressed(reason) => {
                        tracing::debug!(run_id = %self.session.run_id(), ?reason, "reconnect suppressed");
                    }
                }
                self.dirty = true;
            }
            SessionMsg::Polled(record) => {
                tracing::debug!(run_id = %self.session.run_id(), status = record.status.as_str(), "run record refreshed");
                self.session.apply_record(record);
                self.dirty = true;
            }
            stale => {
                tracing::trace!(run_id = %self.session.run_id(), "ignoring message from a previous connection: {stale:?}");
            }
        }
    }

    fn connect(&mut self) {
        let Some(cursor) = self.session.client_mut().begin_connect() else {
            return;
        };
        self.generation += 1;
        let generation = self.generation;
        let run_id = self.session.run_id().to_string();
        let plane = self.plane.clone();
        let tokens = self.tokens.clone();
        let tx = self.tx.clone();

        tracing::debug!(run_id = %run_id, generation, resume_from = ?cursor, "opening event stream");
        let handle = tokio::spawn(async move {
            let dropped = |error| SessionMsg::Dropped { generation, error };
            // Fetched per attempt so a renewed credential is picked up.
            let token = match tokens.token().await {
                Ok(token) => token,
                Err(err) => {
                    let _ = tx.send(dropped(Some(err))).await;
                    return;
                }
            };
            let mut stream = match plane.subscribe(&run_id, token, cursor).await {
                Ok(stream) => stream,
                Err(err) => {
                    let _ = tx.send(dropped(Some(err))).await;
                    return;
                }
            };
            if tx.send(SessionMsg::Opened { generation }).await.is_err() {
                return;
            }
            while let Some(item) = stream.next().await {
                match item {
                    Ok(frame) => {
                        if tx.send(SessionMsg::Frame { generation, frame }).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(dropped(Some(err))).await;
                        return;
                    }
                }
            }
            let _ = tx.send(dropped(None)).await;
        });

        if let Ok(mut slot) = self.connection_slot.lock() {
            *slot = Some(handle.abort_handle());
        }
        self.connection = Some(TaskGuard(handle));
    }

    fn drop_connection(&mut self) {
        self.connection = None;
        if let Ok(mut slot) = self.connection_slot.lock() {
            *slot = None;
        }
    }

    fn publish(&mut self) {
        if self.dirty {
            self.dirty = false;
            self.view_tx.send_replace(self.session.view());
        }
    }
}

/// Owner of one live observation. Dropping it (or calling `stop`) aborts
/// the actor, the poller and any open subscription.
#[derive(Debug)]
pub struct ObservationHandle {
    run_id: String,
    view_rx: watch::Receiver<RunView>,
    actor: Option<TaskGuard>,
    poller: Option<TaskGuard>,
    connection_slot: ConnectionSlot,
    // Keeps the view channel open for sessions with no actor.
    _idle_view: Option<watch::Sender<RunView>>,
}

impl ObservationHandle {
    /// Start observing `run_id`. Must be called within a tokio runtime.
    ///
    /// When `is_active` is false nothing is spawned: a terminal run has no
    /// live stream and no record to wait for.
    pub fn spawn(
        run_id: impl Into<String>,
        is_active: bool,
        plane: Arc<dyn ControlPlane>,
        tokens: Arc<dyn TokenSource>,
        config: &WatchConfig,
    ) -> Self {
        let run_id = run_id.into();
        let session = ObservationSession::new(run_id.clone(), is_active, config);
        let (view_tx, view_rx) = watch::channel(session.view());
        let connection_slot: ConnectionSlot = Arc::new(Mutex::new(None));

        if !is_active {
            tracing::debug!(run_id = %run_id, "run not active at mount; no subscription");
            return Self {
                run_id,
                view_rx,
                actor: None,
                poller: None,
                connection_slot,
                _idle_view: Some(view_tx),
            };
        }

        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let (done_tx, done_rx) = watch::channel(false);

        let poller = FallbackPoller::new(plane.clone(), run_id.clone(), config.poll_interval);
        let poller = tokio::spawn(poller.run(done_rx, tx.clone()));

        let actor = SessionActor {
            session,
            plane,
            tokens,
            tx,
            rx,
            view_tx,
            done_tx,
            connection: None,
            connection_slot: connection_slot.clone(),
            generation: 0,
            reconnect_at: None,
            dirty: false,
        };
        let actor = tokio::spawn(actor.run());

        Self {
            run_id,
            view_rx,
            actor: Some(TaskGuard(actor)),
            poller: Some(TaskGuard(poller)),
            connection_slot,
            _idle_view: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn is_live(&self) -> bool {
        self.actor.is_some()
    }

    /// Latest published view.
    pub fn view(&self) -> RunView {
        self.view_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunView> {
        self.view_rx.clone()
    }

    /// Wait until the observation can learn nothing more.
    ///
    /// Returns `None` if the actor went away first.
    pub async fn wait_until_settled(&self) -> Option<RunView> {
        let mut rx = self.view_rx.clone();
        let view = rx.wait_for(RunView::is_settled).await.ok()?.clone();
        Some(view)
    }

    pub fn stop(self) {}
}

impl Drop for ObservationHandle {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.connection_slot.lock() {
            if let Some(connection) = slot.take() {
                connection.abort();
            }
        }
        // Guards abort the actor and poller as they drop.
        drop(self.poller.take());
        drop(self.actor.take());
    }
}

/// Keeps at most one observation alive, switching when the run id changes.
pub struct Observer {
    plane: Arc<dyn ControlPlane>,
    tokens: Arc<dyn TokenSource>,
    config: WatchConfig,
    current: Option<ObservationHandle>,
}

impl Observer {
    pub fn new(
        plane: Arc<dyn ControlPlane>,
        tokens: Arc<dyn TokenSource>,
        config: WatchConfig,
    ) -> Self {
        Self {
            plane,
            tokens,
            config,
            current: None,
        }
    }

    /// Observe `run_id`, returning a receiver of its derived view.
    ///
    /// Re-observing the same run keeps the existing session. A different
    /// run id (or a run that became active since it was mounted idle)
    /// tears the old session down before the new one starts, so no state
    /// carries across runs.
    pub fn observe(&mut self, run_id: &str, is_active: bool) -> watch::Receiver<RunView> {
        if let Some(current) = &self.current {
            if current.run_id() == run_id && (current.is_live() || !is_active) {
                return current.subscribe();
            }
        }
        self.stop();
        let handle = ObservationHandle::spawn(
            run_id,
            is_active,
            self.plane.clone(),
            self.tokens.clone(),
            &self.config,
        );
        let rx = handle.subscribe();
        self.current = Some(handle);
        rx
    }

    pub fn current(&self) -> Option<&ObservationHandle> {
        self.current.as_ref()
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.current.take() {
            tracing::debug!(run_id = %handle.run_id(), "observation stopped");
            handle.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{RunStatus, SseEventStream};
    use crate::stream_client::{DONE_EVENT, RUN_EVENT};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Control plane that replays scripted streams and run statuses.
    #[derive(Default)]
    struct MockPlane {
        statuses: Mutex<Vec<RunStatus>>,
        streams: Mutex<VecDeque<Vec<SseEvent>>>,
        subscribes: Mutex<Vec<(Option<String>, Option<String>)>>,
        fetches: AtomicU32,
    }

    impl MockPlane {
        fn new(statuses: Vec<RunStatus>, streams: Vec<Vec<SseEvent>>) -> Arc<Self> {
            Arc::new(Self {
                statuses: Mutex::new(statuses),
                streams: Mutex::new(streams.into()),
                ..Self::default()
            })
        }

        fn subscribes(&self) -> Vec<(Option<String>, Option<String>)> {
            self.subscribes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ControlPlane for MockPlane {
        async fn fetch_run(&self, run_id: &str) -> Result<RunRecord, WatchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let mut statuses = self.statuses.lock().unwrap();
            let status = if statuses.len() > 1 {
                statuses.remove(0)
            } else {
                statuses.first().cloned().unwrap_or(RunStatus::Running)
            };
            Ok(RunRecord::new(run_id, status))
        }

        async fn cancel_run(&self, _run_id: &str) -> Result<(), WatchError> {
            Ok(())
        }

        async fn subscribe(
            &self,
            _run_id: &str,
            token: Option<String>,
            last_event_id: Option<String>,
        ) -> Result<SseEventStream, WatchError> {
            self.subscribes
                .lock()
                .unwrap()
                .push((token, last_event_id));
            match self.streams.lock().unwrap().pop_front() {
                Some(frames) => Ok(Box::pin(futures::stream::iter(
                    frames.into_iter().map(Ok::<SseEvent, WatchError>),
                ))),
                None => Err(WatchError::Network("connection refused".into())),
            }
        }
    }

    /// Hands out a new credential on every call.
    #[derive(Default)]
    struct RotatingToken {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TokenSource for RotatingToken {
        async fn token(&self) -> Result<Option<String>, WatchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Some(format!("tok-{n}")))
        }
    }

    fn done_frame() -> SseEvent {
        SseEvent {
            event: Some(DONE_EVENT.into()),
            ..SseEvent::default()
        }
    }

    fn spawn(plane: Arc<MockPlane>, is_active: bool) -> ObservationHandle {
        ObservationHandle::spawn(
            "run-1",
            is_active,
            plane,
            Arc::new(RotatingToken::default()),
            &WatchConfig::default(),
        )
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn resumes_after_drop_and_dedups_redelivery() {
        let plane = MockPlane::new(
            vec![RunStatus::Running, RunStatus::Completed],
            vec![
                vec![
                    run_event(Some("e1"), "clone.started", "clone", "{}"),
                    run_event(Some("e2"), "clone.completed", "clone", r#"{"commit_sha":"abcdef123"}"#),
                ],
                vec![
                    run_event(Some("e2"), "clone.completed", "clone", r#"{"commit_sha":"abcdef123"}"#),
                    run_event(Some("e3"), "baseline.started", "baseline", "{}"),
                    done_frame(),
                ],
            ],
        );
        let handle = spawn(plane.clone(), true);
        let view = tokio::time::timeout(Duration::from_secs(30), handle.wait_until_settled())
            .await
            .expect("settles")
            .expect("actor alive");

        let ids: Vec<_> = view
            .envelopes
            .to_vec()
            .into_iter()
            .map(|e| e.id.unwrap_or_default())
            .collect();
        assert_eq!(ids, vec!["e1", "e2", "e3"]);
        assert!(view.is_done);
        assert_eq!(view.current_phase, Some(Phase::Baseline));
        assert_eq!(view.reconnect_attempts, 1);
        assert_eq!(view.run.map(|r| r.status), Some(RunStatus::Completed));

        let subscribes = plane.subscribes();
        assert_eq!(subscribes.len(), 2);
        assert_eq!(subscribes[0].1, None);
        assert_eq!(subscribes[1].1.as_deref(), Some("e2"));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn poller_reports_terminal_status_without_a_stream() {
        let plane = MockPlane::new(vec![RunStatus::Running, RunStatus::Completed], vec![]);
        let handle = spawn(plane.clone(), true);
        let started = tokio::time::Instant::now();
        let view = tokio::time::timeout(Duration::from_secs(30), handle.wait_until_settled())
            .await
            .expect("settles")
            .expect("actor alive");

        assert!(view.envelopes.is_empty());
        assert!(!view.is_connected);
        assert_eq!(view.connection, ConnectionState::Closed);
        assert_eq!(view.run.map(|r| r.status), Some(RunStatus::Completed));
        assert!(started.elapsed() <= Duration::from_secs(6));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn every_attempt_fetches_a_fresh_token() {
        let plane = MockPlane::new(vec![RunStatus::Running], vec![]);
        let _handle = spawn(plane.clone(), true);
        tokio::time::sleep(Duration::from_millis(6_500)).await;

        let tokens: Vec<_> = plane
            .subscribes()
            .into_iter()
            .map(|(token, _)| token.unwrap_or_default())
            .collect();
        assert_eq!(tokens, vec!["tok-1", "tok-2", "tok-3"]);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn inactive_run_opens_nothing() {
        let plane = MockPlane::new(vec![RunStatus::Completed], vec![]);
        let handle = spawn(plane.clone(), false);
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert!(!handle.is_live());
        assert!(plane.subscribes().is_empty());
        assert_eq!(plane.fetches.load(Ordering::SeqCst), 0);
        assert!(handle.wait_until_settled().await.is_some());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn dropping_the_handle_stops_reconnecting() {
        let plane = MockPlane::new(vec![RunStatus::Running], vec![]);
        let handle = spawn(plane.clone(), true);
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        let before = plane.subscribes().len();
        handle.stop();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(plane.subscribes().len(), before);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn stopping_the_handle_cancels_polling() {
        let plane = MockPlane::new(vec![RunStatus::Running], vec![]);
        let handle = spawn(plane.clone(), true);
        tokio::time::sleep(Duration::from_secs(12)).await;
        let before = plane.fetches.load(Ordering::SeqCst);
        assert!(before >= 2, "poller ran {before} times");
        handle.stop();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(plane.fetches.load(Ordering::SeqCst), before);
    }

    #[test]
    fn views_see_the_log_as_of_publication() {
        let mut session = open_session();
        session.ingest(&run_event(Some("1"), "clone.started", "clone", "{}"));
        let early = session.view();
        session.ingest(&run_event(Some("2"), "clone.completed", "clone", "{}"));
        let late = session.view();
        assert_eq!(early.envelopes.len(), 1);
        assert_eq!(late.envelopes.len(), 2);
        assert_eq!(late.envelopes.get(1).and_then(|e| e.id), Some("2".to_string()));
        assert_eq!(early.envelopes.to_vec(), late.envelopes.to_vec()[..1]);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn observer_reuses_same_run_and_resets_on_switch() {
        let plane = MockPlane::new(
            vec![RunStatus::Running],
            vec![vec![run_event(Some("a1"), "clone.started", "clone", "{}")]],
        );
        let mut observer = Observer::new(
            plane.clone(),
            Arc::new(RotatingToken::default()),
            WatchConfig::default(),
        );
        let mut first = observer.observe("run-a", true);
        first
            .wait_for(|view| !view.envelopes.is_empty())
            .await
            .expect("first envelope");

        let again = observer.observe("run-a", true);
        assert_eq!(again.borrow().envelopes.len(), 1);
        assert_eq!(plane.subscribes().len(), 1);

        let switched = observer.observe("run-b", true);
        assert_eq!(switched.borrow().run_id, "run-b");
        assert!(switched.borrow().envelopes.is_empty());
        assert_eq!(
            observer.current().map(ObservationHandle::run_id),
            Some("run-b")
        );
        observer.stop();
        assert!(observer.current().is_none());
    }

    fn run_event(id: Option<&str>, kind: &str, phase: &str, data: &str) -> SseEvent {
        let id_field = id.map(|id| format!(r#""id":"{id}","#)).unwrap_or_default();
        SseEvent {
            event: Some(RUN_EVENT.into()),
            data: format!(r#"{{{id_field}"type":"{kind}","phase":"{phase}","data":{data}}}"#),
            id: id.map(str::to_string),
            retry: None,
        }
    }

    fn open_session() -> ObservationSession {
        let mut session = ObservationSession::new("run-1", true, &WatchConfig::default());
        session.client_mut().begin_connect();
        session.client_mut().on_open();
        session
    }

    #[test]
    fn redelivery_is_idempotent() {
        let script = [
            run_event(Some("1"), "discovery.files.selected", "discovery", r#"{"file_count":2}"#),
            run_event(Some("2"), "discovery.file.analysed", "discovery", r#"{"opportunities_found":2}"#),
            run_event(Some("3"), "patch.approach.started", "patching", "{}"),
        ];
        let mut once = open_session();
        for frame in &script {
            once.ingest(frame);
        }
        let mut twice = open_session();
        for frame in script.iter().chain(script.iter()) {
            twice.ingest(frame);
        }
        let (a, b) = (once.view(), twice.view());
        assert_eq!(a.envelopes, b.envelopes);
        assert_eq!(a.counters, b.counters);
        assert_eq!(a.current_phase, b.current_phase);
        assert_eq!(b.envelopes.len(), 3);
    }

    #[test]
    fn id_less_envelopes_are_appended_every_time() {
        let mut session = open_session();
        let frame = run_event(None, "discovery.file.analysed", "discovery", r#"{"opportunities_found":1}"#);
        assert_eq!(session.ingest(&frame), Ingest::Appended);
        assert_eq!(session.ingest(&frame), Ingest::Appended);
        assert_eq!(session.view().counters.opportunities_found, 2);
    }

    #[test]
    fn malformed_messages_never_reach_the_log() {
        let mut session = open_session();
        let bad = SseEvent {
            event: Some(RUN_EVENT.into()),
            data: "<html>".into(),
            ..SseEvent::default()
        };
        assert_eq!(session.ingest(&bad), Ingest::Malformed);
        assert_eq!(
            session.ingest(&run_event(Some("1"), "clone.started", "clone", "{}")),
            Ingest::Appended
        );
        assert_eq!(session.envelopes().len(), 1);
    }

    #[test]
    fn done_marks_every_phase_complete() {
        let mut session = open_session();
        session.ingest(&run_event(Some("1"), "baseline.started", "baseline", "{}"));
        let done = SseEvent {
            event: Some(DONE_EVENT.into()),
            ..SseEvent::default()
        };
        assert_eq!(session.ingest(&done), Ingest::Done);
        let view = session.view();
        assert!(view.is_done);
        assert!(view.is_terminal());
        assert_eq!(view.current_phase, Some(Phase::Baseline));
        assert!(
            view.phases
                .iter()
                .all(|p| p.state == crate::phase::PhaseState::Complete)
        );
        assert!(matches!(
            session.on_stream_error(),
            ReconnectDecision::Suppressed(_)
        ));
    }

    #[test]
    fn terminal_record_stops_reconnects_and_settles() {
        let mut session = open_session();
        session.apply_record(RunRecord::new("run-1", crate::api::RunStatus::Failed));
        assert!(!session.run_active());
        assert!(matches!(
            session.on_stream_error(),
            ReconnectDecision::Suppressed(_)
        ));
        assert!(session.view().is_settled());
    }

    #[test]
    fn idle_session_is_settled_immediately() {
        let session = ObservationSession::new("run-9", false, &WatchConfig::default());
        let view = session.view();
        assert!(!view.live);
        assert!(view.is_settled());
        assert_eq!(view.connection, ConnectionState::Idle);
    }
}
