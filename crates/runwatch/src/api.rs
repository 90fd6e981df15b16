//! Control-plane client: run snapshots, cancellation, and the event feed.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::WatchConfig;
use crate::errors::WatchError;
use crate::sse::{SseEvent, SseParser};

/// Raw SSE messages from one subscription attempt. The stream ends when
/// the server closes the connection; transport failures arrive as `Err`.
pub type SseEventStream = Pin<Box<dyn Stream<Item = Result<SseEvent, WatchError>> + Send>>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    #[serde(untagged)]
    Other(String),
}

impl RunStatus {
    /// Queued or running: there is (or will be) a live event feed.
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Other(raw) => raw,
        }
    }
}

/// Authoritative run record owned by the control plane.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_time_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RunRecord {
    pub fn new(id: impl Into<String>, status: RunStatus) -> Self {
        Self {
            id: id.into(),
            status,
            compute_time_seconds: None,
            error_message: None,
            extra: Map::new(),
        }
    }
}

/// The control-plane operations the engine depends on.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn fetch_run(&self, run_id: &str) -> Result<RunRecord, WatchError>;

    async fn cancel_run(&self, run_id: &str) -> Result<(), WatchError>;

    /// Open the run's event feed. `token` is sent as a query parameter and
    /// `last_event_id` as the resume cursor.
    async fn subscribe(
        &self,
        run_id: &str,
        token: Option<String>,
        last_event_id: Option<String>,
    ) -> Result<SseEventStream, WatchError>;
}

#[derive(Clone)]
pub struct HttpControlPlane {
    client: reqwest::Client,
    base: url::Url,
    request_timeout: Duration,
    idle_timeout: Option<Duration>,
}

impl std::fmt::Debug for HttpControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpControlPlane")
            .field("base", &self.base.as_str())
            .field("request_timeout", &self.request_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl HttpControlPlane {
    pub fn new(config: &WatchConfig) -> Result<Self, WatchError> {
        config.validate()?;
        let mut base = url::Url::parse(&config.base_url)
            .map_err(|err| WatchError::Configuration(err.to_string()))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        // No client-wide timeout: it would cut the long-lived event stream.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|err| WatchError::Configuration(err.to_string()))?;
        Ok(Self {
            client,
            base,
            request_timeout: config.request_timeout,
            idle_timeout: config.stream_idle_timeout,
        })
    }

    fn run_url(&self, run_id: &str, suffix: &[&str]) -> Result<url::Url, WatchError> {
        let mut url = self.base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                WatchError::Configuration(format!("base url cannot be a base: {}", self.base))
            })?;
            segments.pop_if_empty().push("runs").push(run_id);
            for part in suffix {
                segments.push(part);
            }
        }
        Ok(url)
    }

    /// Subscription URL; exposed so callers can log it without the token.
    pub fn events_url(&self, run_id: &str, token: Option<&str>) -> Result<url::Url, WatchError> {
        let mut url = self.run_url(run_id, &["events"])?;
        if let Some(token) = token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn fetch_run(&self, run_id: &str) -> Result<RunRecord, WatchError> {
        let response = self
            .client
            .get(self.run_url(run_id, &[])?)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(WatchError::from_reqwest)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(WatchError::http(status, &body));
        }
        response
            .json::<RunRecord>()
            .await
            .map_err(|err| WatchError::Malformed(format!("run record: {err}")))
    }

    async fn cancel_run(&self, run_id: &str) -> Result<(), WatchError> {
        let response = self
            .client
            .post(self.run_url(run_id, &["cancel"])?)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(WatchError::from_reqwest)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(WatchError::http(status, &body));
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        run_id: &str,
        token: Option<String>,
        last_event_id: Option<String>,
    ) -> Result<SseEventStream, WatchError> {
        let mut request = self
            .client
            .get(self.events_url(run_id, token.as_deref())?)
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        if let Some(value) = resume_header(last_event_id.as_deref()) {
            request = request.header("Last-Event-ID", value);
        }
        let response = request.send().await.map_err(WatchError::from_reqwest)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(WatchError::http(status, &body));
        }

        Ok(Box::pin(sse_frames(response.bytes_stream(), self.idle_timeout)))
    }
}

/// `Last-Event-ID` value for a cursor, or `None` when the cursor cannot be
/// sent as a header. Such a cursor is dropped rather than failing every
/// attempt; the server then replays and the session dedups.
fn resume_header(cursor: Option<&str>) -> Option<HeaderValue> {
    let cursor = cursor?;
    match HeaderValue::from_str(cursor) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::debug!(?cursor, "cursor is not a valid header value; resuming without it");
            None
        }
    }
}

struct FrameReader<S> {
    bytes: S,
    /// `None` once the body has ended or failed.
    parser: Option<SseParser>,
    queued: VecDeque<SseEvent>,
    idle_timeout: Option<Duration>,
}

/// Decode a response body into SSE messages. The returned stream owns the
/// body, so dropping it closes the connection.
fn sse_frames<S, B, E>(
    bytes: S,
    idle_timeout: Option<Duration>,
) -> impl Stream<Item = Result<SseEvent, WatchError>> + Send
where
    S: Stream<Item = Result<B, E>> + Unpin + Send,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    let reader = FrameReader {
        bytes,
        parser: Some(SseParser::new()),
        queued: VecDeque::new(),
        idle_timeout,
    };
    futures::stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(event) = reader.queued.pop_front() {
                return Some((Ok(event), reader));
            }
            let parser = reader.parser.as_mut()?;
            let next = match reader.idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, reader.bytes.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        reader.parser = None;
                        return Some((Err(WatchError::IdleTimeout(limit)), reader));
                    }
                },
                None => reader.bytes.next().await,
            };
            match next {
                Some(Ok(chunk)) => reader.queued.extend(parser.push(chunk.as_ref())),
                Some(Err(err)) => {
                    reader.parser = None;
                    return Some((Err(WatchError::Stream(err.to_string())), reader));
                }
                None => reader.queued.extend(reader.parser.take().and_then(SseParser::finish)),
            }
        }
    })
}
