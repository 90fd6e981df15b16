//! Observer tunables and their `RUNWATCH_*` environment overrides.

use std::time::Duration;

use crate::errors::WatchError;

/// Tunables for one observer.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Control-plane root, e.g. `https://api.example.com/v1`.
    pub base_url: String,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay: Duration,
    /// Interval between fallback polls of the run record.
    pub poll_interval: Duration,
    /// Total timeout for one-shot requests (fetch, cancel). Never applied to the event stream.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Drop the event stream if nothing arrives for this long. Off by default.
    pub stream_idle_timeout: Option<Duration>,
    /// Capacity of the session's inbound message channel.
    pub channel_capacity: usize,
    /// Stop reconnecting after this many consecutive failures. `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".into(),
            reconnect_delay: Duration::from_secs(3),
            poll_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            stream_idle_timeout: None,
            channel_capacity: 256,
            max_reconnect_attempts: None,
        }
    }
}

impl WatchConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Build from `RUNWATCH_*` environment variables over the defaults.
    ///
    /// Durations are given in milliseconds. Returns an error only for
    /// variables that are present but unparseable.
    pub fn from_env() -> Result<Self, WatchError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`WatchConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, WatchError> {
        let millis = |name: &str| -> Result<Option<Duration>, WatchError> {
            Ok(parse_u64(name, lookup(name))?.map(Duration::from_millis))
        };
        let mut config = Self::default();
        if let Some(base_url) = lookup("RUNWATCH_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(delay) = millis("RUNWATCH_RECONNECT_DELAY_MS")? {
            config.reconnect_delay = delay;
        }
        if let Some(interval) = millis("RUNWATCH_POLL_INTERVAL_MS")? {
            config.poll_interval = interval;
        }
        if let Some(timeout) = millis("RUNWATCH_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = timeout;
        }
        if let Some(timeout) = millis("RUNWATCH_CONNECT_TIMEOUT_MS")? {
            config.connect_timeout = timeout;
        }
        if let Some(timeout) = millis("RUNWATCH_STREAM_IDLE_TIMEOUT_MS")? {
            config.stream_idle_timeout = Some(timeout);
        }
        let attempts = "RUNWATCH_MAX_RECONNECT_ATTEMPTS";
        if let Some(n) = parse_u64(attempts, lookup(attempts))? {
            config.max_reconnect_attempts = Some(u32::try_from(n).unwrap_or(u32::MAX));
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), WatchError> {
        url::Url::parse(&self.base_url).map_err(|err| {
            WatchError::Configuration(format!("invalid base url '{}': {err}", self.base_url))
        })?;
        if self.channel_capacity == 0 {
            return Err(WatchError::Configuration(
                "channel capacity must be at least 1".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(WatchError::Configuration(
                "poll interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

fn parse_u64(name: &str, raw: Option<String>) -> Result<Option<u64>, WatchError> {
    raw.map(|raw| {
        raw.trim()
            .parse::<u64>()
            .map_err(|err| WatchError::Configuration(format!("{name}: {err}")))
    })
    .transpose()
}
