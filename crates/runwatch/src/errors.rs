//! Error taxonomy for the observation engine.
//!
//! None of these escape a running observation: the session actor turns
//! them into connection state or log lines. They surface directly only from
//! one-shot control-plane calls (`fetch_run`, `cancel_run`).

use thiserror::Error;

/// Classification of a non-success HTTP status from the control plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpFailure {
    Authentication,
    AccessDenied,
    NotFound,
    InvalidRequest,
    RateLimit,
    Server,
    Other,
}

impl HttpFailure {
    pub fn retryable(self) -> bool {
        matches!(self, HttpFailure::RateLimit | HttpFailure::Server | HttpFailure::Other)
    }
}

/// Map an HTTP status code to a failure class.
pub fn map_http_status(status: u16) -> HttpFailure {
    match status {
        401 => HttpFailure::Authentication,
        403 => HttpFailure::AccessDenied,
        404 => HttpFailure::NotFound,
        400 | 409 | 422 => HttpFailure::InvalidRequest,
        408 | 429 => HttpFailure::RateLimit,
        500..=599 => HttpFailure::Server,
        _ => HttpFailure::Other,
    }
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum WatchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("control plane returned {status}: {message}")]
    Http {
        status: u16,
        kind: HttpFailure,
        message: String,
    },
    #[error("event stream error: {0}")]
    Stream(String),
    #[error("event stream idle for longer than {0:?}")]
    IdleTimeout(std::time::Duration),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("credential unavailable: {0}")]
    Credential(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl WatchError {
    pub fn http(status: u16, body: &str) -> Self {
        let message = extract_message(body).unwrap_or_else(|| {
            if body.trim().is_empty() {
                "empty response body".to_string()
            } else {
                body.trim().to_string()
            }
        });
        WatchError::Http {
            status,
            kind: map_http_status(status),
            message,
        }
    }

    pub fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_decode() {
            WatchError::Malformed(error.to_string())
        } else {
            WatchError::Network(error.to_string())
        }
    }

    /// Whether repeating the same call could succeed.
    ///
    /// The stream client reconnects regardless of this flag; it only
    /// informs one-shot callers.
    pub fn retryable(&self) -> bool {
        match self {
            WatchError::Network(_) | WatchError::Stream(_) | WatchError::IdleTimeout(_) => true,
            WatchError::Http { kind, .. } => kind.retryable(),
            WatchError::Credential(_) => true,
            WatchError::Malformed(_) | WatchError::Configuration(_) => false,
        }
    }
}

// Control-plane error bodies are `{"detail": "..."}` or `{"error": {"message": "..."}}`.
fn extract_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    if let Some(detail) = value.get("detail").and_then(|v| v.as_str()) {
        return Some(detail.to_string());
    }
    if let Some(message) = value.get("message").and_then(|v| v.as_str()) {
        return Some(message.to_string());
    }
    value
        .get("error")
        .and_then(|e| e.get("message").or(Some(e)))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}
