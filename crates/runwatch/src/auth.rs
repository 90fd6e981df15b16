//! Bearer credential sources.
//!
//! The engine asks its source for a token on every connection attempt and
//! never caches the answer, so a session renewed elsewhere is picked up by
//! the next reconnect.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::errors::WatchError;

#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Current bearer credential, or `None` for unauthenticated access.
    async fn token(&self) -> Result<Option<String>, WatchError>;
}

/// A fixed credential (or none).
#[derive(Clone, Debug, Default)]
pub struct StaticToken(pub Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<Option<String>, WatchError> {
        Ok(self.0.clone())
    }
}

/// Reads an environment variable on every call.
#[derive(Clone, Debug)]
pub struct EnvToken {
    pub var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl TokenSource for EnvToken {
    async fn token(&self) -> Result<Option<String>, WatchError> {
        Ok(std::env::var(&self.var)
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|token| !token.is_empty()))
    }
}

/// Re-reads a credential file on every call; a session layer may rotate it.
#[derive(Clone, Debug)]
pub struct FileToken {
    pub path: PathBuf,
}

impl FileToken {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TokenSource for FileToken {
    async fn token(&self) -> Result<Option<String>, WatchError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|err| {
            WatchError::Credential(format!("read {}: {err}", self.path.display()))
        })?;
        let token = raw.trim();
        Ok((!token.is_empty()).then(|| token.to_string()))
    }
}
