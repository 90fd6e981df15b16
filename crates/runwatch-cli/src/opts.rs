//! Global CLI options and engine wiring.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use runwatch::{FileToken, HttpControlPlane, StaticToken, TokenSource, WatchConfig};

/// Global options for CLI commands.
///
/// These options apply to all commands and can be set via env vars.
/// Timing knobs (`RUNWATCH_RECONNECT_DELAY_MS`, `RUNWATCH_POLL_INTERVAL_MS`,
/// ...) are read from the environment only.
#[derive(Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Control-plane base URL (env: RUNWATCH_BASE_URL)
    #[arg(long, global = true, env = "RUNWATCH_BASE_URL")]
    pub base_url: Option<String>,

    /// Bearer token sent with the event subscription (env: RUNWATCH_TOKEN)
    #[arg(long, global = true, env = "RUNWATCH_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// File holding the bearer token, re-read on every reconnect (env: RUNWATCH_TOKEN_FILE)
    #[arg(long, global = true, env = "RUNWATCH_TOKEN_FILE", conflicts_with = "token")]
    pub token_file: Option<PathBuf>,

    /// JSON output envelope
    #[arg(long, global = true)]
    pub json: bool,

    /// Pretty-print JSON output (implies --json)
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Suppress notices (e.g., reconnects)
    #[arg(long, global = true)]
    pub quiet: bool,
}

impl GlobalOpts {
    pub fn json_mode(&self) -> bool {
        self.json || self.pretty
    }

    pub fn watch_config(&self) -> Result<WatchConfig> {
        let mut config = WatchConfig::from_env().context("read RUNWATCH_* environment")?;
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        config
            .validate()
            .with_context(|| format!("invalid base url '{}'", config.base_url))?;
        Ok(config)
    }

    pub fn control_plane(&self, config: &WatchConfig) -> Result<Arc<HttpControlPlane>> {
        let plane = HttpControlPlane::new(config).context("build control-plane client")?;
        Ok(Arc::new(plane))
    }

    pub fn token_source(&self) -> Arc<dyn TokenSource> {
        match (&self.token, &self.token_file) {
            (_, Some(path)) => Arc::new(FileToken::new(path)),
            (Some(token), None) => Arc::new(StaticToken::new(token.clone())),
            (None, None) => Arc::new(StaticToken::none()),
        }
    }
}
