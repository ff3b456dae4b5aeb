//! Tracing subscriber bootstrap.

use std::str::FromStr;

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::config::ObservabilityConfig;

/// Level named by `log_level`. Unknown names fall back to `INFO`.
pub fn resolve_level(log_level: &str) -> Level {
    Level::from_str(log_level.trim()).unwrap_or(Level::INFO)
}

/// Install the process-wide fmt subscriber. Call once, from the binary.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let level = resolve_level(&config.log_level);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;
    if Level::from_str(config.log_level.trim()).is_err() {
        tracing::warn!(
            log_level = %config.log_level,
            "Unknown log level, falling back to info"
        );
    }
    Ok(())
}
