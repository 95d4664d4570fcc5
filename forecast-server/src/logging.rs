use anyhow::{Context, Result, anyhow};
use tracing_subscriber::EnvFilter;

/// JSON logs on stdout. `RUST_LOG` wins over the configured level.
pub fn init(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("Invalid log level '{level}'"))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .json()
        .flatten_event(true)
        .try_init()
        .map_err(|e| anyhow!("Failed to install log subscriber: {e}"))
}
