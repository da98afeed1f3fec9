//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Build the filter: `RUST_LOG` wins over the configured level.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install the global subscriber. Fails if one is already set.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(false)
        .with_thread_ids(true);

    match config.format {
        LogFormat::Pretty => builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))?,
        LogFormat::Json => builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_uses_configured_level() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
        };
        if std::env::var("RUST_LOG").is_err() {
            assert_eq!(env_filter(&config).to_string(), "debug");
        }
    }
}
