//! Logging setup
//!
//! Installs the global tracing subscriber used by the binary. Library code
//! only emits events; it never installs a subscriber itself.

use crate::config::LogFormat;
use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Build the filter from RUST_LOG, falling back to the configured level.
pub fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

/// Initialize the tracing subscriber with the given level and format.
///
/// Logs go to stderr so stdout stays free for command output. Fails if a
/// global subscriber is already installed.
pub fn init_tracing(log_level: &str, format: LogFormat) -> Result<()> {
    let filter = env_filter(log_level);

    let layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry().with(layer).try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_falls_back_to_level() {
        // RUST_LOG may be set in CI; either way a filter is produced
        let filter = env_filter("debug");
        assert!(!filter.to_string().is_empty());
    }

    #[test]
    fn test_init_twice_fails() {
        let first = init_tracing("info", LogFormat::Compact);
        let second = init_tracing("info", LogFormat::Json);
        // Only one global subscriber can win; other tests may have set one
        assert!(first.is_err() || second.is_err());
    }
}
