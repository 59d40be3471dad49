//! Application settings and configuration
//!
//! This module provides configuration management for the pool and the
//! balancer, loading settings from environment variables with sensible
//! defaults.

use crate::balance::BalanceType;
use crate::pool::{Dialer, PoolOptions, Transport};
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable single-line output
    #[value(alias = "text")]
    Compact,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Json => write!(f, "json"),
            LogFormat::Compact => write!(f, "compact"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "compact" | "text" => Ok(LogFormat::Compact),
            _ => anyhow::bail!("Invalid log format: {}. Expected: json or compact", s),
        }
    }
}

/// Runtime settings for the pool and the balancer
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    // Logging
    pub log_level: String,
    pub log_format: LogFormat,

    // Pool sizing
    pub pool_size: usize,
    pub pool_timeout_ms: u64,
    pub pool_fifo: bool,
    pub min_idle_conns: usize,
    pub max_idle_conns: usize,
    /// Zero means unlimited
    pub max_active_conns: usize,

    // Connection validity, zero disables
    pub conn_max_lifetime_secs: u64,
    pub conn_max_idle_time_secs: u64,

    // Balancing
    pub balance_type: BalanceType,
    pub virtual_nodes: usize,
}

impl Settings {
    /// Load settings from environment variables with defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup, then validate them
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |key: &str, default: String| lookup(key).unwrap_or(default);

        let settings = Self {
            log_level: get("LOG_LEVEL", defaults.log_level.clone()),
            log_format: get("LOG_FORMAT", defaults.log_format.to_string()).parse()?,

            pool_size: get("POOL_SIZE", defaults.pool_size.to_string())
                .parse()
                .context("Invalid POOL_SIZE value")?,
            pool_timeout_ms: get("POOL_TIMEOUT_MS", defaults.pool_timeout_ms.to_string())
                .parse()
                .context("Invalid POOL_TIMEOUT_MS value")?,
            pool_fifo: get("POOL_FIFO", defaults.pool_fifo.to_string())
                .parse()
                .context("Invalid POOL_FIFO value")?,
            min_idle_conns: get("MIN_IDLE_CONNS", defaults.min_idle_conns.to_string())
                .parse()
                .context("Invalid MIN_IDLE_CONNS value")?,
            max_idle_conns: get("MAX_IDLE_CONNS", defaults.max_idle_conns.to_string())
                .parse()
                .context("Invalid MAX_IDLE_CONNS value")?,
            max_active_conns: get("MAX_ACTIVE_CONNS", defaults.max_active_conns.to_string())
                .parse()
                .context("Invalid MAX_ACTIVE_CONNS value")?,

            conn_max_lifetime_secs: get(
                "CONN_MAX_LIFETIME_SECS",
                defaults.conn_max_lifetime_secs.to_string(),
            )
            .parse()
            .context("Invalid CONN_MAX_LIFETIME_SECS value")?,
            conn_max_idle_time_secs: get(
                "CONN_MAX_IDLE_TIME_SECS",
                defaults.conn_max_idle_time_secs.to_string(),
            )
            .parse()
            .context("Invalid CONN_MAX_IDLE_TIME_SECS value")?,

            balance_type: get("BALANCE_TYPE", defaults.balance_type.to_string())
                .parse()
                .context("Invalid BALANCE_TYPE value")?,
            virtual_nodes: get("VIRTUAL_NODES", defaults.virtual_nodes.to_string())
                .parse()
                .context("Invalid VIRTUAL_NODES value")?,
        };

        settings.validate()?;

        Ok(settings)
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            anyhow::bail!("Pool size must be > 0");
        }

        if self.pool_timeout_ms == 0 {
            anyhow::bail!("Pool timeout must be > 0");
        }

        if self.max_idle_conns > 0 && self.max_idle_conns < self.min_idle_conns {
            anyhow::bail!(
                "MAX_IDLE_CONNS ({}) must be >= MIN_IDLE_CONNS ({})",
                self.max_idle_conns,
                self.min_idle_conns
            );
        }

        if self.virtual_nodes == 0 {
            anyhow::bail!("Virtual nodes must be > 0");
        }

        if self.max_active_conns > self.pool_size {
            tracing::warn!(
                max_active_conns = self.max_active_conns,
                pool_size = self.pool_size,
                "MAX_ACTIVE_CONNS exceeds POOL_SIZE; concurrency stays bounded by POOL_SIZE"
            );
        }

        Ok(())
    }

    pub fn pool_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_timeout_ms)
    }

    /// Pool options carrying these settings
    pub fn pool_options<C: Transport>(&self, dialer: impl Dialer<C>) -> PoolOptions<C> {
        PoolOptions::new(dialer)
            .with_pool_fifo(self.pool_fifo)
            .with_pool_size(self.pool_size)
            .with_pool_timeout(self.pool_timeout())
            .with_min_idle_conns(self.min_idle_conns)
            .with_max_idle_conns(self.max_idle_conns)
            .with_max_active_conns(self.max_active_conns)
            .with_conn_max_lifetime(Duration::from_secs(self.conn_max_lifetime_secs))
            .with_conn_max_idle_time(Duration::from_secs(self.conn_max_idle_time_secs))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            pool_size: 20,
            pool_timeout_ms: 6_000,
            pool_fifo: false,
            min_idle_conns: 3,
            max_idle_conns: 6,
            max_active_conns: 10,
            conn_max_lifetime_secs: 0,
            conn_max_idle_time_secs: 0,
            balance_type: BalanceType::RoundRobin,
            virtual_nodes: crate::balance::DEFAULT_VIRTUAL_NODES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.pool_size, 20);
        assert_eq!(settings.pool_timeout(), Duration::from_secs(6));
        assert_eq!(settings.min_idle_conns, 3);
        assert_eq!(settings.max_idle_conns, 6);
        assert_eq!(settings.max_active_conns, 10);
        assert_eq!(settings.virtual_nodes, 10);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let settings = Settings::from_lookup(lookup(&[
            ("POOL_SIZE", "8"),
            ("POOL_TIMEOUT_MS", "250"),
            ("POOL_FIFO", "true"),
            ("MAX_ACTIVE_CONNS", "0"),
            ("BALANCE_TYPE", "wlc"),
            ("LOG_FORMAT", "text"),
        ]))
        .unwrap();

        assert_eq!(settings.pool_size, 8);
        assert_eq!(settings.pool_timeout(), Duration::from_millis(250));
        assert!(settings.pool_fifo);
        assert_eq!(settings.max_active_conns, 0);
        assert_eq!(settings.balance_type, BalanceType::WeightedLeastConnection);
        assert_eq!(settings.log_format, LogFormat::Compact);
        assert_eq!(settings.min_idle_conns, 3);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Settings::from_lookup(lookup(&[("POOL_SIZE", "zero")])).is_err());
        assert!(Settings::from_lookup(lookup(&[("POOL_SIZE", "0")])).is_err());
        assert!(Settings::from_lookup(lookup(&[("BALANCE_TYPE", "random")])).is_err());
        assert!(Settings::from_lookup(lookup(&[("VIRTUAL_NODES", "0")])).is_err());

        let err = Settings::from_lookup(lookup(&[("MIN_IDLE_CONNS", "8")])).unwrap_err();
        assert!(err.to_string().contains("MAX_IDLE_CONNS"));
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("COMPACT".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_pool_options_conversion() {
        struct Noop;

        impl Transport for Noop {
            fn close(&self) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let settings = Settings {
            pool_fifo: true,
            conn_max_lifetime_secs: 30,
            ..Settings::default()
        };
        let opts = settings.pool_options(|| async { Ok::<_, anyhow::Error>(Noop) });

        assert!(opts.pool_fifo);
        assert_eq!(opts.pool_size, 20);
        assert_eq!(opts.conn_max_lifetime, Duration::from_secs(30));
        assert_eq!(opts.conn_max_idle_time, Duration::ZERO);
    }
}
