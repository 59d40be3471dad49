//! Connection Balancer
//!
//! Drives simulated traffic through a set of pooled endpoints using one of
//! the load balancing strategies and reports how the load was spread.

use anyhow::{Context, Result};
use clap::Parser;
use conn_balancer::{
    balance::{self, BalanceType, Endpoint, LoadTracked, PoolEndpoint, Weighted},
    config::{LogFormat, Settings},
    logging::init_tracing,
    pool::{PoolStats, Transport},
};
use futures::stream::{self, StreamExt};
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Connection Balancer
///
/// Simulates requests against in-memory backends, each behind its own
/// connection pool, and prints per-endpoint statistics as JSON.
#[derive(Parser, Debug)]
#[command(name = "conn-balancer")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Strategy: round_robin, wrr, consistent_hash, lc, sed, wlc, nq
    /// (overrides BALANCE_TYPE env var)
    #[arg(short, long)]
    strategy: Option<BalanceType>,

    /// Number of simulated backends
    #[arg(short, long, default_value_t = 3)]
    endpoints: usize,

    /// Total requests to send
    #[arg(short, long, default_value_t = 500)]
    requests: usize,

    /// Requests in flight at once
    #[arg(short, long, default_value_t = 32)]
    concurrency: usize,

    /// Distinct request keys for consistent hashing
    #[arg(long, default_value_t = 64)]
    clients: usize,

    /// Simulated time to dial a backend connection
    #[arg(long, default_value_t = 5)]
    dial_latency_ms: u64,

    /// Simulated time a request holds its connection
    #[arg(long, default_value_t = 2)]
    work_ms: u64,

    /// Probability in [0, 1] that a dial fails
    #[arg(long, default_value_t = 0.0)]
    dial_failure_rate: f64,

    /// Connection pool size per endpoint (overrides POOL_SIZE env var)
    #[arg(long)]
    pool_size: Option<usize>,

    /// Cap on connections per endpoint (overrides MAX_ACTIVE_CONNS env var)
    #[arg(long)]
    max_active_conns: Option<usize>,

    /// Log level: trace, debug, info, warn, error (overrides LOG_LEVEL env var)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format: json, compact (overrides LOG_FORMAT env var)
    #[arg(long)]
    log_format: Option<LogFormat>,
}

// ============================================================================
// Simulated Backend
// ============================================================================

/// In-memory stand-in for a network connection
#[derive(Debug)]
struct SimConn {
    id: u64,
    backend: String,
}

impl Transport for SimConn {
    fn close(&self) -> anyhow::Result<()> {
        tracing::trace!(id = self.id, backend = %self.backend, "Closing simulated connection");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct EndpointReport {
    addr: String,
    weight: u32,
    selected: usize,
    active: usize,
    pool: PoolStats,
}

#[derive(Debug, Serialize)]
struct Report {
    strategy: BalanceType,
    requests: usize,
    succeeded: usize,
    failed: usize,
    errors: HashMap<String, usize>,
    elapsed_ms: u128,
    endpoints: Vec<EndpointReport>,
}

type SimEndpoint = PoolEndpoint<SimConn>;

fn build_endpoints(settings: &Settings, args: &Args) -> Vec<Arc<SimEndpoint>> {
    let next_id = Arc::new(AtomicU64::new(0));

    (0..args.endpoints)
        .map(|i| {
            let addr = format!("10.0.0.{}:8080", i + 1);
            let backend = addr.clone();
            let next_id = Arc::clone(&next_id);
            let latency = Duration::from_millis(args.dial_latency_ms);
            let failure_rate = if args.dial_failure_rate.is_nan() {
                0.0
            } else {
                args.dial_failure_rate.clamp(0.0, 1.0)
            };

            let dialer = move || {
                let backend = backend.clone();
                let next_id = Arc::clone(&next_id);
                async move {
                    tokio::time::sleep(latency).await;
                    if rand::thread_rng().gen_bool(failure_rate) {
                        anyhow::bail!("connection refused by {backend}");
                    }
                    Ok(SimConn {
                        id: next_id.fetch_add(1, Ordering::Relaxed),
                        backend,
                    })
                }
            };

            // Later backends get more weight so weighted strategies differ
            let weight = (i + 1) as u32;
            Arc::new(PoolEndpoint::with_options(
                addr,
                weight,
                settings.pool_options(dialer),
            ))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration first (before logging, so we can use log_level)
    let mut settings = Settings::load()?;

    // Override settings with CLI arguments
    if let Some(strategy) = args.strategy {
        settings.balance_type = strategy;
    }
    if let Some(pool_size) = args.pool_size {
        settings.pool_size = pool_size;
    }
    if let Some(max_active) = args.max_active_conns {
        settings.max_active_conns = max_active;
    }
    if let Some(log_level) = args.log_level.clone() {
        settings.log_level = log_level;
    }
    if let Some(log_format) = args.log_format {
        settings.log_format = log_format;
    }
    settings.validate()?;

    init_tracing(&settings.log_level, settings.log_format)?;

    if args.endpoints == 0 {
        anyhow::bail!("At least one endpoint is required");
    }

    tracing::info!(
        strategy = %settings.balance_type,
        endpoints = args.endpoints,
        requests = args.requests,
        concurrency = args.concurrency,
        pool_size = settings.pool_size,
        "Starting simulation"
    );

    let endpoints = build_endpoints(&settings, &args);
    let lb = balance::with_virtual_nodes(
        settings.balance_type,
        endpoints.clone(),
        settings.virtual_nodes,
    )
    .context("Failed to build load balancer")?;

    // Ctrl-C cancels requests still waiting for a connection
    let ctx = CancellationToken::new();
    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling pending requests");
                ctx.cancel();
            }
        });
    }

    let work = Duration::from_millis(args.work_ms);
    let clients = args.clients.max(1);
    let started = Instant::now();

    let outcomes: Vec<Result<String, String>> = stream::iter(0..args.requests)
        .map(|i| {
            let lb = &lb;
            let ctx = &ctx;
            async move {
                let key = format!("client-{}", i % clients);
                let endpoint = lb.select(Some(key.as_str())).map_err(|e| e.to_string())?;

                let result = match endpoint.get(ctx).await {
                    Ok(conn) => {
                        tokio::time::sleep(work).await;
                        drop(conn);
                        Ok(endpoint.addr().to_string())
                    }
                    Err(err) => Err(err.to_string()),
                };

                endpoint.release_active_connection();
                result
            }
        })
        .buffer_unordered(args.concurrency.max(1))
        .collect()
        .await;

    let elapsed = started.elapsed();

    let mut selected: HashMap<String, usize> = HashMap::new();
    let mut errors: HashMap<String, usize> = HashMap::new();
    for outcome in &outcomes {
        match outcome {
            Ok(addr) => *selected.entry(addr.clone()).or_default() += 1,
            Err(err) => *errors.entry(err.clone()).or_default() += 1,
        }
    }

    let failed: usize = errors.values().sum();
    let report = Report {
        strategy: settings.balance_type,
        requests: args.requests,
        succeeded: outcomes.len() - failed,
        failed,
        errors,
        elapsed_ms: elapsed.as_millis(),
        endpoints: endpoints
            .iter()
            .map(|ep| EndpointReport {
                addr: ep.addr().to_string(),
                weight: ep.weight(),
                selected: selected.get(ep.addr()).copied().unwrap_or(0),
                active: ep.active_connections(),
                pool: ep.pool_stats(),
            })
            .collect(),
    };

    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Err(err) = lb.close() {
        tracing::warn!(error = %err, "Error while closing endpoints");
    }

    tracing::info!(
        succeeded = report.succeeded,
        failed = report.failed,
        "Simulation complete"
    );

    Ok(())
}
