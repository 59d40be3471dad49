//! Pool configuration surface

use super::conn::{Connection, Transport};
use crate::utils::{presets, RetryConfig};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Dialer
// ============================================================================

/// Creates new backend transports on demand.
///
/// Any `Fn() -> impl Future<Output = anyhow::Result<C>>` closure is a dialer.
#[async_trait]
pub trait Dialer<C>: Send + Sync + 'static {
    async fn dial(&self) -> anyhow::Result<C>;
}

#[async_trait]
impl<C, F, Fut> Dialer<C> for F
where
    C: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<C>> + Send + 'static,
{
    async fn dial(&self) -> anyhow::Result<C> {
        (self)().await
    }
}

/// Invoked with every connection handed out by `get`. The first error aborts
/// the checkout.
pub type ConnectionUsedHook<C> = Arc<dyn Fn(&Connection<C>) -> anyhow::Result<()> + Send + Sync>;

/// Hook that refreshes the connection's last-use time on checkout.
pub fn touch_hook<C: Transport>() -> ConnectionUsedHook<C> {
    Arc::new(|conn: &Connection<C>| {
        conn.touch();
        Ok(())
    })
}

// ============================================================================
// Pool Options
// ============================================================================

/// Configuration for [`ConnPool`](super::ConnPool)
pub struct PoolOptions<C> {
    /// Creates new transports
    pub dialer: Arc<dyn Dialer<C>>,
    /// Hooks run on every checkout
    pub connection_used_hooks: Vec<ConnectionUsedHook<C>>,
    /// Hand out the oldest idle connection first instead of the newest
    pub pool_fifo: bool,
    /// Admission slots, i.e. maximum concurrent checkouts plus in-flight dials
    pub pool_size: usize,
    /// How long `get` waits for an admission slot
    pub pool_timeout: Duration,
    /// Idle connections the pool keeps warm in the background
    pub min_idle_conns: usize,
    /// Idle connections kept on release; zero means unlimited
    pub max_idle_conns: usize,
    /// Cap on tracked connections; zero means unlimited
    pub max_active_conns: usize,
    /// Maximum connection age; zero disables the check
    pub conn_max_lifetime: Duration,
    /// Maximum time since last checkout; zero disables the check
    pub conn_max_idle_time: Duration,
    /// Backoff for the background dial probe
    pub dial_retry: RetryConfig,
}

impl<C: Transport> PoolOptions<C> {
    /// Create options with the default sizing
    pub fn new(dialer: impl Dialer<C>) -> Self {
        Self {
            dialer: Arc::new(dialer),
            connection_used_hooks: Vec::new(),
            pool_fifo: false,
            pool_size: 20,
            pool_timeout: Duration::from_secs(6),
            min_idle_conns: 3,
            max_idle_conns: 6,
            max_active_conns: 10,
            conn_max_lifetime: Duration::ZERO,
            conn_max_idle_time: Duration::ZERO,
            dial_retry: presets::dial_probe(),
        }
    }

    pub fn with_pool_fifo(mut self, fifo: bool) -> Self {
        self.pool_fifo = fifo;
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn with_pool_timeout(mut self, timeout: Duration) -> Self {
        self.pool_timeout = timeout;
        self
    }

    pub fn with_min_idle_conns(mut self, n: usize) -> Self {
        self.min_idle_conns = n;
        self
    }

    pub fn with_max_idle_conns(mut self, n: usize) -> Self {
        self.max_idle_conns = n;
        self
    }

    pub fn with_max_active_conns(mut self, n: usize) -> Self {
        self.max_active_conns = n;
        self
    }

    pub fn with_conn_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.conn_max_lifetime = lifetime;
        self
    }

    pub fn with_conn_max_idle_time(mut self, idle: Duration) -> Self {
        self.conn_max_idle_time = idle;
        self
    }

    pub fn with_dial_retry(mut self, retry: RetryConfig) -> Self {
        self.dial_retry = retry;
        self
    }

    /// Append connection-used hooks
    pub fn with_connection_used_hook(mut self, hook: ConnectionUsedHook<C>) -> Self {
        self.connection_used_hooks.push(hook);
        self
    }

    /// Upper bound on tracked connections that background top-up respects
    pub(crate) fn top_up_limit(&self) -> usize {
        if self.max_active_conns > 0 {
            self.pool_size.min(self.max_active_conns)
        } else {
            self.pool_size
        }
    }
}

impl<C> fmt::Debug for PoolOptions<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolOptions")
            .field("hooks", &self.connection_used_hooks.len())
            .field("pool_fifo", &self.pool_fifo)
            .field("pool_size", &self.pool_size)
            .field("pool_timeout", &self.pool_timeout)
            .field("min_idle_conns", &self.min_idle_conns)
            .field("max_idle_conns", &self.max_idle_conns)
            .field("max_active_conns", &self.max_active_conns)
            .field("conn_max_lifetime", &self.conn_max_lifetime)
            .field("conn_max_idle_time", &self.conn_max_idle_time)
            .field("dial_retry", &self.dial_retry)
            .finish()
    }
}
