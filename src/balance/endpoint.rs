//! Pool-backed endpoint
//!
//! [`PoolEndpoint`] puts a [`ConnPool`] behind the [`Endpoint`] capability
//! traits so any strategy can route across a set of pools. Checkouts come back
//! as [`PooledConn`] guards that return the connection on drop.

use super::{Endpoint, EndpointStats, LoadTracked, Weighted};
use crate::error::PoolError;
use crate::pool::{ConnPool, Connection, PoolOptions, PoolStats, Transport};
use async_trait::async_trait;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Pooled Connection Guard
// ============================================================================

/// A checked-out connection that goes back to its pool when dropped.
pub struct PooledConn<C: Transport> {
    conn: Arc<Connection<C>>,
    pool: ConnPool<C>,
}

impl<C: Transport> PooledConn<C> {
    pub fn new(conn: Arc<Connection<C>>, pool: ConnPool<C>) -> Self {
        Self { conn, pool }
    }

    pub fn connection(&self) -> &Arc<Connection<C>> {
        &self.conn
    }

    /// Close the connection so the pool drops it instead of reusing it.
    pub fn discard(self) {
        if let Err(err) = self.conn.close() {
            tracing::debug!(error = %err, "Failed to close discarded connection");
        }
    }
}

impl<C: Transport> Deref for PooledConn<C> {
    type Target = Connection<C>;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<C: Transport> Drop for PooledConn<C> {
    fn drop(&mut self) {
        self.pool.release(&self.conn);
    }
}

impl<C: Transport> fmt::Debug for PooledConn<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConn").field("conn", &self.conn).finish()
    }
}

// ============================================================================
// Pool Endpoint
// ============================================================================

/// An endpoint whose resources are connections from its own pool.
///
/// The active count is the larger of the selections not yet released by the
/// caller and the connections checked out of the pool, so a selection that
/// has since taken a connection is counted once. The idle count comes from
/// the pool.
pub struct PoolEndpoint<C: Transport> {
    addr: String,
    weight: u32,
    pool: ConnPool<C>,
    active: AtomicUsize,
}

impl<C: Transport> PoolEndpoint<C> {
    pub fn new(addr: impl Into<String>, weight: u32, pool: ConnPool<C>) -> Self {
        Self {
            addr: addr.into(),
            weight,
            pool,
            active: AtomicUsize::new(0),
        }
    }

    /// Create the endpoint together with its pool
    pub fn with_options(addr: impl Into<String>, weight: u32, opts: PoolOptions<C>) -> Self {
        Self::new(addr, weight, ConnPool::new(opts))
    }

    pub fn pool(&self) -> &ConnPool<C> {
        &self.pool
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

#[async_trait]
impl<C: Transport> Endpoint for PoolEndpoint<C> {
    type Resource = PooledConn<C>;

    fn addr(&self) -> &str {
        &self.addr
    }

    async fn acquire(&self, ctx: &CancellationToken) -> Result<PooledConn<C>, PoolError> {
        let conn = self.pool.get(ctx).await?;
        Ok(PooledConn::new(conn, self.pool.clone()))
    }

    fn close(&self) -> Result<(), PoolError> {
        match self.pool.close() {
            Err(PoolError::Closed) | Ok(()) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn stats(&self) -> EndpointStats {
        EndpointStats {
            active_conns: self.active_connections(),
            idle_conns: self.idle_connections(),
        }
    }
}

impl<C: Transport> Weighted for PoolEndpoint<C> {
    fn weight(&self) -> u32 {
        self.weight
    }
}

impl<C: Transport> LoadTracked for PoolEndpoint<C> {
    fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire).max(self.pool.in_use_len())
    }

    fn idle_connections(&self) -> usize {
        self.pool.idle_len()
    }

    fn add_active_connection(&self) {
        self.active.fetch_add(1, Ordering::AcqRel);
    }

    fn release_active_connection(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

impl<C: Transport> fmt::Debug for PoolEndpoint<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolEndpoint")
            .field("addr", &self.addr)
            .field("weight", &self.weight)
            .field("active", &self.active_connections())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Transport for Noop {
        fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn endpoint(addr: &str) -> PoolEndpoint<Noop> {
        let opts = PoolOptions::new(|| async { Ok::<_, anyhow::Error>(Noop) }).with_min_idle_conns(0);
        PoolEndpoint::with_options(addr, 2, opts)
    }

    #[tokio::test]
    async fn test_guard_returns_connection() {
        let ep = endpoint("10.0.0.1:80");
        let ctx = CancellationToken::new();

        let conn = ep.get(&ctx).await.unwrap();
        assert!(conn.is_in_use());
        assert_eq!(ep.pool().in_use_len(), 1);
        drop(conn);

        assert_eq!(ep.pool().in_use_len(), 0);
        assert_eq!(ep.stats().idle_conns, 1);
    }

    #[tokio::test]
    async fn test_discard_closes_connection() {
        let ep = endpoint("10.0.0.1:80");
        let ctx = CancellationToken::new();

        let conn = ep.get(&ctx).await.unwrap();
        let raw = Arc::clone(conn.connection());
        conn.discard();

        assert!(raw.is_closed());
        assert_eq!(ep.pool().len(), 0);
        assert_eq!(ep.pool_stats().invalid_conns, 1);
    }

    #[tokio::test]
    async fn test_active_count_tracks_selection() {
        let ep = endpoint("10.0.0.1:80");
        ep.add_active_connection();
        ep.add_active_connection();
        ep.release_active_connection();
        assert_eq!(ep.stats().active_conns, 1);
        ep.release_active_connection();
        ep.release_active_connection();
        assert_eq!(ep.active_connections(), 0);
        assert_eq!(ep.weight(), 2);
    }

    #[tokio::test]
    async fn test_active_count_includes_checked_out_connections() {
        let ep = endpoint("10.0.0.1:80");
        let ctx = CancellationToken::new();

        let held: Vec<_> = futures::future::try_join_all((0..3).map(|_| ep.get(&ctx)))
            .await
            .unwrap();
        assert_eq!(ep.active_connections(), 3);

        // A selection that then checks out is not counted twice
        ep.add_active_connection();
        let conn = ep.get(&ctx).await.unwrap();
        assert_eq!(ep.stats().active_conns, 4);

        drop(conn);
        ep.release_active_connection();
        drop(held);
        assert_eq!(ep.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_close_is_repeatable() {
        let ep = endpoint("10.0.0.1:80");
        ep.close().unwrap();
        ep.close().unwrap();

        let ctx = CancellationToken::new();
        assert!(matches!(ep.get(&ctx).await, Err(PoolError::Closed)));
    }
}
