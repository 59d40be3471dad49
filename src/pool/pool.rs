//! Connection Pool Implementation
//!
//! [`ConnPool`] keeps a bounded set of [`Connection`]s. Every checkout holds an
//! admission slot from a counting semaphore sized to `pool_size`; background
//! idle top-up dials contend for the same slots, so total concurrency never
//! exceeds the configured bound.

use super::conn::{Connection, Transport};
use super::options::PoolOptions;
use super::stats::{AtomicPoolStats, PoolStats};
use crate::error::PoolError;
use crate::utils::retry_with_backoff;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Pool State
// ============================================================================

/// Collections guarded by the pool mutex.
///
/// `pool_size` and `idle_len` also count connections whose background dial is
/// still in flight, so they can run ahead of `conns.len()` and `idle.len()`.
struct PoolState<C> {
    /// Every tracked connection, idle or checked out
    conns: Vec<Arc<Connection<C>>>,
    /// Idle subset of `conns`
    idle: VecDeque<Arc<Connection<C>>>,
    pool_size: usize,
    idle_len: usize,
}

impl<C> PoolState<C> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            conns: Vec::with_capacity(capacity),
            idle: VecDeque::with_capacity(capacity),
            pool_size: 0,
            idle_len: 0,
        }
    }

    fn is_tracked(&self, cn: &Arc<Connection<C>>) -> bool {
        self.conns.iter().any(|c| Arc::ptr_eq(c, cn))
    }
}

struct PoolInner<C> {
    opts: PoolOptions<C>,
    /// Admission slots ("turns")
    queue: Semaphore,
    state: Mutex<PoolState<C>>,
    stats: AtomicPoolStats,
    dial_errors: AtomicUsize,
    /// Set while the background dial probe runs
    probing: AtomicBool,
    last_dial_error: Mutex<Option<PoolError>>,
    closed: AtomicBool,
    /// Cancelled on close to stop background tasks
    shutdown: CancellationToken,
}

// ============================================================================
// Connection Pool
// ============================================================================

/// A bounded pool of reusable connections.
///
/// Cloning is cheap and yields another handle to the same pool. The pool must
/// be created inside a tokio runtime for background idle top-up to run.
pub struct ConnPool<C> {
    inner: Arc<PoolInner<C>>,
}

impl<C> Clone for ConnPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Transport> ConnPool<C> {
    /// Create a pool and start warming `min_idle_conns` connections.
    pub fn new(opts: PoolOptions<C>) -> Self {
        let capacity = opts.pool_size;
        let pool = Self {
            inner: Arc::new(PoolInner {
                queue: Semaphore::new(opts.pool_size),
                state: Mutex::new(PoolState::with_capacity(capacity)),
                stats: AtomicPoolStats::default(),
                dial_errors: AtomicUsize::new(0),
                probing: AtomicBool::new(false),
                last_dial_error: Mutex::new(None),
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                opts,
            }),
        };

        {
            let mut state = pool.inner.state.lock();
            pool.check_min_idle_conns(&mut state);
        }

        pool
    }

    pub fn options(&self) -> &PoolOptions<C> {
        &self.inner.opts
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------------
    // Checkout
    // ------------------------------------------------------------------------

    /// Get an idle connection or dial a new one.
    ///
    /// Waits at most `pool_timeout` for an admission slot and returns early
    /// with [`PoolError::Cancelled`] when `ctx` fires. The slot stays held
    /// until the connection is handed back with [`release`](Self::release).
    pub async fn get(&self, ctx: &CancellationToken) -> Result<Arc<Connection<C>>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        self.wait_turn(ctx).await?;

        loop {
            let popped = {
                let mut state = self.inner.state.lock();
                self.pop_idle(&mut state)
            };

            let cn = match popped {
                Ok(Some(cn)) => cn,
                Ok(None) => break,
                Err(err) => {
                    self.free_turn();
                    return Err(err);
                }
            };

            if !cn.validate() {
                self.inner.stats.record_invalid();
                tracing::debug!("Discarding invalid idle connection");
                let _ = self.close_conn(&cn);
                continue;
            }

            self.inner.stats.record_hit();
            return self.checkout(cn);
        }

        self.inner.stats.record_miss();

        match self.new_conn().await {
            Ok(cn) => self.checkout(cn),
            Err(err) => {
                self.free_turn();
                Err(err)
            }
        }
    }

    /// Run hooks and hand the connection to the caller.
    fn checkout(&self, cn: Arc<Connection<C>>) -> Result<Arc<Connection<C>>, PoolError> {
        for hook in &self.inner.opts.connection_used_hooks {
            if let Err(err) = hook(&cn) {
                tracing::debug!(error = %err, "Connection used hook rejected checkout");
                self.recycle(&cn);
                self.free_turn();
                return Err(PoolError::hook(err));
            }
        }

        // A hook or a concurrent close may have closed it since validation
        let checked_out = cn.try_check_out();
        if !checked_out || !cn.validate() {
            if checked_out {
                cn.swap_in_use(false);
            }
            self.inner.stats.record_invalid();
            tracing::debug!("Discarding connection closed during checkout");
            let _ = self.close_conn(&cn);
            self.free_turn();
            return Err(PoolError::BadConnection);
        }

        self.inner.stats.checkout();
        Ok(cn)
    }

    /// Acquire an admission slot, bounded by `pool_timeout` and `ctx`.
    async fn wait_turn(&self, ctx: &CancellationToken) -> Result<(), PoolError> {
        if ctx.is_cancelled() {
            return Err(PoolError::Cancelled);
        }

        match self.inner.queue.try_acquire() {
            Ok(permit) => {
                permit.forget();
                return Ok(());
            }
            Err(TryAcquireError::Closed) => return Err(PoolError::Closed),
            Err(TryAcquireError::NoPermits) => {}
        }

        let timeout = self.inner.opts.pool_timeout;
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(PoolError::Cancelled),
            acquired = tokio::time::timeout(timeout, self.inner.queue.acquire()) => match acquired {
                Ok(Ok(permit)) => {
                    permit.forget();
                    Ok(())
                }
                Ok(Err(_)) => Err(PoolError::Closed),
                Err(_) => {
                    self.inner.stats.record_timeout();
                    let timeout_ms = timeout.as_millis() as u64;
                    tracing::debug!(timeout_ms, "Timed out waiting for a pool slot");
                    Err(PoolError::PoolTimeout)
                }
            },
        }
    }

    fn free_turn(&self) {
        self.inner.queue.add_permits(1);
    }

    fn pop_idle(&self, state: &mut PoolState<C>) -> Result<Option<Arc<Connection<C>>>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let cn = if self.inner.opts.pool_fifo {
            state.idle.pop_front()
        } else {
            state.idle.pop_back()
        };

        if cn.is_some() {
            state.idle_len = state.idle_len.saturating_sub(1);
            self.check_min_idle_conns(state);
        }
        Ok(cn)
    }

    // ------------------------------------------------------------------------
    // Dialing
    // ------------------------------------------------------------------------

    /// Dial a connection for a caller, respecting `max_active_conns`.
    async fn new_conn(&self) -> Result<Arc<Connection<C>>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let max_active = self.inner.opts.max_active_conns;
        {
            let mut state = self.inner.state.lock();
            if max_active > 0 && state.pool_size >= max_active {
                return Err(PoolError::PoolExhausted);
            }
            // Reserve the slot so concurrent dials cannot overshoot the cap
            state.pool_size += 1;
        }

        match self.dial_conn().await {
            Ok(cn) => {
                let mut state = self.inner.state.lock();
                if self.is_closed() {
                    drop(state);
                    let _ = cn.close();
                    return Err(PoolError::Closed);
                }
                state.conns.push(Arc::clone(&cn));
                Ok(cn)
            }
            Err(err) => {
                if !self.is_closed() {
                    let mut state = self.inner.state.lock();
                    state.pool_size = state.pool_size.saturating_sub(1);
                }
                Err(err)
            }
        }
    }

    /// Failures needed to open the dial circuit
    fn dial_error_threshold(&self) -> usize {
        self.inner.opts.pool_size.max(1)
    }

    async fn dial_conn(&self) -> Result<Arc<Connection<C>>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let threshold = self.dial_error_threshold();
        if self.inner.dial_errors.load(Ordering::Acquire) >= threshold {
            return Err(self.last_dial_error());
        }

        match self.inner.opts.dialer.dial().await {
            Ok(transport) => {
                self.inner.dial_errors.store(0, Ordering::Release);
                Ok(Arc::new(Connection::new(
                    transport,
                    self.inner.opts.conn_max_lifetime,
                    self.inner.opts.conn_max_idle_time,
                )))
            }
            Err(err) => {
                let err = PoolError::dial(err);
                self.set_last_dial_error(err.clone());
                let failures = self.inner.dial_errors.fetch_add(1, Ordering::AcqRel) + 1;
                tracing::warn!(failures, error = %err, "Failed to dial connection");
                if failures >= threshold && !self.inner.probing.swap(true, Ordering::AcqRel) {
                    self.spawn_dial_probe();
                }
                Err(err)
            }
        }
    }

    fn set_last_dial_error(&self, err: PoolError) {
        *self.inner.last_dial_error.lock() = Some(err);
    }

    fn last_dial_error(&self) -> PoolError {
        self.inner
            .last_dial_error
            .lock()
            .clone()
            .unwrap_or_else(|| PoolError::dial(anyhow::anyhow!("dial circuit open")))
    }

    /// Keep redialing in the background until the backend answers, then
    /// close the probe connection and reset the failure counter.
    fn spawn_dial_probe(&self) {
        let Ok(handle) = Handle::try_current() else {
            self.inner.probing.store(false, Ordering::Release);
            return;
        };

        tracing::warn!(
            threshold = self.dial_error_threshold(),
            "Dial failure threshold reached, probing backend in background"
        );

        let pool = self.clone();
        handle.spawn(async move {
            let retry = pool.inner.opts.dial_retry.clone();
            let probe = pool.clone();
            let attempt = retry_with_backoff(
                &retry,
                |err: &PoolError| !matches!(err, PoolError::Closed),
                move || {
                    let pool = probe.clone();
                    async move {
                        if pool.is_closed() {
                            return Err(PoolError::Closed);
                        }
                        pool.inner.opts.dialer.dial().await.map_err(|err| {
                            let err = PoolError::dial(err);
                            pool.set_last_dial_error(err.clone());
                            err
                        })
                    }
                },
            );

            tokio::select! {
                _ = pool.inner.shutdown.cancelled() => {}
                outcome = attempt => match outcome.result {
                    Ok(transport) => {
                        pool.inner.dial_errors.store(0, Ordering::Release);
                        let _ = transport.close();
                        tracing::info!(attempts = outcome.attempts, "Backend reachable again, dial circuit reset");
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, attempts = outcome.attempts, "Dial probe stopped");
                    }
                },
            }
            pool.inner.probing.store(false, Ordering::Release);
        });
    }

    /// Top up idle connections in the background while there is headroom.
    ///
    /// Each background dial holds an admission slot until it finishes.
    fn check_min_idle_conns(&self, state: &mut PoolState<C>) {
        let min_idle = self.inner.opts.min_idle_conns;
        if min_idle == 0 || self.is_closed() {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            return;
        };

        let limit = self.inner.opts.top_up_limit();
        while state.pool_size < limit && state.idle_len < min_idle {
            let Ok(permit) = self.inner.queue.try_acquire() else {
                return;
            };
            permit.forget();

            state.pool_size += 1;
            state.idle_len += 1;

            let pool = self.clone();
            handle.spawn(async move {
                if let Err(err) = pool.add_idle_conn().await {
                    if !matches!(err, PoolError::Closed) {
                        let mut state = pool.inner.state.lock();
                        state.pool_size = state.pool_size.saturating_sub(1);
                        state.idle_len = state.idle_len.saturating_sub(1);
                    }
                }
                pool.free_turn();
            });
        }
    }

    async fn add_idle_conn(&self) -> Result<(), PoolError> {
        let cn = self.dial_conn().await?;

        let mut state = self.inner.state.lock();
        if self.is_closed() {
            drop(state);
            let _ = cn.close();
            return Err(PoolError::Closed);
        }

        state.conns.push(Arc::clone(&cn));
        state.idle.push_back(cn);
        tracing::debug!(pool_size = state.pool_size, idle = state.idle.len(), "Added idle connection");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Checkin / Removal
    // ------------------------------------------------------------------------

    /// Hand a connection back to the pool.
    ///
    /// Invalid connections are closed; valid ones return to the idle list
    /// unless it is full, in which case they are closed as stale. The
    /// admission slot taken by `get` is freed either way.
    pub fn release(&self, cn: &Arc<Connection<C>>) {
        if !cn.swap_in_use(false) {
            tracing::warn!("Ignoring release of a connection that is not checked out");
            return;
        }

        self.recycle(cn);
        self.inner.stats.checkin();
        self.free_turn();
    }

    fn recycle(&self, cn: &Arc<Connection<C>>) {
        if self.is_closed() || !cn.validate() {
            if !self.is_closed() {
                self.inner.stats.record_invalid();
            }
            let _ = self.remove(cn, &PoolError::BadConnection);
            return;
        }

        let max_idle = self.inner.opts.max_idle_conns;
        let should_close = {
            let mut state = self.inner.state.lock();
            if !state.is_tracked(cn) {
                true
            } else if max_idle == 0 || state.idle_len < max_idle {
                state.idle.push_back(Arc::clone(cn));
                state.idle_len += 1;
                false
            } else {
                self.remove_conn(&mut state, cn);
                self.inner.stats.record_stale();
                true
            }
        };

        if should_close {
            let _ = self.close_transport(cn);
        }
    }

    /// Stop tracking a connection and close it.
    ///
    /// Refuses with [`PoolError::ConnInUse`] while the connection is checked
    /// out.
    pub fn remove(&self, cn: &Arc<Connection<C>>, reason: &PoolError) -> Result<(), PoolError> {
        self.remove_conn_with_lock(cn)?;
        tracing::debug!(reason = %reason, "Removing connection from pool");
        self.close_transport(cn)
    }

    /// Stop tracking a connection and close it, without a reason.
    pub fn close_conn(&self, cn: &Arc<Connection<C>>) -> Result<(), PoolError> {
        self.remove_conn_with_lock(cn)?;
        self.close_transport(cn)
    }

    fn remove_conn_with_lock(&self, cn: &Arc<Connection<C>>) -> Result<(), PoolError> {
        let mut state = self.inner.state.lock();
        if cn.is_in_use() {
            return Err(PoolError::ConnInUse);
        }
        self.remove_conn(&mut state, cn);
        Ok(())
    }

    fn remove_conn(&self, state: &mut PoolState<C>, cn: &Arc<Connection<C>>) {
        let Some(pos) = state.conns.iter().position(|c| Arc::ptr_eq(c, cn)) else {
            return;
        };
        state.conns.remove(pos);
        state.pool_size = state.pool_size.saturating_sub(1);

        if let Some(pos) = state.idle.iter().position(|c| Arc::ptr_eq(c, cn)) {
            state.idle.remove(pos);
            state.idle_len = state.idle_len.saturating_sub(1);
        }

        self.check_min_idle_conns(state);
    }

    fn close_transport(&self, cn: &Arc<Connection<C>>) -> Result<(), PoolError> {
        if cn.is_in_use() {
            return Err(PoolError::ConnInUse);
        }
        cn.close().map_err(PoolError::transport)
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// Number of tracked connections
    pub fn len(&self) -> usize {
        self.inner.state.lock().conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of idle connections ready for reuse
    pub fn idle_len(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Connections currently checked out
    pub fn in_use_len(&self) -> usize {
        self.inner.stats.in_use()
    }

    pub fn stats(&self) -> PoolStats {
        let (total, idle) = {
            let state = self.inner.state.lock();
            (state.conns.len(), state.idle.len())
        };
        self.inner.stats.snapshot(total, idle)
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Close the pool and every tracked connection.
    ///
    /// Attempts every connection and returns the first error. Connections
    /// still checked out are left open and closed when released. A second
    /// call returns [`PoolError::Closed`].
    pub fn close(&self) -> Result<(), PoolError> {
        if self
            .inner
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PoolError::Closed);
        }

        self.inner.shutdown.cancel();
        self.inner.queue.close();

        let conns = {
            let mut state = self.inner.state.lock();
            state.idle.clear();
            state.pool_size = 0;
            state.idle_len = 0;
            std::mem::take(&mut state.conns)
        };

        let mut first_err = None;
        for cn in &conns {
            if let Err(err) = self.close_transport(cn) {
                first_err.get_or_insert(err);
            }
        }

        tracing::info!(closed = conns.len(), "Connection pool closed");

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
