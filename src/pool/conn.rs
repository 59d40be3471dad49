//! Pooled connection wrapper
//!
//! A [`Connection`] owns one raw transport handle together with the
//! bookkeeping the pool needs: when it was created, when it was last checked
//! out, whether a caller currently holds it, and whether it has been closed.

use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Transport
// ============================================================================

/// A raw backend handle that the pool can close.
///
/// The pool never reads from or writes to the transport; it only decides when
/// to hand it out and when to close it.
pub trait Transport: Send + Sync + 'static {
    /// Close the underlying handle. Called at most once per connection.
    fn close(&self) -> anyhow::Result<()>;
}

// ============================================================================
// Connection
// ============================================================================

#[derive(Debug)]
struct ConnState {
    used_at: Instant,
    in_use: bool,
    closed: bool,
}

/// A transport tracked by the pool.
pub struct Connection<C> {
    transport: C,
    created_at: Instant,
    /// Zero disables the lifetime check
    max_lifetime: Duration,
    /// Zero disables the idle-time check
    max_idle_time: Duration,
    state: Mutex<ConnState>,
}

impl<C: Transport> Connection<C> {
    pub fn new(transport: C, max_lifetime: Duration, max_idle_time: Duration) -> Self {
        let now = Instant::now();
        Self {
            transport,
            created_at: now,
            max_lifetime,
            max_idle_time,
            state: Mutex::new(ConnState {
                used_at: now,
                in_use: false,
                closed: false,
            }),
        }
    }

    /// Access the raw transport handle
    pub fn transport(&self) -> &C {
        &self.transport
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used_at(&self) -> Instant {
        self.state.lock().used_at
    }

    pub fn is_in_use(&self) -> bool {
        self.state.lock().in_use
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Check whether the connection can still be handed out.
    ///
    /// Fails once closed, once older than `max_lifetime`, or once unused for
    /// longer than `max_idle_time`.
    pub fn validate(&self) -> bool {
        let state = self.state.lock();
        if state.closed {
            return false;
        }
        if !self.max_lifetime.is_zero() && self.created_at.elapsed() > self.max_lifetime {
            return false;
        }
        if !self.max_idle_time.is_zero() && state.used_at.elapsed() > self.max_idle_time {
            return false;
        }
        true
    }

    /// Toggle the in-use flag. Checking out also refreshes the last-use time.
    ///
    /// A closed connection can be checked in but never checked out again.
    pub fn mark_in_use(&self, in_use: bool) {
        self.swap_in_use(in_use);
    }

    /// Set the in-use flag and return its previous value.
    pub(crate) fn swap_in_use(&self, in_use: bool) -> bool {
        let mut state = self.state.lock();
        let previous = state.in_use;
        if in_use && state.closed {
            return previous;
        }
        state.in_use = in_use;
        if in_use {
            state.used_at = Instant::now();
        }
        previous
    }

    /// Mark the connection in use, failing if it was closed in the meantime.
    pub(crate) fn try_check_out(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.in_use = true;
        state.used_at = Instant::now();
        true
    }

    /// Refresh the last-use time without touching the in-use flag.
    pub fn touch(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            state.used_at = Instant::now();
        }
    }

    /// Close the transport. A second call is a successful no-op.
    pub fn close(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        self.transport.close()
    }
}

impl<C> fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Connection")
            .field("created_at", &self.created_at)
            .field("used_at", &state.used_at)
            .field("in_use", &state.in_use)
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingTransport {
        closes: Arc<AtomicUsize>,
    }

    impl Transport for CountingTransport {
        fn close(&self) -> anyhow::Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let closes = Arc::new(AtomicUsize::new(0));
        let conn = Connection::new(
            CountingTransport {
                closes: closes.clone(),
            },
            Duration::ZERO,
            Duration::ZERO,
        );

        assert!(conn.validate());
        conn.close().unwrap();
        conn.close().unwrap();

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(conn.is_closed());
        assert!(!conn.validate());
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_lifetime() {
        let conn = Connection::new(
            CountingTransport::default(),
            Duration::from_secs(30),
            Duration::ZERO,
        );
        assert!(conn.validate());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!conn.validate());
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_idle_time_refreshed_by_checkout() {
        let conn = Connection::new(
            CountingTransport::default(),
            Duration::ZERO,
            Duration::from_secs(10),
        );

        tokio::time::advance(Duration::from_secs(8)).await;
        conn.mark_in_use(true);
        assert!(conn.is_in_use());

        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(conn.validate());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!conn.validate());

        conn.touch();
        assert!(conn.validate());
    }

    #[tokio::test]
    async fn test_closed_connection_cannot_be_checked_out() {
        let conn = Connection::new(CountingTransport::default(), Duration::ZERO, Duration::ZERO);
        conn.mark_in_use(true);
        conn.close().unwrap();

        // Still held by its caller until checked in
        assert!(conn.is_in_use());
        assert!(conn.swap_in_use(false));
        assert!(!conn.is_in_use());

        conn.mark_in_use(true);
        assert!(!conn.is_in_use());
    }
}
