//! Round-robin selection

use super::{Endpoint, LoadBalance, Registry};
use crate::error::BalanceError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Strategy State
// ============================================================================

/// Rotating cursor for round-robin selection
#[derive(Debug, Default)]
pub(crate) struct RoundRobinState {
    counter: AtomicUsize,
}

impl RoundRobinState {
    pub(crate) fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }

    /// Get next index for a given total count
    pub(crate) fn next(&self, total: usize) -> usize {
        if total == 0 {
            return 0;
        }
        self.counter.fetch_add(1, Ordering::Relaxed) % total
    }
}

// ============================================================================
// Round Robin
// ============================================================================

/// Cycles through endpoints in registration order.
///
/// The cursor is taken modulo the current count, so removals never push it
/// out of range.
pub struct RoundRobin<E> {
    registry: Registry<E>,
    cursor: RoundRobinState,
}

impl<E: Endpoint> RoundRobin<E> {
    pub fn new(endpoints: Vec<Arc<E>>) -> Result<Self, BalanceError> {
        let lb = Self {
            registry: Registry::default(),
            cursor: RoundRobinState::new(),
        };
        for endpoint in endpoints {
            lb.add_endpoint(endpoint)?;
        }
        Ok(lb)
    }
}

impl<E: Endpoint> LoadBalance<E> for RoundRobin<E> {
    fn name(&self) -> &'static str {
        "RoundRobin"
    }

    fn select(&self, _key: Option<&str>) -> Result<Arc<E>, BalanceError> {
        let members = self.registry.lock_for_select()?;
        let idx = self.cursor.next(members.endpoints.len());
        Ok(Arc::clone(&members.endpoints[idx]))
    }

    fn add_endpoint(&self, endpoint: Arc<E>) -> Result<(), BalanceError> {
        self.registry.lock_open()?.push(endpoint)
    }

    fn remove_endpoint(&self, addr: &str) -> Option<Arc<E>> {
        self.registry.lock().remove(addr).map(|(_, ep)| ep)
    }

    fn endpoints(&self) -> Vec<Arc<E>> {
        self.registry.snapshot()
    }

    fn len(&self) -> usize {
        self.registry.len()
    }

    fn close(&self) -> Result<(), BalanceError> {
        self.registry.close(self.name())
    }
}
