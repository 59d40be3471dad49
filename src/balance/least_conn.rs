//! Least-connections selection
//!
//! Both strategies score endpoints by `active * 256 + idle`, so a single
//! checked-out connection outweighs any realistic number of idle ones. The
//! weighted variant divides the score by the endpoint weight. The selected
//! endpoint's active count is incremented before it is returned.

use super::{checked_weight, Endpoint, LoadBalance, LoadTracked, Registry, Weighted};
use crate::error::BalanceError;
use std::cmp::Ordering;
use std::sync::Arc;

/// Active connections count this much more than idle ones
pub(crate) const ACTIVE_FACTOR: u128 = 256;

// ============================================================================
// Scoring
// ============================================================================

/// Exact fraction compared by cross-multiplication, lower is better.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Overhead {
    num: u128,
    den: u128,
}

impl Overhead {
    pub(crate) fn new(num: u128, den: u32) -> Self {
        Self {
            num,
            den: u128::from(den.max(1)),
        }
    }

    pub(crate) fn whole(num: u128) -> Self {
        Self { num, den: 1 }
    }
}

impl PartialEq for Overhead {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Overhead {}

impl PartialOrd for Overhead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Overhead {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.num * other.den).cmp(&(other.num * self.den))
    }
}

/// `active * 256 + idle`
pub(crate) fn connection_load<E: LoadTracked + ?Sized>(endpoint: &E) -> u128 {
    endpoint.active_connections() as u128 * ACTIVE_FACTOR + endpoint.idle_connections() as u128
}

/// Index of the first endpoint with the strictly lowest overhead.
pub(crate) fn least_loaded<E>(endpoints: &[Arc<E>], overhead: impl Fn(&E) -> Overhead) -> usize {
    let mut best = 0;
    let mut best_overhead = overhead(&*endpoints[0]);
    for (idx, endpoint) in endpoints.iter().enumerate().skip(1) {
        let candidate = overhead(&**endpoint);
        if candidate < best_overhead {
            best = idx;
            best_overhead = candidate;
        }
    }
    best
}

// ============================================================================
// Least Connections
// ============================================================================

/// Picks the endpoint with the lowest `active * 256 + idle`.
pub struct LeastConnections<E> {
    registry: Registry<E>,
}

impl<E: Endpoint + LoadTracked> LeastConnections<E> {
    pub fn new(endpoints: Vec<Arc<E>>) -> Result<Self, BalanceError> {
        let lb = Self {
            registry: Registry::default(),
        };
        for endpoint in endpoints {
            lb.add_endpoint(endpoint)?;
        }
        Ok(lb)
    }
}

impl<E: Endpoint + LoadTracked> LoadBalance<E> for LeastConnections<E> {
    fn name(&self) -> &'static str {
        "LeastConnections"
    }

    fn select(&self, _key: Option<&str>) -> Result<Arc<E>, BalanceError> {
        let members = self.registry.lock_for_select()?;
        let idx = least_loaded(&members.endpoints, |ep| Overhead::whole(connection_load(ep)));

        let endpoint = Arc::clone(&members.endpoints[idx]);
        endpoint.add_active_connection();
        tracing::trace!(addr = endpoint.addr(), active = endpoint.active_connections(), "Selected endpoint");
        Ok(endpoint)
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

// ============================================================================
// Weighted Least Connections
// ============================================================================

/// Picks the endpoint with the lowest `(active * 256 + idle) / weight`.
pub struct WeightedLeastConnections<E> {
    registry: Registry<E>,
}

impl<E: Endpoint + LoadTracked + Weighted> WeightedLeastConnections<E> {
    pub fn new(endpoints: Vec<Arc<E>>) -> Result<Self, BalanceError> {
        let lb = Self {
            registry: Registry::default(),
        };
        for endpoint in endpoints {
            lb.add_endpoint(endpoint)?;
        }
        Ok(lb)
    }
}

impl<E: Endpoint + LoadTracked + Weighted> LoadBalance<E> for WeightedLeastConnections<E> {
    fn name(&self) -> &'static str {
        "WeightedLeastConnections"
    }

    fn select(&self, _key: Option<&str>) -> Result<Arc<E>, BalanceError> {
        let members = self.registry.lock_for_select()?;
        let idx = least_loaded(&members.endpoints, |ep| {
            Overhead::new(connection_load(ep), ep.weight())
        });

        let endpoint = Arc::clone(&members.endpoints[idx]);
        endpoint.add_active_connection();
        Ok(endpoint)
    }

    fn add_endpoint(&self, endpoint: Arc<E>) -> Result<(), BalanceError> {
        checked_weight(endpoint.as_ref())?;
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
