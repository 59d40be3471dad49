//! Shortest expected delay and never-queue selection

use super::least_conn::{least_loaded, Overhead, ACTIVE_FACTOR};
use super::{checked_weight, Endpoint, LoadBalance, LoadTracked, Registry, Weighted};
use crate::error::BalanceError;
use std::sync::Arc;

/// `(active + 1) * 256 / weight`: the delay a new request would see.
fn expected_delay<E: LoadTracked + Weighted + ?Sized>(endpoint: &E) -> Overhead {
    let queued = endpoint.active_connections() as u128 + 1;
    Overhead::new(queued * ACTIVE_FACTOR, endpoint.weight())
}

fn select_sed<E: Endpoint + LoadTracked + Weighted>(endpoints: &[Arc<E>]) -> Arc<E> {
    let idx = least_loaded(endpoints, expected_delay);
    Arc::clone(&endpoints[idx])
}

// ============================================================================
// Shortest Expected Delay
// ============================================================================

/// Picks the endpoint with the lowest `(active + 1) * 256 / weight`.
pub struct ShortestExpectedDelay<E> {
    registry: Registry<E>,
}

impl<E: Endpoint + LoadTracked + Weighted> ShortestExpectedDelay<E> {
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

impl<E: Endpoint + LoadTracked + Weighted> LoadBalance<E> for ShortestExpectedDelay<E> {
    fn name(&self) -> &'static str {
        "ShortestExpectedDelay"
    }

    fn select(&self, _key: Option<&str>) -> Result<Arc<E>, BalanceError> {
        let members = self.registry.lock_for_select()?;
        let endpoint = select_sed(&members.endpoints);
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

// ============================================================================
// Never Queue
// ============================================================================

/// Sends work to an idle endpoint whenever one exists, otherwise falls back
/// to shortest expected delay.
pub struct NeverQueue<E> {
    registry: Registry<E>,
}

impl<E: Endpoint + LoadTracked + Weighted> NeverQueue<E> {
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

impl<E: Endpoint + LoadTracked + Weighted> LoadBalance<E> for NeverQueue<E> {
    fn name(&self) -> &'static str {
        "NeverQueue"
    }

    fn select(&self, _key: Option<&str>) -> Result<Arc<E>, BalanceError> {
        let members = self.registry.lock_for_select()?;
        let endpoint = match members
            .endpoints
            .iter()
            .find(|ep| ep.active_connections() == 0)
        {
            Some(free) => Arc::clone(free),
            None => select_sed(&members.endpoints),
        };
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::testing::MockEndpoint;

    #[test]
    fn test_sed_accounts_for_weight() {
        let lb = ShortestExpectedDelay::new(vec![
            MockEndpoint::with_load("small:1", 1, 0, 0),
            MockEndpoint::with_load("large:1", 3, 1, 0),
        ])
        .unwrap();

        // 256/1 against 512/3
        assert_eq!(lb.select(None).unwrap().addr(), "large:1");
        // 256/1 against 768/3 ties, first wins
        assert_eq!(lb.select(None).unwrap().addr(), "small:1");
    }

    #[test]
    fn test_sed_ignores_idle_connections() {
        let lb = ShortestExpectedDelay::new(vec![
            MockEndpoint::with_load("a:1", 1, 0, 100),
            MockEndpoint::with_load("b:1", 1, 0, 0),
        ])
        .unwrap();
        assert_eq!(lb.select(None).unwrap().addr(), "a:1");
    }

    #[test]
    fn test_never_queue_prefers_idle_endpoint() {
        let lb = NeverQueue::new(vec![
            MockEndpoint::with_load("a:1", 10, 1, 0),
            MockEndpoint::with_load("b:1", 1, 0, 0),
        ])
        .unwrap();

        // SED alone would pick a (512/10 < 256/1)
        let picked = lb.select(None).unwrap();
        assert_eq!(picked.addr(), "b:1");
        assert_eq!(picked.active_connections(), 1);

        // Everyone busy: falls back to SED
        assert_eq!(lb.select(None).unwrap().addr(), "a:1");
    }

    #[test]
    fn test_zero_weight_rejected() {
        let lb = NeverQueue::new(vec![MockEndpoint::new("a:1", 2)]).unwrap();
        let err = lb.add_endpoint(MockEndpoint::new("b:1", 0)).unwrap_err();
        assert!(matches!(err, BalanceError::InvalidWeight(addr) if addr == "b:1"));

        assert!(ShortestExpectedDelay::new(vec![MockEndpoint::new("c:1", 0)]).is_err());
    }

    #[test]
    fn test_closed_rejects_select() {
        let lb = ShortestExpectedDelay::new(vec![MockEndpoint::new("a:1", 1)]).unwrap();
        lb.close().unwrap();
        assert!(matches!(lb.select(None), Err(BalanceError::Closed)));
    }
}
