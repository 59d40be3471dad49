//! Smooth weighted round robin
//!
//! Every endpoint carries a current weight that starts at its static weight.
//! A selection picks the highest current weight (first on ties), subtracts
//! the sum of all current weights from the winner, then adds each static
//! weight to its own current weight. Heavier endpoints win proportionally
//! more often without being picked in long bursts.

use super::{checked_weight, Endpoint, LoadBalance, Registry, Weighted};
use crate::error::BalanceError;
use std::sync::Arc;

pub struct WeightedRoundRobin<E> {
    /// Current weight per endpoint, parallel to the endpoint list
    registry: Registry<E, Vec<i64>>,
}

impl<E: Endpoint + Weighted> WeightedRoundRobin<E> {
    pub fn new(endpoints: Vec<Arc<E>>) -> Result<Self, BalanceError> {
        let lb = Self {
            registry: Registry::default(),
        };
        for endpoint in endpoints {
            lb.add_endpoint(endpoint)?;
        }
        Ok(lb)
    }

    /// Current weight of the endpoint with this address
    pub fn current_weight(&self, addr: &str) -> Option<i64> {
        let members = self.registry.lock();
        members.position(addr).map(|idx| members.state[idx])
    }
}

impl<E: Endpoint + Weighted> LoadBalance<E> for WeightedRoundRobin<E> {
    fn name(&self) -> &'static str {
        "WeightedRoundRobin"
    }

    fn select(&self, _key: Option<&str>) -> Result<Arc<E>, BalanceError> {
        let mut guard = self.registry.lock_for_select()?;
        let members = &mut *guard;

        let mut best = 0;
        for (idx, current) in members.state.iter().enumerate() {
            if *current > members.state[best] {
                best = idx;
            }
        }

        let sum: i64 = members.state.iter().sum();
        members.state[best] -= sum;
        for (current, endpoint) in members.state.iter_mut().zip(&members.endpoints) {
            *current += i64::from(endpoint.weight());
        }

        tracing::trace!(addr = members.endpoints[best].addr(), current = members.state[best], "Selected endpoint");
        Ok(Arc::clone(&members.endpoints[best]))
    }

    fn add_endpoint(&self, endpoint: Arc<E>) -> Result<(), BalanceError> {
        let weight = checked_weight(endpoint.as_ref())?;
        let mut members = self.registry.lock_open()?;
        members.push(endpoint)?;
        members.state.push(i64::from(weight));
        Ok(())
    }

    fn remove_endpoint(&self, addr: &str) -> Option<Arc<E>> {
        let mut members = self.registry.lock();
        let (idx, endpoint) = members.remove(addr)?;
        members.state.remove(idx);
        Some(endpoint)
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

    fn weighted(weights: &[u32]) -> WeightedRoundRobin<MockEndpoint> {
        let endpoints = weights
            .iter()
            .enumerate()
            .map(|(i, &w)| MockEndpoint::new(&format!("10.0.0.{i}:80"), w))
            .collect();
        WeightedRoundRobin::new(endpoints).unwrap()
    }

    #[test]
    fn test_smooth_trajectory() {
        let lb = weighted(&[4, 2, 1]);

        let mut trajectory = Vec::new();
        let mut winners = Vec::new();
        for _ in 0..7 {
            let ep = lb.select(None).unwrap();
            trajectory.push(lb.current_weight(ep.addr()).unwrap());
            winners.push(ep.addr().to_string());
        }

        assert_eq!(trajectory, [1, -1, 2, -2, 3, 0, 4]);
        assert_eq!(
            winners,
            [
                "10.0.0.0:80",
                "10.0.0.1:80",
                "10.0.0.0:80",
                "10.0.0.2:80",
                "10.0.0.0:80",
                "10.0.0.1:80",
                "10.0.0.0:80"
            ]
        );
    }

    #[test]
    fn test_distribution_matches_weights() {
        let lb = weighted(&[5, 3, 2]);
        let mut counts = [0usize; 3];
        for _ in 0..100 {
            let ep = lb.select(None).unwrap();
            let idx = ep.addr().as_bytes()[7] - b'0';
            counts[idx as usize] += 1;
        }
        assert_eq!(counts, [50, 30, 20]);
    }

    #[test]
    fn test_zero_weight_rejected() {
        let lb = weighted(&[1]);
        let err = lb.add_endpoint(MockEndpoint::new("zero:1", 0)).unwrap_err();
        assert!(matches!(err, BalanceError::InvalidWeight(_)));
        assert_eq!(lb.len(), 1);
    }

    #[test]
    fn test_remove_drops_current_weight() {
        let lb = weighted(&[4, 2, 1]);
        lb.select(None).unwrap();

        let removed = lb.remove_endpoint("10.0.0.1:80").unwrap();
        assert_eq!(removed.addr(), "10.0.0.1:80");
        assert!(lb.current_weight("10.0.0.1:80").is_none());
        assert_eq!(lb.current_weight("10.0.0.0:80"), Some(1));
        assert_eq!(lb.current_weight("10.0.0.2:80"), Some(2));

        for _ in 0..10 {
            assert_ne!(lb.select(None).unwrap().addr(), "10.0.0.1:80");
        }
    }
}
