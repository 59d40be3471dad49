//! Load Balancing Module
//!
//! Strategies that pick one [`Endpoint`] out of a set of equivalent backends.
//!
//! # Features
//! - Stateless rotation (RoundRobin) and smooth weighted rotation
//!   (WeightedRoundRobin)
//! - Connection-count driven strategies (LeastConnections,
//!   WeightedLeastConnections, ShortestExpectedDelay, NeverQueue)
//! - Key affinity through a consistent-hash ring (ConsistentHash)
//!
//! Strategies that need more than an address require it through the
//! [`Weighted`] and [`LoadTracked`] capability traits at construction.
//!
//! # Example
//! ```ignore
//! use conn_balancer::balance::{self, BalanceType};
//!
//! let lb = balance::new(BalanceType::LeastConnection, endpoints)?;
//! let endpoint = lb.select(None)?;
//! let conn = endpoint.get(&ctx).await?;
//! // ... use the connection, then hand it back
//! endpoint.release_active_connection();
//! ```

mod consistent_hash;
mod endpoint;
mod least_conn;
mod registry;
mod round_robin;
mod sed;
mod strategy;
mod weighted_round_robin;

pub use consistent_hash::{ConsistentHash, DEFAULT_VIRTUAL_NODES};
pub use endpoint::{PoolEndpoint, PooledConn};
pub use least_conn::{LeastConnections, WeightedLeastConnections};
pub use registry::{Members, Registry};
pub use round_robin::RoundRobin;
pub use sed::{NeverQueue, ShortestExpectedDelay};
pub use strategy::BalanceType;
pub use weighted_round_robin::WeightedRoundRobin;

use crate::error::{BalanceError, PoolError};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Endpoint Capabilities
// ============================================================================

/// Load figures an endpoint reports to balancers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EndpointStats {
    pub active_conns: usize,
    pub idle_conns: usize,
}

/// A backend a balancer can route to.
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    /// What `get` hands out, usually a pooled connection
    type Resource: Send;

    /// Address identifying this endpoint within a balancer
    fn addr(&self) -> &str;

    /// Obtain a resource from the backend.
    async fn acquire(&self, ctx: &CancellationToken) -> Result<Self::Resource, PoolError>;

    /// Obtain a resource and run the post-selection hook on it.
    async fn get(&self, ctx: &CancellationToken) -> Result<Self::Resource, PoolError> {
        let resource = self.acquire(ctx).await?;
        self.on_acquired(&resource);
        Ok(resource)
    }

    /// Called by `get` with every resource it hands out
    fn on_acquired(&self, _resource: &Self::Resource) {}

    fn close(&self) -> Result<(), PoolError>;

    fn stats(&self) -> EndpointStats;
}

/// Endpoints with a static weight. Zero is rejected by weighted strategies.
pub trait Weighted {
    fn weight(&self) -> u32;
}

/// Endpoints that track how much work is routed to them.
///
/// Connection-count strategies call `add_active_connection` on the endpoint
/// they select; the caller calls `release_active_connection` once its unit of
/// work completes.
pub trait LoadTracked {
    fn active_connections(&self) -> usize;

    fn idle_connections(&self) -> usize;

    fn add_active_connection(&self);

    fn release_active_connection(&self);
}

// ============================================================================
// Load Balance
// ============================================================================

/// A selection strategy over a registry of endpoints.
pub trait LoadBalance<E: Endpoint>: Send + Sync {
    /// Strategy name, e.g. `"RoundRobin"`
    fn name(&self) -> &'static str;

    /// Pick an endpoint. Only key-affine strategies look at `key`.
    fn select(&self, key: Option<&str>) -> Result<Arc<E>, BalanceError>;

    /// Register another endpoint
    fn add_endpoint(&self, endpoint: Arc<E>) -> Result<(), BalanceError>;

    /// Unregister the endpoint with this address and hand it back unclosed
    fn remove_endpoint(&self, addr: &str) -> Option<Arc<E>>;

    /// Registered endpoints in registration order
    fn endpoints(&self) -> Vec<Arc<E>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every registered endpoint once. Later calls are no-ops.
    fn close(&self) -> Result<(), BalanceError>;
}

/// Weight of an endpoint, rejecting zero.
pub(crate) fn checked_weight<E: Endpoint + Weighted>(endpoint: &E) -> Result<u32, BalanceError> {
    match endpoint.weight() {
        0 => Err(BalanceError::InvalidWeight(endpoint.addr().to_string())),
        weight => Ok(weight),
    }
}

/// Build a balancer of the given kind.
///
/// Consistent hashing uses [`DEFAULT_VIRTUAL_NODES`] ring entries per endpoint.
pub fn new<E>(
    kind: BalanceType,
    endpoints: Vec<Arc<E>>,
) -> Result<Box<dyn LoadBalance<E>>, BalanceError>
where
    E: Endpoint + Weighted + LoadTracked,
{
    with_virtual_nodes(kind, endpoints, DEFAULT_VIRTUAL_NODES)
}

/// Build a balancer, overriding the consistent-hash virtual node count.
pub fn with_virtual_nodes<E>(
    kind: BalanceType,
    endpoints: Vec<Arc<E>>,
    virtual_nodes: usize,
) -> Result<Box<dyn LoadBalance<E>>, BalanceError>
where
    E: Endpoint + Weighted + LoadTracked,
{
    tracing::debug!(strategy = %kind, endpoints = endpoints.len(), "Creating load balancer");

    Ok(match kind {
        BalanceType::RoundRobin => Box::new(RoundRobin::new(endpoints)?),
        BalanceType::WeightedRoundRobin => Box::new(WeightedRoundRobin::new(endpoints)?),
        BalanceType::ConsistentHash => {
            Box::new(ConsistentHash::new(endpoints, virtual_nodes)?)
        }
        BalanceType::LeastConnection => Box::new(LeastConnections::new(endpoints)?),
        BalanceType::ShortestExpectedDelay => Box::new(ShortestExpectedDelay::new(endpoints)?),
        BalanceType::WeightedLeastConnection => {
            Box::new(WeightedLeastConnections::new(endpoints)?)
        }
        BalanceType::NeverQueue => Box::new(NeverQueue::new(endpoints)?),
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory endpoint shared by the strategy tests.

    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    pub struct MockEndpoint {
        pub addr: String,
        pub weight: u32,
        pub active: AtomicUsize,
        pub idle: AtomicUsize,
        pub closes: AtomicU32,
    }

    impl MockEndpoint {
        pub fn new(addr: &str, weight: u32) -> Arc<Self> {
            Arc::new(Self {
                addr: addr.to_string(),
                weight,
                ..Default::default()
            })
        }

        pub fn with_load(addr: &str, weight: u32, active: usize, idle: usize) -> Arc<Self> {
            let ep = Self::new(addr, weight);
            ep.active.store(active, Ordering::SeqCst);
            ep.idle.store(idle, Ordering::SeqCst);
            ep
        }
    }

    #[async_trait]
    impl Endpoint for MockEndpoint {
        type Resource = String;

        fn addr(&self) -> &str {
            &self.addr
        }

        async fn acquire(&self, _ctx: &CancellationToken) -> Result<String, PoolError> {
            Ok(self.addr.clone())
        }

        fn close(&self) -> Result<(), PoolError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stats(&self) -> EndpointStats {
            EndpointStats {
                active_conns: self.active_connections(),
                idle_conns: self.idle_connections(),
            }
        }
    }

    impl Weighted for MockEndpoint {
        fn weight(&self) -> u32 {
            self.weight
        }
    }

    impl LoadTracked for MockEndpoint {
        fn active_connections(&self) -> usize {
            self.active.load(Ordering::SeqCst)
        }

        fn idle_connections(&self) -> usize {
            self.idle.load(Ordering::SeqCst)
        }

        fn add_active_connection(&self) {
            self.active.fetch_add(1, Ordering::SeqCst);
        }

        fn release_active_connection(&self) {
            let _ = self
                .active
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        }
    }

    pub fn addrs<E: Endpoint>(endpoints: &[Arc<E>]) -> Vec<String> {
        endpoints.iter().map(|e| e.addr().to_string()).collect()
    }
}
