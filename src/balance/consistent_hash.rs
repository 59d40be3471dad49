//! Consistent-hash selection
//!
//! Each endpoint owns `virtual_nodes` points on a CRC-32 ring, keyed by the
//! hash of `"{addr}#{i}"`. A request key maps to the first point at or after
//! its own hash, wrapping around to the lowest point. Adding or removing an
//! endpoint only moves the keys that land on its points.

use super::{Endpoint, LoadBalance, Members, Registry};
use crate::error::BalanceError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Ring points per endpoint used by [`balance::new`](super::new)
pub const DEFAULT_VIRTUAL_NODES: usize = 10;

type Ring<E> = BTreeMap<u32, Arc<E>>;

fn hash_key(key: &str) -> u32 {
    crc32fast::hash(key.as_bytes())
}

fn virtual_node_hash(addr: &str, idx: usize) -> u32 {
    hash_key(&format!("{addr}#{idx}"))
}

pub struct ConsistentHash<E> {
    registry: Registry<E, Ring<E>>,
    virtual_nodes: usize,
}

impl<E: Endpoint> ConsistentHash<E> {
    /// Build a ring with `virtual_nodes` points per endpoint (at least one).
    pub fn new(endpoints: Vec<Arc<E>>, virtual_nodes: usize) -> Result<Self, BalanceError> {
        let lb = Self {
            registry: Registry::default(),
            virtual_nodes: virtual_nodes.max(1),
        };
        for endpoint in endpoints {
            lb.add_endpoint(endpoint)?;
        }
        Ok(lb)
    }

    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }

    /// Number of points currently on the ring
    pub fn ring_len(&self) -> usize {
        self.registry.lock().state.len()
    }
}

impl<E: Endpoint> LoadBalance<E> for ConsistentHash<E> {
    fn name(&self) -> &'static str {
        "ConsistentHash"
    }

    fn select(&self, key: Option<&str>) -> Result<Arc<E>, BalanceError> {
        let members = self.registry.lock_for_select()?;
        let key = key.ok_or(BalanceError::NoSourceKey)?;

        let hash = hash_key(key);
        let (_, endpoint) = members
            .state
            .range(hash..)
            .next()
            .or_else(|| members.state.iter().next())
            .ok_or(BalanceError::NoEndpoint)?;

        tracing::trace!(key, hash, addr = endpoint.addr(), "Selected endpoint");
        Ok(Arc::clone(endpoint))
    }

    fn add_endpoint(&self, endpoint: Arc<E>) -> Result<(), BalanceError> {
        let mut members = self.registry.lock_open()?;
        members.push(Arc::clone(&endpoint))?;

        for idx in 0..self.virtual_nodes {
            let hash = virtual_node_hash(endpoint.addr(), idx);
            // On a collision the point stays with its first owner
            members
                .state
                .entry(hash)
                .or_insert_with(|| Arc::clone(&endpoint));
        }
        Ok(())
    }

    fn remove_endpoint(&self, addr: &str) -> Option<Arc<E>> {
        let mut members = self.registry.lock();
        let (_, endpoint) = members.remove(addr)?;
        members.state.retain(|_, owner| owner.addr() != addr);

        // Hand points the removed endpoint won in a collision back to the
        // next owner in registration order
        let Members { endpoints, state } = &mut *members;
        for survivor in endpoints.iter() {
            for idx in 0..self.virtual_nodes {
                state
                    .entry(virtual_node_hash(survivor.addr(), idx))
                    .or_insert_with(|| Arc::clone(survivor));
            }
        }
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
