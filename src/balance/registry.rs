//! Endpoint registry shared by every strategy
//!
//! A [`Registry`] owns the ordered endpoint list behind one mutex, plus
//! whatever per-strategy state `S` must change together with that list (the
//! current weights of weighted round robin, the hash ring of consistent
//! hashing). It also carries the one-way `closed` flag.

use super::Endpoint;
use crate::error::BalanceError;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Endpoints plus strategy state, guarded together.
pub struct Members<E, S> {
    pub endpoints: Vec<Arc<E>>,
    pub state: S,
}

impl<E: Endpoint, S> Members<E, S> {
    pub fn position(&self, addr: &str) -> Option<usize> {
        self.endpoints.iter().position(|e| e.addr() == addr)
    }

    /// Append an endpoint, refusing a second one with the same address.
    pub fn push(&mut self, endpoint: Arc<E>) -> Result<(), BalanceError> {
        if self.position(endpoint.addr()).is_some() {
            return Err(BalanceError::DuplicateEndpoint(endpoint.addr().to_string()));
        }
        self.endpoints.push(endpoint);
        Ok(())
    }

    /// Remove by address, returning the former index and the endpoint.
    pub fn remove(&mut self, addr: &str) -> Option<(usize, Arc<E>)> {
        let idx = self.position(addr)?;
        Some((idx, self.endpoints.remove(idx)))
    }
}

pub struct Registry<E, S = ()> {
    members: Mutex<Members<E, S>>,
    closed: AtomicBool,
}

impl<E: Endpoint, S> Registry<E, S> {
    pub fn new(state: S) -> Self {
        Self {
            members: Mutex::new(Members {
                endpoints: Vec::new(),
                state,
            }),
            closed: AtomicBool::new(false),
        }
    }

    /// Lock the member list for a compound update or a selection pass.
    pub fn lock(&self) -> MutexGuard<'_, Members<E, S>> {
        self.members.lock()
    }

    /// Lock for selection, failing once closed or empty.
    pub fn lock_for_select(&self) -> Result<MutexGuard<'_, Members<E, S>>, BalanceError> {
        let members = self.lock_open()?;
        if members.endpoints.is_empty() {
            return Err(BalanceError::NoEndpoint);
        }
        Ok(members)
    }

    /// Lock for a mutation, failing once closed.
    ///
    /// The flag is read under the lock that `close` sets it under, so a
    /// successful caller's changes are always seen by `close`.
    pub fn lock_open(&self) -> Result<MutexGuard<'_, Members<E, S>>, BalanceError> {
        let members = self.members.lock();
        if self.is_closed() {
            return Err(BalanceError::Closed);
        }
        Ok(members)
    }

    pub fn snapshot(&self) -> Vec<Arc<E>> {
        self.members.lock().endpoints.clone()
    }

    pub fn len(&self) -> usize {
        self.members.lock().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close every endpoint exactly once.
    ///
    /// Every endpoint is attempted; the first failure is returned. Calls after
    /// the first succeed without doing anything.
    pub fn close(&self, strategy: &'static str) -> Result<(), BalanceError> {
        let endpoints = {
            let members = self.members.lock();
            if self
                .closed
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Ok(());
            }
            members.endpoints.clone()
        };
        let mut first_err = None;
        for endpoint in &endpoints {
            if let Err(err) = endpoint.close() {
                tracing::warn!(strategy, addr = endpoint.addr(), error = %err, "Failed to close endpoint");
                first_err.get_or_insert(err);
            }
        }

        tracing::info!(strategy, endpoints = endpoints.len(), "Load balancer closed");

        match first_err {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

impl<E: Endpoint, S: Default> Default for Registry<E, S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}
