//! Error types shared by the pool and the balancers

mod types;

pub use types::{BalanceError, PoolError};
