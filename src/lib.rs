//! Connection pooling with pluggable load balancing
//!
//! [`pool::ConnPool`] manages reusable connections to one backend.
//! [`balance`] strategies spread work across many equivalent backends,
//! usually each wrapped in a [`balance::PoolEndpoint`].

// Public modules
pub mod balance;
pub mod config;
pub mod error;
pub mod logging;
pub mod pool;
pub mod utils;

// Re-export commonly used types
pub use balance::{BalanceType, Endpoint, LoadBalance, PoolEndpoint};
pub use config::Settings;
pub use error::{BalanceError, PoolError};
pub use pool::{ConnPool, Connection, PoolOptions, PoolStats, Transport};
