//! Connection pooling
//!
//! [`ConnPool`] hands out [`Connection`]s created by a [`Dialer`], reuses idle
//! ones, keeps a minimum number warm in the background, and bounds how many
//! callers can hold a connection at once.

mod conn;
mod options;
#[allow(clippy::module_inception)]
mod pool;
mod stats;

pub use conn::{Connection, Transport};
pub use options::{touch_hook, ConnectionUsedHook, Dialer, PoolOptions};
pub use pool::ConnPool;
pub use stats::PoolStats;
