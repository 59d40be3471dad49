//! Utility modules
//!
//! Contains retry logic shared by the pool's background tasks.

pub mod retry;

pub use retry::{presets, retry_with_backoff, RetryConfig, RetryResult};
