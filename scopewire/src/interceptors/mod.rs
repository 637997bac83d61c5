//! Stock interceptors for invocation chains.
//!
//! This module provides:
//! - The non-blocking bridge that hands a chain's remainder to a worker
//! - A monitor that forces full chain invocation and counts traffic
//! - A retry policy with backoff and jitter

mod monitor;
mod nonblocking;
mod retry;

pub use monitor::MonitorInterceptor;
pub use nonblocking::NonBlockingBridgingInterceptor;
pub use retry::{BackoffStrategy, JitterStrategy, RetryInterceptor};
