//! Reliability patterns for durable execution
//!
//! - [`RetryPolicy`] - bounded exponential backoff for step bodies

mod retry;

pub use retry::RetryPolicy;
