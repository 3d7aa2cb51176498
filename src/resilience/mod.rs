//! Retry policies for cluster calls.

pub mod retry;

pub use retry::{retry, RetryConfig};
