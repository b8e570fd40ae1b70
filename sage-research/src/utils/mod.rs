//! Utility modules for sage-research

pub mod retry;

pub use retry::{retry_with_backoff, RetryPolicy, Retryable};
