//! Reliability patterns for durable execution
//!
//! This module provides:
//! - [`RetryPolicy`] - Bounded retry with exponential backoff
//! - [`run_with_timeout`] - Per-attempt time limit

mod retry;
mod timeout;

pub use retry::{RetryDecision, RetryPolicy};
pub use timeout::{run_with_timeout, TIMEOUT_ERROR_TYPE};
