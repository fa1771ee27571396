//! Retry policy and execution.
//!
//! This module provides the two halves of the retry story:
//!
//! - [`BackoffPolicy`]: maps an attempt number to a jittered delay
//! - [`execute_with_retry`]: drives an operation through bounded attempts

mod backoff;
mod executor;

pub use backoff::BackoffPolicy;
pub use executor::{execute_with_retry, RetryError};
