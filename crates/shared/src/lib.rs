//! Shared utilities for the Annuaire backend.
//!
//! This crate provides functionality used across the other crates:
//! - Sliding-window rate limiting for outbound API calls
//! - Retry with exponential backoff
//! - Validation of SIRENE registry codes

pub mod rate_limit;
pub mod retry;
pub mod validation;

pub use rate_limit::SlidingWindowRateLimiter;
pub use retry::{retry_with_backoff, RetryPolicy};
