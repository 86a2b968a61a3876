//! Origin fetch boundary for the edge HTTP cache.
//!
//! This crate provides:
//! - `OriginFetcher` - The collaborator that performs upstream requests
//! - `OriginResponse` - Upstream response with request/receipt timestamps
//! - `ConditionalHeaders` - Validators for revalidation requests
//! - `RetryingFetcher` / `RetryPolicy` - Fetcher-side retry strategies
//! - `TimeoutFetcher` / `TimeoutConfig` - Fetcher-side time bounds

mod client;
mod retry;
mod timeout;

pub use client::*;
pub use retry::*;
pub use timeout::*;
