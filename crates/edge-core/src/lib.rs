//! Core abstractions for the edge HTTP cache.
//!
//! This crate provides the fundamental types shared by every layer:
//! - `CacheRequest` / `HttpResponse` - The inbound request and returned response
//! - `RequestId` - Unique request identifier for log correlation
//! - `Clock` - Injectable time source (`SystemClock`, `ManualClock`)
//! - `CacheConfig` - Startup configuration for normalization and policy

mod clock;
mod config;
mod context;

pub use clock::*;
pub use config::*;
pub use context::*;
