//! HTTP response caching core for the edge.
//!
//! This crate provides:
//! - `UrlCanonicalizer` - Strips tracking parameters and sorts the query
//! - `HeaderCanonicalizer` - Selects the request headers and cookies responses vary on
//! - `derive_key` - Stable 128-bit cache keys from method, URL and headers
//! - `CacheControl` - `Cache-Control` directive parsing
//! - `CachePolicy` - Freshness, revalidation and storability decisions
//! - `CacheStore` / `InMemoryStore` - Store boundary and an in-process store
//! - `SingleFlight` - One origin fetch per key under concurrency
//! - `EdgeCache` - The per-request orchestrator
//! - `CacheExplainHeaders` - `X-Cache-*` status and debug headers
//!
//! # Example
//!
//! ```ignore
//! use edge_cache::{EdgeCache, InMemoryStore};
//! use edge_core::{CacheConfig, CacheRequest};
//!
//! let config = CacheConfig::load("edge-cache.toml")?;
//! let cache = EdgeCache::new(&config, InMemoryStore::new(), my_fetcher);
//!
//! let response = cache
//!     .handle(CacheRequest::get("https://example.com/a?utm_source=x&b=2&a=1"))
//!     .await?;
//! assert_eq!(response.header("x-cache-status"), Some("MISS"));
//! ```

mod canonical_url;
mod directives;
mod entry;
mod error;
mod flight;
mod freshness;
mod headers;
mod identity;
mod key;
mod orchestrator;
mod policy;
mod store;
mod vary;

pub use canonical_url::*;
pub use directives::*;
pub use entry::*;
pub use error::*;
pub use flight::*;
pub use freshness::*;
pub use headers::*;
pub use identity::*;
pub use key::*;
pub use orchestrator::*;
pub use policy::*;
pub use store::*;
pub use vary::*;
