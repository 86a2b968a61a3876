//! Logging and metrics for the edge HTTP response cache.
//!
//! This crate provides:
//! - `init_tracing` - Installs the process-wide `tracing` subscriber (binaries only)
//! - `LogConfig` - Level, output format and filter for that subscriber
//! - `CacheMetrics` - Lock-free cache outcome counters
//! - `MetricsSnapshot` - Serializable point-in-time view of the counters

mod logging;
mod metrics;

pub use logging::*;
pub use metrics::*;

// Re-export RequestId from edge-core for convenience
pub use edge_core::RequestId;
