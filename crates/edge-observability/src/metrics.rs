//! Cache outcome counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Process-wide cache counters, shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    revalidations: AtomicU64,
    not_modified: AtomicU64,
    bypasses: AtomicU64,
    unsatisfiable: AtomicU64,
    coalesced: AtomicU64,
    origin_fetches: AtomicU64,
    origin_failures: AtomicU64,
    store_read_errors: AtomicU64,
    store_write_errors: AtomicU64,
    stores: AtomicU64,
    stores_skipped: AtomicU64,
}

impl CacheMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// A request was served from a fresh entry.
    pub fn record_hit(&self) {
        bump(&self.hits);
    }

    /// A request was served stale under `max-stale`.
    pub fn record_stale_hit(&self) {
        bump(&self.stale_hits);
    }

    /// A request needed a full origin fetch.
    pub fn record_miss(&self) {
        bump(&self.misses);
    }

    /// A conditional request was sent for a stale entry.
    pub fn record_revalidation(&self) {
        bump(&self.revalidations);
    }

    /// The origin confirmed a stored entry with 304.
    pub fn record_not_modified(&self) {
        bump(&self.not_modified);
    }

    /// Caching was skipped for a request.
    pub fn record_bypass(&self) {
        bump(&self.bypasses);
    }

    /// `only-if-cached` could not be honored.
    pub fn record_unsatisfiable(&self) {
        bump(&self.unsatisfiable);
    }

    /// A request shared another request's origin fetch.
    pub fn record_coalesced(&self) {
        bump(&self.coalesced);
    }

    /// An origin fetch was issued.
    pub fn record_origin_fetch(&self) {
        bump(&self.origin_fetches);
    }

    /// An origin fetch failed.
    pub fn record_origin_failure(&self) {
        bump(&self.origin_failures);
    }

    /// The store could not be read.
    pub fn record_store_read_error(&self) {
        bump(&self.store_read_errors);
    }

    /// The store could not be written.
    pub fn record_store_write_error(&self) {
        bump(&self.store_write_errors);
    }

    /// An entry was written to the store.
    pub fn record_store(&self) {
        bump(&self.stores);
    }

    /// A response was not storable.
    pub fn record_store_skipped(&self) {
        bump(&self.stores_skipped);
    }

    /// Read every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: read(&self.hits),
            stale_hits: read(&self.stale_hits),
            misses: read(&self.misses),
            revalidations: read(&self.revalidations),
            not_modified: read(&self.not_modified),
            bypasses: read(&self.bypasses),
            unsatisfiable: read(&self.unsatisfiable),
            coalesced: read(&self.coalesced),
            origin_fetches: read(&self.origin_fetches),
            origin_failures: read(&self.origin_failures),
            store_read_errors: read(&self.store_read_errors),
            store_write_errors: read(&self.store_write_errors),
            stores: read(&self.stores),
            stores_skipped: read(&self.stores_skipped),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub revalidations: u64,
    pub not_modified: u64,
    pub bypasses: u64,
    pub unsatisfiable: u64,
    pub coalesced: u64,
    pub origin_fetches: u64,
    pub origin_failures: u64,
    pub store_read_errors: u64,
    pub store_write_errors: u64,
    pub stores: u64,
    pub stores_skipped: u64,
}

impl MetricsSnapshot {
    /// Share of cacheable lookups answered without a full origin fetch.
    pub fn hit_ratio(&self) -> f64 {
        let served = self.hits + self.stale_hits + self.not_modified;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }

    /// Format as JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Format as human-readable summary.
    pub fn to_summary(&self) -> String {
        let lines = [
            format!("Hit ratio: {:.1}%", self.hit_ratio() * 100.0),
            format!("  Hits: {} ({} stale)", self.hits, self.stale_hits),
            format!("  Misses: {}", self.misses),
            format!(
                "  Revalidations: {} ({} not modified)",
                self.revalidations, self.not_modified
            ),
            format!("  Bypasses: {}", self.bypasses),
            format!("  Unsatisfiable: {}", self.unsatisfiable),
            format!("  Coalesced: {}", self.coalesced),
            format!(
                "  Origin fetches: {} ({} failed)",
                self.origin_fetches, self.origin_failures
            ),
            format!(
                "  Stores: {} ({} skipped, {} failed)",
                self.stores, self.stores_skipped, self.store_write_errors
            ),
            format!("  Store read errors: {}", self.store_read_errors),
        ];
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = CacheMetrics::new();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();
        metrics.record_origin_fetch();
        metrics.record_store_write_error();

        let snap = metrics.snapshot();
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.origin_fetches, 1);
        assert_eq!(snap.store_write_errors, 1);
        assert_eq!(snap.bypasses, 0);
    }

    #[test]
    fn test_hit_ratio() {
        assert_eq!(MetricsSnapshot::default().hit_ratio(), 0.0);

        let snap = MetricsSnapshot {
            hits: 2,
            not_modified: 1,
            misses: 1,
            ..Default::default()
        };
        assert_eq!(snap.hit_ratio(), 0.75);
    }

    #[test]
    fn test_snapshot_json() {
        let metrics = CacheMetrics::new();
        metrics.record_coalesced();
        let json = metrics.snapshot().to_json();
        let back: MetricsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.coalesced, 1);
    }

    #[test]
    fn test_summary_mentions_ratio() {
        let snap = MetricsSnapshot {
            hits: 1,
            misses: 1,
            ..Default::default()
        };
        assert!(snap.to_summary().starts_with("Hit ratio: 50.0%"));
    }
}
