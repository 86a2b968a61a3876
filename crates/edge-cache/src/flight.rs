//! Per-key single-flight coordination.
//!
//! The first caller for a key leads and runs the work. The work yields two
//! values: one the leader keeps and one it publishes. Concurrent callers for
//! the same key follow and receive a clone of the published value, so the
//! leader decides what may be shared. If a leader is dropped before
//! publishing, its followers race to lead again.

use std::future::Future;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;

/// How a caller took part in a flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Joined<R, T> {
    /// Ran the work; holds the leader's own value.
    Led(R),
    /// Received what the leader published.
    Followed(T),
}

enum Claim<T> {
    Lead(watch::Sender<Option<T>>),
    Follow(watch::Receiver<Option<T>>),
}

/// In-flight work, keyed by cache key.
pub struct SingleFlight<T> {
    flights: DashMap<String, watch::Receiver<Option<T>>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            flights: DashMap::new(),
        }
    }
}

impl<T: Clone + Send + Sync> SingleFlight<T> {
    /// Create an empty coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with work in progress.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Run `work` for `key` unless another caller already is, in which case
    /// wait for and share what it publishes.
    pub async fn run<R, F, Fut>(&self, key: &str, work: F) -> Joined<R, T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = (R, T)>,
    {
        let tx = loop {
            match self.claim(key) {
                Claim::Lead(tx) => break tx,
                Claim::Follow(mut rx) => {
                    let published = rx
                        .wait_for(Option::is_some)
                        .await
                        .ok()
                        .and_then(|value| value.clone());
                    if let Some(value) = published {
                        return Joined::Followed(value);
                    }
                    tracing::debug!(key, "Flight leader went away, retrying");
                }
            }
        };

        let guard = FlightGuard {
            flights: &self.flights,
            key,
            rx: tx.subscribe(),
        };
        let (own, published) = work().await;
        tx.send_replace(Some(published));
        drop(guard);

        Joined::Led(own)
    }

    fn claim(&self, key: &str) -> Claim<T> {
        match self.flights.entry(key.to_string()) {
            Entry::Occupied(e) => Claim::Follow(e.get().clone()),
            Entry::Vacant(e) => {
                let (tx, rx) = watch::channel(None);
                e.insert(rx);
                Claim::Lead(tx)
            }
        }
    }
}

/// Removes the leader's flight on completion or cancellation.
struct FlightGuard<'a, T> {
    flights: &'a DashMap<String, watch::Receiver<Option<T>>>,
    key: &'a str,
    rx: watch::Receiver<Option<T>>,
}

impl<T> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        self.flights
            .remove_if(self.key, |_, rx| rx.same_channel(&self.rx));
    }
}
