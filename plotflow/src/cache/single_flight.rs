//! Single-flight memoization table.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use super::TableStats;

type Flight<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

enum Slot<V, E> {
    Ready(V),
    Pending { id: u64, flight: Flight<V, E> },
}

/// Memoizes one value per key, constructing it at most once at a time.
///
/// The first caller for an empty key installs a shared construction future;
/// concurrent callers join it instead of starting their own. A successful
/// result is promoted to a ready entry. A failure is handed to every joined
/// caller and the key is left empty, so the next call tries again.
pub(crate) struct SingleFlight<K, V, E> {
    slots: RwLock<HashMap<K, Slot<V, E>>>,
    next_id: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V, E> Default for SingleFlight<K, V, E> {
    fn default() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone + Display,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Returns the cached value or constructs it with `init`.
    ///
    /// `init` runs under the table's write lock and must only build the
    /// future; the construction itself happens after the lock is released.
    pub(crate) async fn get_or_try_init<F, Fut>(&self, key: &K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        if let Some(Slot::Ready(value)) = self.slots.read().get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value.clone());
        }

        let (id, flight) = {
            let mut slots = self.slots.write();
            match slots.get(key) {
                Some(Slot::Ready(value)) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(value.clone());
                }
                Some(Slot::Pending { id, flight }) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    (*id, flight.clone())
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let flight = init().boxed().shared();
                    slots.insert(
                        key.clone(),
                        Slot::Pending {
                            id,
                            flight: flight.clone(),
                        },
                    );
                    (id, flight)
                }
            }
        };

        let result = flight.await;
        self.settle(key, id, &result);
        result
    }

    /// Stores the outcome of flight `id`, unless the slot was cleared or
    /// taken over by a newer flight in the meantime.
    fn settle(&self, key: &K, id: u64, result: &Result<V, E>) {
        let mut slots = self.slots.write();
        let current = matches!(
            slots.get(key),
            Some(Slot::Pending { id: pending, .. }) if *pending == id
        );
        if !current {
            return;
        }
        match result {
            Ok(value) => {
                slots.insert(key.clone(), Slot::Ready(value.clone()));
            }
            Err(_) => {
                slots.remove(key);
            }
        }
    }

    pub(crate) fn stats(&self) -> TableStats {
        let slots = self.slots.read();
        let mut keys: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(key, _)| key.to_string())
            .collect();
        keys.sort();
        TableStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: keys.len(),
            keys,
        }
    }
}

/// Empties two tables while holding both write locks, so no reader observes
/// one cleared and the other populated.
///
/// Flights started before the clear still complete for their callers, but
/// their results are not stored.
pub(crate) fn clear_pair<K1, V1, E1, K2, V2, E2>(
    first: &SingleFlight<K1, V1, E1>,
    second: &SingleFlight<K2, V2, E2>,
) {
    let mut a = first.slots.write();
    let mut b = second.slots.write();
    a.clear();
    b.clear();
    for counter in [&first.hits, &first.misses, &second.hits, &second.misses] {
        counter.store(0, Ordering::Relaxed);
    }
}
