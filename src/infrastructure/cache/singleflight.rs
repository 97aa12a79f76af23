//! In-process request coalescing.
//!
//! Concurrent calls for the same key share one execution of the work; the
//! first caller (the leader) runs it and every waiter receives a clone of the
//! result. Coalescing is per process only.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

/// Result of a coalesced call.
#[derive(Debug, Clone)]
pub struct Flight<T> {
    pub value: T,
    /// True when more than one caller received this result.
    pub shared: bool,
    /// True for the caller that executed the work.
    pub leader: bool,
}

type Slot<T> = (u64, watch::Receiver<Option<T>>);

pub struct SingleFlight<T> {
    calls: DashMap<String, Slot<T>>,
    next_id: AtomicU64,
}

/// Removes the leader's slot when the leader finishes or is cancelled.
struct SlotGuard<'a, T> {
    calls: &'a DashMap<String, Slot<T>>,
    key: &'a str,
    id: u64,
}

impl<T> Drop for SlotGuard<'_, T> {
    fn drop(&mut self) {
        self.calls.remove_if(self.key, |_, (id, _)| *id == self.id);
    }
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            calls: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with work currently in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }

    /// Runs `work` for `key` unless a call for the same key is already in
    /// flight, in which case waits for and returns that call's result.
    ///
    /// If the leader is cancelled before producing a value, waiters retry and
    /// one of them becomes the new leader.
    pub async fn work<F, Fut>(&self, key: &str, work: F) -> Flight<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let (id, tx) = loop {
            let waiting = match self.calls.entry(key.to_string()) {
                Entry::Occupied(slot) => slot.get().1.clone(),
                Entry::Vacant(slot) => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    slot.insert((id, rx));
                    break (id, tx);
                }
            };

            let mut rx = waiting;
            if let Ok(value) = rx.wait_for(Option::is_some).await
                && let Some(value) = value.clone()
            {
                return Flight {
                    value,
                    shared: true,
                    leader: false,
                };
            }
        };

        let guard = SlotGuard {
            calls: &self.calls,
            key,
            id,
        };
        let value = work().await;

        // Unregister first so the receiver count only reflects waiters.
        drop(guard);
        let shared = tx.receiver_count() > 0;
        tx.send_replace(Some(value.clone()));

        Flight {
            value,
            shared,
            leader: true,
        }
    }
}
