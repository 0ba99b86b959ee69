//! Collapsing of concurrent identical requests.
//!
//! A [`Group`] keeps a registry of calls currently in flight. The first
//! caller for a key executes the call, everyone arriving while it is still
//! running waits for and receives a copy of its result.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::vec::Vec;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

//------------ Group ---------------------------------------------------------

/// A registry of in-flight calls keyed by `K` producing a `V`.
pub struct Group<K, V> {
    calls: Mutex<HashMap<K, Vec<oneshot::Sender<V>>>>,
}

impl<K, V> Group<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Group {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `f` unless a call for `key` is already in flight.
    ///
    /// If another call is running, waits for it and returns its result
    /// instead. Should that call be cancelled before it finishes, `f` is
    /// run after all.
    pub async fn run<F, Fut>(&self, key: K, f: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let waiter = {
            let mut calls = self.calls.lock();
            match calls.get_mut(&key) {
                Some(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                None => {
                    calls.insert(key.clone(), Vec::new());
                    None
                }
            }
        };

        if let Some(rx) = waiter {
            trace!("Joining call already in flight");
            return match rx.await {
                Ok(value) => value,
                Err(_) => f().await,
            };
        }

        let mut guard = CallGuard {
            group: self,
            key: Some(key),
        };
        let value = f().await;
        for tx in guard.complete() {
            let _ = tx.send(value.clone());
        }
        value
    }

    /// Returns the number of keys currently in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}

impl<K, V> Default for Group<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

//------------ CallGuard -----------------------------------------------------

/// Removes the registry entry of a call when the leading caller goes away.
///
/// Dropping the entry drops all waiting senders which wakes the waiters up
/// so they can run the call themselves.
struct CallGuard<'a, K: Eq + Hash, V> {
    group: &'a Group<K, V>,
    key: Option<K>,
}

impl<K: Eq + Hash, V> CallGuard<'_, K, V> {
    fn complete(&mut self) -> Vec<oneshot::Sender<V>> {
        match self.key.take() {
            Some(key) => {
                self.group.calls.lock().remove(&key).unwrap_or_default()
            }
            None => Vec::new(),
        }
    }
}

impl<K: Eq + Hash, V> Drop for CallGuard<'_, K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.group.calls.lock().remove(&key);
        }
    }
}

//------------ Tests ---------------------------------------------------------
