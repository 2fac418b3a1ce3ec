//! Acquiring several key locks at once
//!
//! Multi-key units lock their keys in one canonical order: sorted and
//! deduplicated. Two units with overlapping key sets always contend for their
//! lowest shared key first, so neither can hold a lock the other needs while
//! waiting on one the other holds. Caller order is ignored on purpose:
//! `["x", "y"]` and `["y", "x"]` lock identically.

use crate::sync::{KeyGuard, KeyLock};
use std::sync::Arc;
use std::vec;

/// Sorted, duplicate-free set of group keys
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct KeySet {
    keys: Vec<String>,
}

impl KeySet {
    /// Build a key set from keys in any order, dropping duplicates
    pub fn new<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.sort_unstable();
        keys.dedup();
        Self { keys }
    }

    /// Keys in acquisition order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<K: Into<String>> FromIterator<K> for KeySet {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Guards for every lock of a multi-key unit
///
/// Dropping it releases the locks in reverse acquisition order.
pub struct MultiKeyGuard {
    guards: Vec<KeyGuard>,
}

type Ready = Box<dyn FnOnce(MultiKeyGuard) + Send + 'static>;

impl MultiKeyGuard {
    /// Lock each of `locks` in order, then run `then` with all of them held
    ///
    /// `locks` must already be in canonical order, as returned by
    /// [`KeyRegistry::locks_for`](crate::sync::KeyRegistry::locks_for). A busy
    /// key parks the acquisition in that key's queue, keeping the keys taken
    /// so far; no thread waits. `then` runs on whichever thread hands over the
    /// last key, or on the caller if every key was free.
    pub fn acquire<F>(locks: Vec<Arc<KeyLock>>, then: F)
    where
        F: FnOnce(MultiKeyGuard) + Send + 'static,
    {
        debug_assert!(locks.windows(2).all(|pair| pair[0].key() < pair[1].key()));
        let held = Vec::with_capacity(locks.len());
        advance(locks.into_iter(), held, Box::new(then));
    }

    /// The locks held, in acquisition order
    pub(crate) fn locks(&self) -> impl Iterator<Item = &Arc<KeyLock>> {
        self.guards.iter().map(KeyGuard::lock)
    }
}

/// Take the next lock of `pending`, or finish once none are left
fn advance(mut pending: vec::IntoIter<Arc<KeyLock>>, mut held: Vec<KeyGuard>, then: Ready) {
    match pending.next() {
        None => then(MultiKeyGuard { guards: held }),
        Some(lock) => lock.acquire(Box::new(move |guard| {
            held.push(guard);
            advance(pending, held, then);
        })),
    }
}

impl Drop for MultiKeyGuard {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}

impl std::fmt::Debug for MultiKeyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.locks().map(|lock| lock.key()))
            .finish()
    }
}
