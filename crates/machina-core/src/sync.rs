//! Striped locks for world resources touched from outside the tick thread.
//!
//! The tick protocol itself is single-threaded and takes no locks. Background
//! work that reads or writes world-addressable resources (a container at some
//! position, say) serializes on the stripe its key hashes to. Code needing
//! several keys must use [`StripedLock::lock_many`], which acquires stripes in
//! ascending index order and releases them in descending order, so two
//! callers can never deadlock on each other.

use parking_lot::{Mutex, MutexGuard};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A fixed set of mutexes indexed by key hash.
#[derive(Debug)]
pub struct StripedLock {
    stripes: Box<[Mutex<()>]>,
}

impl StripedLock {
    pub const DEFAULT_STRIPES: usize = 64;

    /// A stripe count of 0 is clamped to 1.
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        Self {
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Index of the stripe guarding `key`.
    pub fn stripe_of<K: Hash + ?Sized>(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    pub fn lock<K: Hash + ?Sized>(&self, key: &K) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_of(key)].lock()
    }

    /// Lock every stripe covering `keys`. Keys sharing a stripe lock it once.
    pub fn lock_many<'a, K, I>(&self, keys: I) -> StripeGuard<'_>
    where
        K: Hash + ?Sized + 'a,
        I: IntoIterator<Item = &'a K>,
    {
        let mut indices: Vec<usize> = keys.into_iter().map(|k| self.stripe_of(k)).collect();
        indices.sort_unstable();
        indices.dedup();
        let guards = indices
            .iter()
            .map(|&index| self.stripes[index].lock())
            .collect();
        StripeGuard { indices, guards }
    }
}

impl Default for StripedLock {
    fn default() -> Self {
        Self::new(Self::DEFAULT_STRIPES)
    }
}

/// Holds several stripes; releases them highest index first on drop.
#[derive(Debug)]
pub struct StripeGuard<'a> {
    indices: Vec<usize>,
    guards: Vec<MutexGuard<'a, ()>>,
}

impl StripeGuard<'_> {
    /// Stripe indices held, ascending.
    pub fn stripes(&self) -> &[usize] {
        &self.indices
    }
}

impl Drop for StripeGuard<'_> {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}
