//! Per-key mutual exclusion with lazily created locks.
//!
//! The registry lock is held only while looking up or inserting a key's
//! mutex, never while that mutex is awaited or held.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock registry keyed by trade number.
pub type OrderLockRegistry = LockRegistry<String>;

/// A mapping from key to an exclusive lock, created on first use.
///
/// Entries are never removed.
pub struct LockRegistry<K> {
    locks: RwLock<HashMap<K, Arc<Mutex<()>>>>,
}

/// Held lock for one key. Dropping it releases the lock.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<K> {
    key: K,
    _guard: OwnedMutexGuard<()>,
}

impl<K> LockGuard<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K> LockRegistry<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
        }
    }

    /// Wait until the lock for `key` is held by the caller.
    pub async fn acquire<Q>(&self, key: &Q) -> LockGuard<K>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ToOwned<Owned = K> + ?Sized,
    {
        let lock = self.lock_for(key);
        let guard = lock.lock_owned().await;
        LockGuard {
            key: key.to_owned(),
            _guard: guard,
        }
    }

    /// Take the lock for `key` only if nobody holds it.
    pub fn try_acquire<Q>(&self, key: &Q) -> Option<LockGuard<K>>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ToOwned<Owned = K> + ?Sized,
    {
        let guard = self.lock_for(key).try_lock_owned().ok()?;
        Some(LockGuard {
            key: key.to_owned(),
            _guard: guard,
        })
    }

    /// Release a held lock before its guard goes out of scope.
    pub fn release(&self, guard: LockGuard<K>) {
        drop(guard);
    }

    /// Number of keys that have ever been locked.
    pub fn len(&self) -> usize {
        self.locks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.read().is_empty()
    }

    fn lock_for<Q>(&self, key: &Q) -> Arc<Mutex<()>>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ToOwned<Owned = K> + ?Sized,
    {
        if let Some(lock) = self.locks.read().get(key) {
            return lock.clone();
        }

        // re-check under the write lock: another caller may have inserted it
        let mut locks = self.locks.write();
        locks
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl<K> Default for LockRegistry<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
