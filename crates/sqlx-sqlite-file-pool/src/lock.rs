//! Per-file read/write locks
//!
//! Each key gets a fair tokio `RwLock`. Work on a file holds it shared
//! (readers) or exclusive (writers, replace, remove). Every manager call
//! runs in its own task-local scope seeded with a copy of its caller's held
//! keys. Work nested inside a holder re-enters instead of deadlocking
//! against itself, while sibling futures polled side by side never see each
//! other's locks and contend on the real `RwLock`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::trace;

use crate::key::ResourceKey;
use crate::{Error, Result};

/// How a unit of work accesses its database file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
   /// Read-only work; any number of shared holders run together
   Shared,
   /// Mutating work; excludes every other holder of the same file
   Exclusive,
}

#[derive(Debug, Clone, Copy)]
struct Held {
   mode: AccessMode,
   depth: usize,
}

tokio::task_local! {
   static HELD_LOCKS: RefCell<HashMap<ResourceKey, Held>>;
}

/// Run `fut` in a fresh held-lock scope that starts from a copy of the
/// enclosing scope's keys. Locks taken inside stay invisible to the
/// enclosing scope and to sibling scopes.
pub(crate) async fn scoped<F: Future>(fut: F) -> F::Output {
   let inherited = HELD_LOCKS
      .try_with(|held| held.borrow().clone())
      .unwrap_or_default();
   HELD_LOCKS.scope(RefCell::new(inherited), fut).await
}

fn held_mode(key: &ResourceKey) -> Option<AccessMode> {
   HELD_LOCKS
      .try_with(|held| held.borrow().get(key).map(|h| h.mode))
      .ok()
      .flatten()
}

fn record(key: &ResourceKey, mode: AccessMode) {
   let _ = HELD_LOCKS.try_with(|held| {
      held
         .borrow_mut()
         .entry(key.clone())
         .and_modify(|h| h.depth += 1)
         .or_insert(Held { mode, depth: 1 });
   });
}

fn forget(key: &ResourceKey) {
   let _ = HELD_LOCKS.try_with(|held| {
      let mut held = held.borrow_mut();
      if let Some(h) = held.get_mut(key) {
         h.depth -= 1;
         if h.depth == 0 {
            held.remove(key);
         }
      }
   });
}

enum Inner {
   Shared(OwnedRwLockReadGuard<()>),
   Exclusive(OwnedRwLockWriteGuard<()>),
   Reentered,
}

/// RAII guard for one key's lock. Dropping it releases the lock (or one
/// level of reentry).
#[must_use = "if unused, the lock is immediately released"]
pub(crate) struct KeyLockGuard {
   key: ResourceKey,
   inner: Inner,
}

impl KeyLockGuard {
   pub(crate) fn is_reentered(&self) -> bool {
      matches!(self.inner, Inner::Reentered)
   }
}

impl Drop for KeyLockGuard {
   fn drop(&mut self) {
      // Registry first; the RwLock guard is released with the fields below
      forget(&self.key);
      let mode = match self.inner {
         Inner::Shared(_) => "shared",
         Inner::Exclusive(_) => "exclusive",
         Inner::Reentered => "reentered",
      };
      trace!(path = %self.key, mode, "Released key lock");
   }
}

/// Lock per database file
#[derive(Default)]
pub(crate) struct LockTable {
   locks: Mutex<HashMap<ResourceKey, Arc<RwLock<()>>>>,
}

impl LockTable {
   fn lock_for(&self, key: &ResourceKey) -> Arc<RwLock<()>> {
      let mut locks = self.locks.lock();
      Arc::clone(locks.entry(key.clone()).or_default())
   }

   /// Acquire `key` in `mode` for the current task.
   ///
   /// Re-entry is granted when the task already holds the key exclusively,
   /// or shared when shared is requested. Asking for exclusive while holding
   /// shared fails instead of deadlocking.
   pub(crate) async fn lock(&self, key: &ResourceKey, mode: AccessMode) -> Result<KeyLockGuard> {
      let inner = match (held_mode(key), mode) {
         (Some(AccessMode::Exclusive), _) | (Some(AccessMode::Shared), AccessMode::Shared) => {
            Inner::Reentered
         }
         (Some(AccessMode::Shared), AccessMode::Exclusive) => {
            return Err(Error::LockUpgrade {
               path: key.path().to_path_buf(),
            });
         }
         (None, AccessMode::Shared) => Inner::Shared(self.lock_for(key).read_owned().await),
         (None, AccessMode::Exclusive) => Inner::Exclusive(self.lock_for(key).write_owned().await),
      };

      record(key, mode);
      trace!(path = %key, ?mode, "Acquired key lock");

      Ok(KeyLockGuard {
         key: key.clone(),
         inner,
      })
   }

   /// Acquire several keys in ascending key order.
   ///
   /// Every caller that needs more than one key must go through here so that
   /// two tasks never wait on each other's keys.
   pub(crate) async fn lock_ordered(
      &self,
      keys: &[&ResourceKey],
      mode: AccessMode,
   ) -> Result<Vec<KeyLockGuard>> {
      let mut keys = keys.to_vec();
      keys.sort();
      keys.dedup();

      let mut guards = Vec::with_capacity(keys.len());
      for key in keys {
         guards.push(self.lock(key, mode).await?);
      }
      Ok(guards)
   }

   /// Take `key` exclusively without waiting, bypassing re-entry. Returns
   /// `None` when anybody, including the current task, holds the key.
   pub(crate) fn try_exclusive(&self, key: &ResourceKey) -> Option<OwnedRwLockWriteGuard<()>> {
      self.lock_for(key).try_write_owned().ok()
   }

   /// Take `key` exclusively, waiting for current holders, bypassing re-entry
   pub(crate) async fn exclusive(&self, key: &ResourceKey) -> OwnedRwLockWriteGuard<()> {
      self.lock_for(key).write_owned().await
   }

   /// Drop locks nobody references any more
   pub(crate) fn prune(&self) {
      self.locks.lock().retain(|_, lock| Arc::strong_count(lock) > 1);
   }

   pub(crate) fn len(&self) -> usize {
      self.locks.lock().len()
   }
}
