//! Pool of open connections, one per database file
//!
//! Entries are created lazily on first access and carry an in-use count and
//! a last-access stamp. Only idle entries (in-use count zero) are ever
//! closed, and every close happens while the closer holds the file's
//! exclusive lock so a second native handle to the same file can never be
//! opened while the first is still closing.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Notify, OnceCell};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::PoolConfig;
use crate::connection::PooledConnection;
use crate::key::ResourceKey;
use crate::lock::LockTable;
use crate::{Error, Result};

type Slot = OnceCell<Arc<PooledConnection>>;

struct PoolEntry {
   slot: Arc<Slot>,
   in_use: usize,
   last_accessed: Instant,
}

impl PoolEntry {
   fn is_idle(&self) -> bool {
      self.in_use == 0
   }
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
   /// Entries currently in the pool
   pub entries: usize,
   /// Entries nobody is using
   pub idle: usize,
   /// Entries with work in flight
   pub in_use: usize,
   /// Native connections opened since the pool was created
   pub opened: u64,
   /// Native connections closed since the pool was created
   pub closed: u64,
}

pub(crate) struct ConnectionPool {
   config: PoolConfig,
   entries: Mutex<HashMap<ResourceKey, PoolEntry>>,
   released: Notify,
   opened: AtomicU64,
   closed: AtomicU64,
}

impl ConnectionPool {
   pub(crate) fn new(config: PoolConfig) -> Self {
      Self {
         config,
         entries: Mutex::new(HashMap::new()),
         released: Notify::new(),
         opened: AtomicU64::new(0),
         closed: AtomicU64::new(0),
      }
   }

   pub(crate) fn config(&self) -> &PoolConfig {
      &self.config
   }

   /// Get the connection for `key`, opening it if needed.
   ///
   /// The caller must hold `key`'s lock. Never waits on capacity; the
   /// returned lease keeps the entry busy until dropped.
   pub(crate) async fn acquire(&self, key: &ResourceKey) -> Result<Lease<'_>> {
      let reservation = self.reserve(key);

      let conn = reservation
         .slot
         .get_or_try_init(|| async {
            let conn = PooledConnection::open(key, self.config.busy_timeout).await?;
            self.opened.fetch_add(1, Ordering::Relaxed);
            Ok::<_, Error>(Arc::new(conn))
         })
         .await
         .map(Arc::clone)?;

      trace!(path = %key, "Acquired pooled connection");

      Ok(Lease {
         conn,
         _reservation: reservation,
      })
   }

   fn reserve(&self, key: &ResourceKey) -> Reservation<'_> {
      let mut entries = self.entries.lock();
      let entry = entries.entry(key.clone()).or_insert_with(|| PoolEntry {
         slot: Arc::new(OnceCell::new()),
         in_use: 0,
         last_accessed: Instant::now(),
      });
      entry.in_use += 1;

      Reservation {
         pool: self,
         key: key.clone(),
         slot: Arc::clone(&entry.slot),
      }
   }

   fn release(&self, key: &ResourceKey, slot: &Arc<Slot>) {
      let mut entries = self.entries.lock();
      let Some(entry) = entries.get_mut(key) else {
         return;
      };
      if !Arc::ptr_eq(&entry.slot, slot) {
         return;
      }

      entry.in_use -= 1;
      entry.last_accessed = Instant::now();

      if entry.is_idle() {
         // A failed open leaves nothing worth keeping
         if !entry.slot.initialized() {
            entries.remove(key);
         }
         drop(entries);
         self.released.notify_waiters();
      }

      trace!(path = %key, "Released pooled connection");
   }

   pub(crate) fn size(&self) -> usize {
      self.entries.lock().len()
   }

   pub(crate) fn contains(&self, key: &ResourceKey) -> bool {
      self.entries.lock().contains_key(key)
   }

   pub(crate) fn stats(&self) -> PoolStats {
      let entries = self.entries.lock();
      let idle = entries.values().filter(|e| e.is_idle()).count();

      PoolStats {
         entries: entries.len(),
         idle,
         in_use: entries.len() - idle,
         opened: self.opened.load(Ordering::Relaxed),
         closed: self.closed.load(Ordering::Relaxed),
      }
   }

   /// Idle keys, least recently used first, ties broken by key order
   fn idle_by_age(&self) -> Vec<(Instant, ResourceKey)> {
      let entries = self.entries.lock();
      let mut idle: Vec<_> = entries
         .iter()
         .filter(|(_, e)| e.is_idle())
         .map(|(k, e)| (e.last_accessed, k.clone()))
         .collect();
      idle.sort();
      idle
   }

   /// Close least recently used idle entries until at most `max_size` idle
   /// entries remain. Entries whose lock is held are skipped.
   pub(crate) async fn enforce_capacity(&self, locks: &LockTable) -> usize {
      let idle = self.idle_by_age();
      if idle.len() <= self.config.max_size {
         return 0;
      }

      let excess = idle.len() - self.config.max_size;
      let victims = idle.into_iter().take(excess).map(|(_, key)| key);
      let evicted = self.close_idle(victims, locks, "capacity").await;
      if evicted > 0 {
         debug!(evicted, max_size = self.config.max_size, "Evicted idle connections over capacity");
      }
      evicted
   }

   /// Close idle entries not used for longer than the idle timeout
   pub(crate) async fn reap_idle(&self, now: Instant, locks: &LockTable) -> usize {
      let timeout = self.config.idle_timeout;
      let victims = self
         .idle_by_age()
         .into_iter()
         .filter(|(last_accessed, _)| now.saturating_duration_since(*last_accessed) > timeout)
         .map(|(_, key)| key);

      let reaped = self.close_idle(victims, locks, "idle").await;
      locks.prune();
      if reaped > 0 {
         debug!(reaped, "Reaped idle connections");
      }
      reaped
   }

   async fn close_idle(
      &self,
      victims: impl Iterator<Item = ResourceKey>,
      locks: &LockTable,
      reason: &'static str,
   ) -> usize {
      let mut evicted = 0;
      let mut failures = Vec::new();

      for key in victims {
         let Some(_guard) = locks.try_exclusive(&key) else {
            trace!(path = %key, reason, "Skipping busy connection");
            continue;
         };

         let Some(slot) = self.take_if_idle(&key) else {
            continue;
         };

         evicted += 1;
         if let Err(e) = self.close_slot(&key, slot).await {
            failures.push((key, e));
         }
      }

      for (key, e) in &failures {
         warn!(path = %key, reason, error = %e, "Failed to close pooled connection");
      }

      evicted
   }

   /// Close every entry, waiting for in-flight work on each file until
   /// `drain_timeout` has passed in total.
   pub(crate) async fn reap_all(&self, locks: &LockTable) -> Result<usize> {
      let started = Instant::now();
      let deadline = started + self.config.drain_timeout;

      let mut keys: Vec<ResourceKey> = self.entries.lock().keys().cloned().collect();
      keys.sort();

      let mut closed = 0;
      let mut busy = Vec::new();

      for key in keys {
         let _guard = match locks.try_exclusive(&key) {
            Some(guard) => guard,
            None => match tokio::time::timeout_at(deadline, locks.exclusive(&key)).await {
               Ok(guard) => guard,
               Err(_) => {
                  busy.push(key);
                  continue;
               }
            },
         };

         let Some(slot) = self.take_if_idle(&key) else {
            continue;
         };

         closed += 1;
         if let Err(e) = self.close_slot(&key, slot).await {
            warn!(path = %key, error = %e, "Failed to close pooled connection");
         }
      }

      locks.prune();

      if !busy.is_empty() {
         warn!(closed, busy = busy.len(), "Some connections were still in use at the drain deadline");
      }

      match busy.into_iter().next() {
         Some(path) => Err(Error::PoolBusy {
            path: path.into_path_buf(),
            waited: started.elapsed(),
         }),
         None => {
            debug!(closed, "Closed all pooled connections");
            Ok(closed)
         }
      }
   }

   /// Close `key`'s entry once its in-use count drains to zero.
   ///
   /// The caller must hold `key` exclusively, so only work nested inside the
   /// caller's own task can still be using the entry.
   pub(crate) async fn close_drained(&self, key: &ResourceKey, deadline: Instant) -> Result<()> {
      let started = Instant::now();

      let slot = loop {
         let released = self.released.notified();
         tokio::pin!(released);
         released.as_mut().enable();

         {
            let mut entries = self.entries.lock();
            match entries.get(key).map(PoolEntry::is_idle) {
               None => return Ok(()),
               Some(true) => {
                  if let Some(entry) = entries.remove(key) {
                     break entry.slot;
                  }
               }
               Some(false) => {}
            }
         }

         if tokio::time::timeout_at(deadline, released).await.is_err() {
            return Err(Error::PoolBusy {
               path: key.path().to_path_buf(),
               waited: started.elapsed(),
            });
         }
      };

      if let Err(e) = self.close_slot(key, slot).await {
         warn!(path = %key, error = %e, "Failed to close pooled connection");
      }
      Ok(())
   }

   fn take_if_idle(&self, key: &ResourceKey) -> Option<Arc<Slot>> {
      let mut entries = self.entries.lock();
      if entries.get(key).is_some_and(PoolEntry::is_idle) {
         entries.remove(key).map(|e| e.slot)
      } else {
         None
      }
   }

   async fn close_slot(&self, key: &ResourceKey, slot: Arc<Slot>) -> std::result::Result<(), sqlx::Error> {
      let conn = match Arc::try_unwrap(slot).map(OnceCell::into_inner) {
         Ok(Some(conn)) => conn,
         Ok(None) => return Ok(()),
         Err(_) => {
            warn!(path = %key, "Connection still referenced when closing; dropping it");
            return Ok(());
         }
      };

      self.closed.fetch_add(1, Ordering::Relaxed);
      match Arc::try_unwrap(conn) {
         Ok(conn) => conn.close().await,
         Err(_) => {
            warn!(path = %key, "Connection still referenced when closing; dropping it");
            Ok(())
         }
      }
   }
}

/// Keeps a pool entry's in-use count raised. Dropping it releases the entry
/// on every exit path, including failure, panic and cancellation.
struct Reservation<'p> {
   pool: &'p ConnectionPool,
   key: ResourceKey,
   slot: Arc<Slot>,
}

impl Drop for Reservation<'_> {
   fn drop(&mut self) {
      self.pool.release(&self.key, &self.slot);
   }
}

/// Borrowed use of one pooled connection
pub(crate) struct Lease<'p> {
   conn: Arc<PooledConnection>,
   _reservation: Reservation<'p>,
}

impl Lease<'_> {
   pub(crate) fn connection(&self) -> &PooledConnection {
      &self.conn
   }
}
