//! Periodic idle reaping
//!
//! The manager never schedules anything itself. `IdleReaper` is the
//! maintenance task a server runs next to it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::SqliteConnectionManager;

/// Calls [`SqliteConnectionManager::reap_idle`] on a fixed interval
pub struct IdleReaper;

impl IdleReaper {
   /// Start reaping on the current tokio runtime. The task runs until the
   /// returned handle is shut down or dropped.
   pub fn spawn(manager: Arc<SqliteConnectionManager>, interval: Duration) -> ReaperHandle {
      let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

      let task = tokio::spawn(async move {
         let mut ticker = tokio::time::interval(interval);
         ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
         // The first tick completes immediately
         ticker.tick().await;

         loop {
            tokio::select! {
               _ = &mut stop_rx => break,
               _ = ticker.tick() => {
                  let reaped = manager.reap_idle(Instant::now()).await;
                  trace!(reaped, "Idle reaper pass");
               }
            }
         }
         debug!("Idle reaper stopped");
      });

      debug!(interval_ms = interval.as_millis() as u64, "Idle reaper started");

      ReaperHandle {
         stop: Some(stop_tx),
         task: Some(task),
      }
   }
}

/// Owner of a running [`IdleReaper`]
#[must_use = "dropping the handle stops the reaper"]
pub struct ReaperHandle {
   stop: Option<oneshot::Sender<()>>,
   task: Option<JoinHandle<()>>,
}

impl ReaperHandle {
   /// Stop the reaper and wait for an in-progress pass to finish
   pub async fn shutdown(mut self) {
      if let Some(stop) = self.stop.take() {
         let _ = stop.send(());
      }
      if let Some(task) = self.task.take() {
         let _ = task.await;
      }
   }
}

impl Drop for ReaperHandle {
   fn drop(&mut self) {
      // The loop also ends when the sender is dropped
      self.stop.take();
   }
}
