//! Work an event handler started but did not wait for.
//!
//! Background cache writes, revalidation and sync attempts are registered
//! here so the agent can wait for them before it stops, instead of tearing
//! them down half way.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::{JoinError, JoinSet};
use tracing::warn;

#[derive(Clone, Default)]
pub struct PendingSet {
  tasks: Arc<Mutex<JoinSet<()>>>,
}

impl PendingSet {
  pub fn new() -> Self {
    Self::default()
  }

  /// Keep `future` running after the handler that started it has returned.
  pub fn wait_until<F>(&self, future: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let mut tasks = self.lock();
    reap(&mut tasks);
    tasks.spawn(future);
  }

  /// Number of registered operations still running.
  pub fn len(&self) -> usize {
    let mut tasks = self.lock();
    reap(&mut tasks);
    tasks.len()
  }

  /// Wait until every registered operation, including ones registered while
  /// waiting, has finished.
  pub async fn settle(&self) {
    loop {
      let mut tasks = std::mem::take(&mut *self.lock());
      if tasks.is_empty() {
        return;
      }
      while let Some(result) = tasks.join_next().await {
        log_failure(result);
      }
    }
  }

  fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
    self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Drop operations that have already finished.
fn reap(tasks: &mut JoinSet<()>) {
  while let Some(result) = tasks.try_join_next() {
    log_failure(result);
  }
}

fn log_failure(result: Result<(), JoinError>) {
  if let Err(e) = result {
    warn!(error = %e, "Background operation aborted");
  }
}
