//! Install and activate transitions.

use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::Ordering;
use std::sync::PoisonError;
use tracing::{error, info};

use super::Worker;
use crate::cache::{CacheLayer, CacheStorage};
use crate::config::CacheNames;

/// Where a worker is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  /// Constructed, nothing cached yet
  Parsed,
  Installing,
  /// Static partition populated, waiting to take over
  Installed,
  Activating,
  /// Controlling clients and intercepting requests
  Activated,
  /// Install failed; this worker will never activate
  Redundant,
}

impl<S: CacheStorage + 'static> Worker<S> {
  pub fn state(&self) -> LifecycleState {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn set_state(&self, to: LifecycleState) {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    info!(from = ?*state, to = ?to, "Lifecycle transition");
    *state = to;
  }

  #[cfg(test)]
  pub(crate) fn set_state_for_test(&self, to: LifecycleState) {
    self.set_state(to);
  }

  /// Move from `from` to `to`, refusing if the worker is elsewhere.
  fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<()> {
    let current = self.state();
    if current != from {
      return Err(eyre!("Cannot move to {:?} while {:?}", to, current));
    }
    self.set_state(to);
    Ok(())
  }

  /// Populate the static partition and ask to take over immediately.
  ///
  /// If any static asset cannot be fetched nothing is cached, the worker
  /// becomes `Redundant` and the error is returned.
  pub async fn install(&self) -> Result<()> {
    info!(version = %self.names.primary, "Install event");
    self.transition(LifecycleState::Parsed, LifecycleState::Installing)?;

    let skip_waiting = async {
      self.skip_waiting.store(true, Ordering::SeqCst);
      Ok::<_, color_eyre::Report>(())
    };

    match tokio::try_join!(self.precache_static(), skip_waiting) {
      Ok(_) => {
        self.set_state(LifecycleState::Installed);
        Ok(())
      }
      Err(e) => {
        error!(error = %e, "Install failed");
        self.set_state(LifecycleState::Redundant);
        Err(e)
      }
    }
  }

  /// Delete partitions left over from other versions and take control of
  /// every open client.
  pub async fn activate(&self) -> Result<()> {
    info!(version = %self.names.primary, "Activate event");
    self.transition(LifecycleState::Installed, LifecycleState::Activating)?;

    let cleanup = async { delete_stale_partitions(&self.cache, &self.names).map(|_| ()) };
    let claim = async {
      let claimed = self.clients.claim(&self.names.primary).await?;
      info!(claimed, "Claimed clients");
      Ok::<_, color_eyre::Report>(())
    };

    match tokio::try_join!(cleanup, claim) {
      Ok(_) => {
        self.set_state(LifecycleState::Activated);
        Ok(())
      }
      Err(e) => {
        error!(error = %e, "Activation failed");
        self.set_state(LifecycleState::Installed);
        Err(e)
      }
    }
  }

  /// Install, then activate straight away if install asked to skip waiting.
  pub async fn start(&self) -> Result<()> {
    self.install().await?;
    if self.skip_waiting.load(Ordering::SeqCst) {
      self.activate().await?;
    }
    Ok(())
  }

  /// Fetch the whole static asset list into the static partition.
  pub(super) async fn precache_static(&self) -> Result<()> {
    let partition = self.cache.open(&self.names.static_name)?;
    info!(partition = partition.name(), "Caching static files");
    partition
      .add_all(self.network.as_ref(), &self.static_requests())
      .await?;
    info!(entries = partition.keys()?.len(), "Static files cached");
    Ok(())
  }
}

/// Destroy every partition that does not belong to the current version.
/// Returns the names that were deleted.
pub fn delete_stale_partitions<S: CacheStorage>(
  cache: &CacheLayer<S>,
  names: &CacheNames,
) -> Result<Vec<String>> {
  let stale: Vec<String> = cache
    .keys()?
    .into_iter()
    .filter(|name| !names.is_current(name))
    .collect();

  for name in &stale {
    info!(partition = %name, "Deleting old cache");
    cache.delete(name)?;
  }

  Ok(stale)
}

#[cfg(test)]
mod tests {
  use super::super::testing::{active_harness, harness, harness_with, static_network, url};
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::clients::Clients;
  use crate::net::mock::{ok, MockNetwork};
  use crate::net::Request;

  #[tokio::test]
  async fn test_install_populates_static_partition() {
    let h = harness();
    h.worker.install().await.unwrap();

    assert_eq!(h.worker.state(), LifecycleState::Installed);
    let partition = h.worker.cache.open("app-static-v1").unwrap();
    let urls: Vec<String> = partition.keys().unwrap().into_iter().map(|k| k.url).collect();
    assert_eq!(urls.len(), 5);
    assert!(urls.contains(&"http://app.test/index.html".to_string()));
    assert!(urls.contains(&"http://app.test/icons/icon-512x512.png".to_string()));
  }

  #[tokio::test]
  async fn test_install_aborts_when_one_asset_fails() {
    // manifest.json is missing and answers 404
    let network = MockNetwork::new()
      .route("http://app.test/", ok("root"))
      .route("http://app.test/index.html", ok("shell"));
    let h = harness_with(network);

    assert!(h.worker.install().await.is_err());
    assert_eq!(h.worker.state(), LifecycleState::Redundant);
    assert!(h
      .worker
      .cache
      .match_request(&Request::get(url("./index.html")))
      .unwrap()
      .is_none());
    assert!(h.worker.activate().await.is_err());
  }

  #[tokio::test]
  async fn test_start_activates_immediately() {
    let h = harness();
    h.clients.observe_navigation(&url("./")).unwrap();

    h.worker.start().await.unwrap();
    assert_eq!(h.worker.state(), LifecycleState::Activated);

    let clients = h.clients.match_all().await.unwrap();
    assert_eq!(clients[0].controller.as_deref(), Some("app-v1"));
  }

  #[tokio::test]
  async fn test_install_twice_is_rejected() {
    let h = active_harness().await;
    assert!(h.worker.install().await.is_err());
    assert_eq!(h.worker.state(), LifecycleState::Activated);
  }

  #[tokio::test]
  async fn test_activate_deletes_prior_version_partitions() {
    let h = harness_with(static_network());
    for name in ["app-v0", "app-static-v0", "app-other"] {
      h.worker.cache.open(name).unwrap();
    }

    h.worker.start().await.unwrap();

    let names = h.worker.cache.keys().unwrap();
    assert_eq!(names, vec!["app-static-v1"]);
  }

  #[test]
  fn test_cleanup_with_nothing_stale() {
    let cache = CacheLayer::new(SqliteStorage::in_memory().unwrap());
    let names = CacheNames::new("app", "v1");

    assert!(delete_stale_partitions(&cache, &names).unwrap().is_empty());

    cache.open("app-dynamic-v1").unwrap();
    cache.open("app-dynamic-v1-images").unwrap();
    assert!(delete_stale_partitions(&cache, &names).unwrap().is_empty());
    assert_eq!(cache.keys().unwrap().len(), 2);
  }

  #[test]
  fn test_cleanup_when_everything_is_stale() {
    let cache = CacheLayer::new(SqliteStorage::in_memory().unwrap());
    let names = CacheNames::new("app", "v2");
    cache.open("app-v1").unwrap();
    cache.open("app-static-v1").unwrap();

    let deleted = delete_stale_partitions(&cache, &names).unwrap();
    assert_eq!(deleted, vec!["app-v1", "app-static-v1"]);
    assert!(cache.keys().unwrap().is_empty());
  }
}
