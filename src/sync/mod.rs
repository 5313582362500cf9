//! Deferred data synchronization.
//!
//! The host queues mutations made while offline in a `SyncStore`; when a
//! sync signal arrives the queued payload is POSTed to the remote endpoint
//! and cleared on success. Nothing is retried here: a failed attempt stays
//! queued until the next signal.

mod store;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use tracing::{error, info, warn};
use url::Url;

use crate::net::{Network, Request};

pub use store::SqliteSyncStore;

/// A snapshot of everything queued at read time.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBatch {
  /// The payload sent to the remote endpoint
  pub payload: Value,
  /// Highest queue position included, so later additions survive the clear
  pub through: i64,
}

/// External store holding queued mutations.
#[async_trait]
pub trait SyncStore: Send + Sync {
  /// Everything queued so far, or None when nothing is pending.
  async fn read_pending(&self) -> Result<Option<PendingBatch>>;

  /// Drop the entries covered by `batch`.
  async fn clear_pending(&self, batch: &PendingBatch) -> Result<()>;
}

/// How a sync attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
  /// Nothing was queued
  NothingPending,
  /// Payload delivered and cleared
  Synced,
  /// Endpoint answered with a non-success status; payload kept
  Rejected(u16),
  /// Store or network failure; payload kept
  Failed(String),
}

/// Send the pending payload to `endpoint` and clear it on success.
///
/// Never returns an error: failures are logged and reported as an outcome.
pub async fn sync_pending(
  store: &dyn SyncStore,
  network: &dyn Network,
  endpoint: &Url,
) -> SyncOutcome {
  info!(%endpoint, "Syncing pending data");

  match try_sync(store, network, endpoint).await {
    Ok(outcome) => {
      match &outcome {
        SyncOutcome::Synced => info!("Data synced successfully"),
        SyncOutcome::NothingPending => info!("Nothing to sync"),
        _ => {}
      }
      outcome
    }
    Err(e) => {
      error!(error = %e, "Sync failed");
      SyncOutcome::Failed(e.to_string())
    }
  }
}

async fn try_sync(
  store: &dyn SyncStore,
  network: &dyn Network,
  endpoint: &Url,
) -> Result<SyncOutcome> {
  let Some(batch) = store.read_pending().await? else {
    return Ok(SyncOutcome::NothingPending);
  };

  let body = serde_json::to_vec(&batch.payload)
    .map_err(|e| eyre!("Failed to serialize pending payload: {}", e))?;
  let response = network
    .fetch(&Request::post_json(endpoint.clone(), body))
    .await?;

  if !response.ok() {
    warn!(status = response.status, body = %response.text(), "Sync endpoint rejected payload");
    return Ok(SyncOutcome::Rejected(response.status));
  }

  store.clear_pending(&batch).await?;
  Ok(SyncOutcome::Synced)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::mock::{ok, MockNetwork};
  use crate::net::Response;
  use serde_json::json;

  const ENDPOINT: &str = "http://a/api/vendor/sync";

  fn endpoint() -> Url {
    Url::parse(ENDPOINT).unwrap()
  }

  #[tokio::test]
  async fn test_nothing_pending_makes_no_request() {
    let store = SqliteSyncStore::in_memory().unwrap();
    let network = MockNetwork::new();

    let outcome = sync_pending(&store, &network, &endpoint()).await;
    assert_eq!(outcome, SyncOutcome::NothingPending);
    assert_eq!(network.calls(), 0);
  }

  #[tokio::test]
  async fn test_pending_payload_posted_and_cleared() {
    let store = SqliteSyncStore::in_memory().unwrap();
    store.enqueue(&json!({"vendor": 7, "name": "Acme"})).unwrap();
    let network = MockNetwork::new().route(ENDPOINT, ok("{}"));

    let outcome = sync_pending(&store, &network, &endpoint()).await;
    assert_eq!(outcome, SyncOutcome::Synced);

    let request = network.requests().pop().unwrap();
    assert_eq!(request.method, "POST");
    assert!(request
      .headers
      .iter()
      .any(|(k, v)| k == "Content-Type" && v == "application/json"));
    let sent: Value = serde_json::from_slice(request.body.as_deref().unwrap()).unwrap();
    assert_eq!(sent, json!([{"vendor": 7, "name": "Acme"}]));

    assert!(store.read_pending().await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_rejected_payload_is_kept() {
    let store = SqliteSyncStore::in_memory().unwrap();
    store.enqueue(&json!({"vendor": 1})).unwrap();
    let network =
      MockNetwork::new().route(ENDPOINT, Response::new(500, "Internal Server Error", ""));

    let outcome = sync_pending(&store, &network, &endpoint()).await;
    assert_eq!(outcome, SyncOutcome::Rejected(500));
    assert!(store.read_pending().await.unwrap().is_some());
  }

  #[tokio::test]
  async fn test_network_failure_is_swallowed() {
    let store = SqliteSyncStore::in_memory().unwrap();
    store.enqueue(&json!({"vendor": 1})).unwrap();
    let network = MockNetwork::new();
    network.set_offline(true);

    let outcome = sync_pending(&store, &network, &endpoint()).await;
    assert!(matches!(outcome, SyncOutcome::Failed(_)));
    assert!(store.read_pending().await.unwrap().is_some());
  }
}
