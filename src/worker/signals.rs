//! Handlers for sync, push and notification-click signals.

use chrono::Utc;
use color_eyre::Result;
use tracing::{debug, info};

use super::Worker;
use crate::cache::CacheStorage;
use crate::clients::ClientInfo;
use crate::notify::{NotificationOptions, ACTION_OPEN};
use crate::sync::{sync_pending, SyncOutcome};

/// What a notification click led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  /// An existing same-origin client was focused
  Focused(ClientInfo),
  /// No client matched; a new one was opened
  Opened(ClientInfo),
  /// Any other action: the notification just closes
  Dismissed,
}

impl<S: CacheStorage + 'static> Worker<S> {
  /// Run a sync for `tag`. Tags other than the configured one are ignored
  /// and yield None.
  pub async fn handle_sync(&self, tag: &str) -> Option<SyncOutcome> {
    info!(tag, "Background sync");
    if tag != self.config.sync.tag {
      debug!(tag, "Ignoring unrecognized sync tag");
      return None;
    }

    Some(
      sync_pending(
        self.sync_store.as_ref(),
        self.network.as_ref(),
        &self.resolved.sync_endpoint,
      )
      .await,
    )
  }

  /// Show a notification for a push carrying optional plain text.
  pub async fn handle_push(&self, text: Option<&str>) -> Result<()> {
    info!("Push received");
    let options = NotificationOptions::for_push(&self.config.notification, text, Utc::now());
    self
      .notifier
      .show(&self.config.notification.title, &options)
      .await
  }

  /// Close the notification and, for the open action, bring the app forward.
  pub async fn handle_notification_click(&self, action: Option<&str>) -> Result<ClickOutcome> {
    info!(action, "Notification clicked");

    if action != Some(ACTION_OPEN) {
      return Ok(ClickOutcome::Dismissed);
    }

    let origin = self.resolved.origin.origin();
    let clients = self.clients.match_all().await?;
    if let Some(client) = clients.iter().find(|c| c.url.origin() == origin) {
      let focused = self.clients.focus(&client.id).await?;
      return Ok(ClickOutcome::Focused(focused));
    }

    let opened = self
      .clients
      .open_window(&self.resolved.notification_target)
      .await?;
    Ok(ClickOutcome::Opened(opened))
  }
}

#[cfg(test)]
mod tests {
  use super::super::testing::{active_harness, url};
  use super::*;
  use crate::clients::Clients;
  use crate::net::mock::ok;
  use serde_json::json;
  use url::Url;

  #[tokio::test]
  async fn test_unrecognized_sync_tag_is_ignored() {
    let h = active_harness().await;
    h.sync_store.enqueue(&json!({"vendor": 1})).unwrap();
    let calls_before = h.network.calls();

    assert_eq!(h.worker.handle_sync("other-sync").await, None);
    assert_eq!(h.network.calls(), calls_before);
  }

  #[tokio::test]
  async fn test_recognized_sync_tag_posts_to_endpoint() {
    let h = active_harness().await;
    h.network
      .set_route("http://app.test/api/vendor/sync", ok("{}"));
    h.sync_store.enqueue(&json!({"vendor": 1})).unwrap();

    let outcome = h.worker.handle_sync("vendor-data-sync").await;
    assert_eq!(outcome, Some(SyncOutcome::Synced));

    let posted = h.network.requests().pop().unwrap();
    assert_eq!(posted.url.as_str(), "http://app.test/api/vendor/sync");
  }

  #[tokio::test]
  async fn test_push_shows_notification() {
    let h = active_harness().await;
    h.worker.handle_push(Some("Stock low")).await.unwrap();
    h.worker.handle_push(None).await.unwrap();

    let shown = h.notifier.shown.lock().unwrap();
    assert_eq!(shown.len(), 2);
    assert_eq!(shown[0].0, "Wavemart VMS");
    assert_eq!(shown[0].1.body, "Stock low");
    assert_eq!(shown[1].1.body, "New vendor system notification");
  }

  #[tokio::test]
  async fn test_open_focuses_same_origin_client() {
    let h = active_harness().await;
    h.clients
      .observe_navigation(&Url::parse("http://elsewhere.test/").unwrap())
      .unwrap();
    let ours = h.clients.observe_navigation(&url("/orders")).unwrap();

    match h.worker.handle_notification_click(Some("open")).await.unwrap() {
      ClickOutcome::Focused(client) => assert_eq!(client.id, ours.id),
      other => panic!("unexpected outcome {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_open_without_client_opens_root() {
    let h = active_harness().await;

    match h.worker.handle_notification_click(Some("open")).await.unwrap() {
      ClickOutcome::Opened(client) => assert_eq!(client.url.as_str(), "http://app.test/"),
      other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(h.clients.match_all().await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_close_and_body_clicks_dismiss() {
    let h = active_harness().await;
    h.clients.observe_navigation(&url("/")).unwrap();

    for action in [Some("close"), None] {
      let outcome = h.worker.handle_notification_click(action).await.unwrap();
      assert_eq!(outcome, ClickOutcome::Dismissed);
    }
    let clients = h.clients.match_all().await.unwrap();
    assert!(clients.iter().all(|c| !c.focused));
  }
}
