//! Notification descriptors and the display seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::Serialize;
use tracing::info;

use crate::config::NotificationConfig;

/// Action id that focuses or opens the app.
pub const ACTION_OPEN: &str = "open";
/// Action id that just dismisses.
pub const ACTION_CLOSE: &str = "close";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  pub icon: String,
}

/// Navigation target and creation time carried with a notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationData {
  pub url: String,
  /// Milliseconds since the Unix epoch
  pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationOptions {
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub data: NotificationData,
  pub actions: Vec<NotificationAction>,
}

impl NotificationOptions {
  /// Build the descriptor for a push. `text` is the raw push payload, used
  /// verbatim as the body; without one the configured default body is used.
  pub fn for_push(config: &NotificationConfig, text: Option<&str>, now: DateTime<Utc>) -> Self {
    let action = |id: &str, title: &str| NotificationAction {
      action: id.to_string(),
      title: title.to_string(),
      icon: config.badge.clone(),
    };

    Self {
      body: text.unwrap_or(config.default_body.as_str()).to_string(),
      icon: config.icon.clone(),
      badge: config.badge.clone(),
      vibrate: config.vibrate.clone(),
      data: NotificationData {
        url: config.url.clone(),
        timestamp: now.timestamp_millis(),
      },
      actions: vec![action(ACTION_OPEN, "Open App"), action(ACTION_CLOSE, "Close")],
    }
  }
}

/// Something that can put a notification in front of the user.
#[async_trait]
pub trait Notifier: Send + Sync {
  async fn show(&self, title: &str, options: &NotificationOptions) -> Result<()>;
}

/// Notifier that writes notifications to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
  async fn show(&self, title: &str, options: &NotificationOptions) -> Result<()> {
    let descriptor = serde_json::to_string(options)?;
    info!(title, body = %options.body, %descriptor, "Notification");
    Ok(())
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn test_push_text_becomes_body() {
    let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
    let options =
      NotificationOptions::for_push(&NotificationConfig::default(), Some("Order shipped"), now);

    assert_eq!(options.body, "Order shipped");
    assert_eq!(options.data.timestamp, 1_700_000_000_000);
    assert_eq!(options.data.url, "./");
    assert_eq!(options.vibrate, vec![200, 100, 200]);
  }

  #[test]
  fn test_default_body_and_actions() {
    let options = NotificationOptions::for_push(&NotificationConfig::default(), None, Utc::now());

    assert_eq!(options.body, "New vendor system notification");
    assert_eq!(options.icon, "./icons/icon-192x192.png");
    assert_eq!(options.badge, "./icons/icon-96x96.png");
    let ids: Vec<&str> = options.actions.iter().map(|a| a.action.as_str()).collect();
    assert_eq!(ids, vec![ACTION_OPEN, ACTION_CLOSE]);
  }

  #[test]
  fn test_descriptor_serializes_expected_fields() {
    let options = NotificationOptions::for_push(&NotificationConfig::default(), None, Utc::now());
    let json = serde_json::to_value(&options).unwrap();

    assert!(json["vibrate"].is_array());
    assert!(json["data"]["timestamp"].is_i64());
    assert_eq!(json["actions"][1]["title"], "Close");
  }
}
