//! Messages exchanged with application contexts.

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::Worker;
use crate::cache::CacheStorage;

/// Inbound message, `{"type": "..."}` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
  /// Re-fetch the whole static asset list
  #[serde(rename = "CACHE_UPDATE")]
  CacheUpdate,
  /// Ask for the current version
  #[serde(rename = "GET_VERSION")]
  GetVersion,
}

/// Reply sent back over the message's reply channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Reply {
  Update {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
  },
  Version {
    version: String,
  },
}

impl<S: CacheStorage + 'static> Worker<S> {
  pub async fn handle_message(&self, message: Message) -> Reply {
    info!(?message, "Message received");

    match message {
      Message::GetVersion => Reply::Version {
        version: self.names.primary.clone(),
      },
      Message::CacheUpdate => match self.precache_static().await {
        Ok(()) => {
          info!("Cache updated");
          Reply::Update {
            success: true,
            error: None,
          }
        }
        Err(e) => {
          error!(error = %e, "Cache update failed");
          Reply::Update {
            success: false,
            error: Some(e.to_string()),
          }
        }
      },
    }
  }
}
