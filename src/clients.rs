//! Open application contexts (pages/windows) the agent can control.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::sync::Mutex;
use tracing::{debug, info};
use url::Url;

/// One open application context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
  pub id: String,
  pub url: Url,
  pub focused: bool,
  /// Version of the worker controlling this context, if any
  pub controller: Option<String>,
}

/// Access to the application contexts the host has open.
#[async_trait]
pub trait Clients: Send + Sync {
  /// Every open context, controlled or not.
  async fn match_all(&self) -> Result<Vec<ClientInfo>>;

  async fn focus(&self, id: &str) -> Result<ClientInfo>;

  /// Open a new context at `url`.
  async fn open_window(&self, url: &Url) -> Result<ClientInfo>;

  /// Take control of every open context. Returns how many changed controller.
  async fn claim(&self, controller: &str) -> Result<usize>;
}

/// In-memory registry of contexts, fed by the navigations the agent sees.
#[derive(Default)]
pub struct ClientRegistry {
  clients: Mutex<Vec<ClientInfo>>,
  next_id: Mutex<u64>,
}

impl ClientRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record a navigation. A URL that is already open is not registered twice.
  pub fn observe_navigation(&self, url: &Url) -> Result<ClientInfo> {
    let mut clients = self.lock()?;
    if let Some(existing) = clients.iter().find(|c| &c.url == url) {
      return Ok(existing.clone());
    }

    let client = ClientInfo {
      id: self.allocate_id()?,
      url: url.clone(),
      focused: false,
      controller: None,
    };
    debug!(id = %client.id, url = %client.url, "Registered client");
    clients.push(client.clone());

    Ok(client)
  }

  fn allocate_id(&self) -> Result<String> {
    let mut next = self
      .next_id
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *next += 1;
    Ok(format!("client-{}", *next))
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<ClientInfo>>> {
    self.clients.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

#[async_trait]
impl Clients for ClientRegistry {
  async fn match_all(&self) -> Result<Vec<ClientInfo>> {
    Ok(self.lock()?.clone())
  }

  async fn focus(&self, id: &str) -> Result<ClientInfo> {
    let mut clients = self.lock()?;
    if !clients.iter().any(|c| c.id == id) {
      return Err(eyre!("No client with id {}", id));
    }

    let mut focused = None;
    for client in clients.iter_mut() {
      client.focused = client.id == id;
      if client.focused {
        focused = Some(client.clone());
      }
    }
    info!(id, "Focused client");

    focused.ok_or_else(|| eyre!("No client with id {}", id))
  }

  async fn open_window(&self, url: &Url) -> Result<ClientInfo> {
    let client = ClientInfo {
      id: self.allocate_id()?,
      url: url.clone(),
      focused: true,
      controller: None,
    };

    let mut clients = self.lock()?;
    for other in clients.iter_mut() {
      other.focused = false;
    }
    clients.push(client.clone());
    info!(id = %client.id, url = %client.url, "Opened window");

    Ok(client)
  }

  async fn claim(&self, controller: &str) -> Result<usize> {
    let mut clients = self.lock()?;
    let mut claimed = 0;
    for client in clients.iter_mut() {
      if client.controller.as_deref() != Some(controller) {
        client.controller = Some(controller.to_string());
        claimed += 1;
      }
    }
    Ok(claimed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[tokio::test]
  async fn test_navigation_registers_once() {
    let registry = ClientRegistry::new();
    let first = registry.observe_navigation(&url("http://a/")).unwrap();
    let again = registry.observe_navigation(&url("http://a/")).unwrap();
    registry.observe_navigation(&url("http://a/orders")).unwrap();

    assert_eq!(first.id, again.id);
    assert_eq!(registry.match_all().await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_claim_controls_existing_clients() {
    let registry = ClientRegistry::new();
    registry.observe_navigation(&url("http://a/")).unwrap();
    registry.observe_navigation(&url("http://a/b")).unwrap();

    assert_eq!(registry.claim("app-v2").await.unwrap(), 2);
    let clients = registry.match_all().await.unwrap();
    assert!(clients
      .iter()
      .all(|c| c.controller.as_deref() == Some("app-v2")));
  }

  #[tokio::test]
  async fn test_focus_is_exclusive() {
    let registry = ClientRegistry::new();
    let a = registry.observe_navigation(&url("http://a/")).unwrap();
    let b = registry.open_window(&url("http://a/b")).await.unwrap();
    assert!(b.focused);

    registry.focus(&a.id).await.unwrap();
    let clients = registry.match_all().await.unwrap();
    assert!(clients.iter().find(|c| c.id == a.id).unwrap().focused);
    assert!(!clients.iter().find(|c| c.id == b.id).unwrap().focused);
    assert!(registry.focus("client-99").await.is_err());
  }
}
