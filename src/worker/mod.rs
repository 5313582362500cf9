//! The caching agent: lifecycle, request routing and signal handling.
//!
//! A `Worker` owns the immutable configuration and its collaborators. Events
//! reach it one at a time through the `EventLoop`; anything a handler starts
//! without awaiting is registered on its `PendingSet`.

mod event;
mod fetch;
mod lifecycle;
mod message;
mod pending;
mod signals;

use color_eyre::Result;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use url::Url;

use crate::cache::{CacheLayer, CacheStorage};
use crate::clients::Clients;
use crate::config::{CacheNames, Config};
use crate::net::{Destination, Network, Request};
use crate::notify::Notifier;
use crate::sync::SyncStore;

pub use event::{EventLoop, EventSender};
pub use lifecycle::delete_stale_partitions;
pub use message::Message;

use lifecycle::LifecycleState;
use pending::PendingSet;

/// Everything outside the agent that it talks to.
#[derive(Clone)]
pub struct Collaborators {
  pub network: Arc<dyn Network>,
  pub clients: Arc<dyn Clients>,
  pub notifier: Arc<dyn Notifier>,
  pub sync_store: Arc<dyn SyncStore>,
}

/// URLs derived from the configuration once, at construction.
struct Resolved {
  origin: Url,
  static_assets: Vec<Url>,
  shell: Url,
  sync_endpoint: Url,
  notification_target: Url,
}

pub struct Worker<S: CacheStorage> {
  config: Arc<Config>,
  names: Arc<CacheNames>,
  resolved: Arc<Resolved>,
  cache: CacheLayer<S>,
  network: Arc<dyn Network>,
  clients: Arc<dyn Clients>,
  notifier: Arc<dyn Notifier>,
  sync_store: Arc<dyn SyncStore>,
  state: Arc<Mutex<LifecycleState>>,
  skip_waiting: Arc<AtomicBool>,
  pending: PendingSet,
}

impl<S: CacheStorage + 'static> Worker<S> {
  pub fn new(config: Config, storage: S, collaborators: Collaborators) -> Result<Self> {
    let resolved = Resolved {
      origin: config.origin_url()?,
      static_assets: config
        .static_assets
        .iter()
        .map(|asset| config.resolve(asset))
        .collect::<Result<_>>()?,
      shell: config.resolve(&config.shell_path)?,
      sync_endpoint: config.resolve(&config.sync.endpoint)?,
      notification_target: config.resolve(&config.notification.url)?,
    };

    Ok(Self {
      names: Arc::new(config.cache_names()),
      config: Arc::new(config),
      resolved: Arc::new(resolved),
      cache: CacheLayer::new(storage),
      network: collaborators.network,
      clients: collaborators.clients,
      notifier: collaborators.notifier,
      sync_store: collaborators.sync_store,
      state: Arc::new(Mutex::new(LifecycleState::Parsed)),
      skip_waiting: Arc::new(AtomicBool::new(false)),
      pending: PendingSet::new(),
    })
  }

  /// Wait for all background work started by handled events.
  pub async fn settle(&self) {
    self.pending.settle().await;
  }

  /// Requests for the static asset list, in configured order.
  fn static_requests(&self) -> Vec<Request> {
    self
      .resolved
      .static_assets
      .iter()
      .map(|url| Request::get(url.clone()))
      .collect()
  }

  /// Request for the offline shell document.
  fn shell_request(&self) -> Request {
    Request::get(self.resolved.shell.clone()).with_destination(Destination::Document)
  }
}

impl<S: CacheStorage> Clone for Worker<S> {
  fn clone(&self) -> Self {
    Self {
      config: Arc::clone(&self.config),
      names: Arc::clone(&self.names),
      resolved: Arc::clone(&self.resolved),
      cache: self.cache.clone(),
      network: Arc::clone(&self.network),
      clients: Arc::clone(&self.clients),
      notifier: Arc::clone(&self.notifier),
      sync_store: Arc::clone(&self.sync_store),
      state: Arc::clone(&self.state),
      skip_waiting: Arc::clone(&self.skip_waiting),
      pending: self.pending.clone(),
    }
  }
}
