//! Scripted network used by unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::client::Network;
use super::types::{Request, Response};

/// Network double that answers from a route table and counts calls.
///
/// Unknown URLs get a 404. When offline, every fetch fails. A gate, when
/// set, holds every fetch until it is released.
#[derive(Default)]
pub struct MockNetwork {
  routes: Mutex<HashMap<String, Response>>,
  calls: AtomicUsize,
  requests: Mutex<Vec<Request>>,
  offline: AtomicBool,
  gate: Option<Arc<Notify>>,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn gated(gate: Arc<Notify>) -> Self {
    Self {
      gate: Some(gate),
      ..Self::default()
    }
  }

  pub fn route(self, url: &str, response: Response) -> Self {
    self.set_route(url, response);
    self
  }

  pub fn set_route(&self, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }
}

#[async_trait]
impl Network for MockNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.requests.lock().unwrap().push(request.clone());

    if let Some(gate) = &self.gate {
      gate.notified().await;
    }
    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("network unreachable: {}", request.url));
    }

    let routes = self.routes.lock().unwrap();
    Ok(
      routes
        .get(request.url.as_str())
        .cloned()
        .unwrap_or_else(|| Response::new(404, "Not Found", "")),
    )
  }
}

/// A 200 response with the given body.
pub fn ok(body: &str) -> Response {
  Response::new(200, "OK", body)
}
