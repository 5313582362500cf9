//! Request routing: cache lookup, network fallthrough and offline fallbacks.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, warn};

use super::lifecycle::LifecycleState;
use super::Worker;
use crate::cache::CacheStorage;
use crate::net::{Destination, Request, Response};

/// Declared caching intent for a class of request.
///
/// Informational only: every intercepted GET is answered from cache when
/// possible, with documents refreshed in the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  CacheFirst,
  NetworkFirst,
}

impl Strategy {
  pub fn classify(request: &Request) -> Self {
    match request.destination {
      Destination::Image => Strategy::CacheFirst,
      Destination::Document => Strategy::NetworkFirst,
      Destination::Other if request.url.path().starts_with("/api/") => Strategy::NetworkFirst,
      Destination::Other => Strategy::CacheFirst,
    }
  }
}

impl<S: CacheStorage + 'static> Worker<S> {
  /// Answer a request the host routed through the agent.
  ///
  /// Non-GET requests, and every request before activation, go straight to
  /// the network untouched; only then can this return an error.
  pub async fn handle_fetch(&self, request: Request) -> Result<Response> {
    if !request.is_get() || self.state() != LifecycleState::Activated {
      return self.network.fetch(&request).await;
    }
    Ok(self.respond(request).await)
  }

  /// Cache, then network, then fallback. Always produces a response.
  async fn respond(&self, request: Request) -> Response {
    debug!(
      url = %request.url,
      destination = ?request.destination,
      strategy = ?Strategy::classify(&request),
      "Intercepted request"
    );

    match self.cache.match_request(&request) {
      Ok(Some(entry)) => {
        debug!(partition = %entry.partition, cached_at = %entry.cached_at, "Cache hit");
        if request.destination == Destination::Document {
          self.revalidate_in_background(request);
        }
        return entry.response;
      }
      Ok(None) => {}
      Err(e) => warn!(url = %request.url, error = %e, "Cache lookup failed, treating as miss"),
    }

    match self.network.fetch(&request).await {
      Ok(response) => {
        // Redirects, errors and anything else that is not a plain 200 pass through uncached
        if response.status != 200 {
          return response;
        }
        let partition = self.dynamic_partition_for(&request).to_string();
        self.write_in_background(partition, request, response.clone());
        response
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Network failed, serving offline fallback");
        self.offline_fallback(&request)
      }
    }
  }

  /// Partition a runtime-fetched response belongs in.
  pub fn dynamic_partition_for(&self, request: &Request) -> &str {
    if request.destination == Destination::Image {
      &self.names.dynamic_images
    } else {
      &self.names.dynamic
    }
  }

  fn offline_fallback(&self, request: &Request) -> Response {
    if request.destination != Destination::Document {
      return Response::offline();
    }

    match self.cache.match_request(&self.shell_request()) {
      Ok(Some(entry)) => entry.response,
      Ok(None) => {
        warn!(shell = %self.resolved.shell, "Offline shell missing from cache");
        Response::offline()
      }
      Err(e) => {
        warn!(error = %e, "Failed to read offline shell");
        Response::offline()
      }
    }
  }

  fn write_in_background(&self, partition: String, request: Request, response: Response) {
    let cache = self.cache.clone();
    self.pending.wait_until(async move {
      let written = cache
        .open(&partition)
        .and_then(|p| p.put(&request, &response));
      if let Err(e) = written {
        warn!(%partition, url = %request.url, error = %e, "Background cache write failed");
      }
    });
  }

  /// Refetch a document and, on a 200, refresh its copy in the static partition.
  fn revalidate_in_background(&self, request: Request) {
    let network = Arc::clone(&self.network);
    let cache = self.cache.clone();
    let partition = self.names.static_name.clone();

    self.pending.wait_until(async move {
      match network.fetch(&request).await {
        Ok(response) if response.status == 200 => {
          let written = cache
            .open(&partition)
            .and_then(|p| p.put(&request, &response));
          if let Err(e) = written {
            warn!(url = %request.url, error = %e, "Background cache update failed");
          }
        }
        Ok(response) => {
          debug!(url = %request.url, status = response.status, "Background refresh not cached");
        }
        Err(e) => warn!(url = %request.url, error = %e, "Background cache update failed"),
      }
    });
  }
}
