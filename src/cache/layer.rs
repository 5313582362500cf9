//! Cache layer exposing named partitions over a storage backend.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;

use super::traits::{CacheStorage, CachedEntry, RequestKey};
use crate::net::{Network, Request, Response};

/// Entry point to the cache: open partitions, match across them, enumerate
/// and destroy them.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  /// Open a partition, creating it if needed.
  pub fn open(&self, name: &str) -> Result<Partition<S>> {
    self.storage.create_partition(name)?;
    Ok(Partition {
      name: name.to_string(),
      storage: Arc::clone(&self.storage),
    })
  }

  /// Find a cached response for the request in any partition.
  pub fn match_request(&self, request: &Request) -> Result<Option<CachedEntry>> {
    self.storage.match_any(&RequestKey::from_request(request))
  }

  /// Names of all partitions.
  pub fn keys(&self) -> Result<Vec<String>> {
    self.storage.partition_names()
  }

  /// Destroy a partition. Returns false if there was nothing to delete.
  pub fn delete(&self, name: &str) -> Result<bool> {
    self.storage.delete_partition(name)
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}

/// Handle to one named partition.
pub struct Partition<S: CacheStorage> {
  name: String,
  storage: Arc<S>,
}

impl<S: CacheStorage> Partition<S> {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn put(&self, request: &Request, response: &Response) -> Result<()> {
    self
      .storage
      .put(&self.name, &RequestKey::from_request(request), response)
  }

  #[allow(dead_code)]
  pub fn get(&self, request: &Request) -> Result<Option<CachedEntry>> {
    self
      .storage
      .get(&self.name, &RequestKey::from_request(request))
  }

  pub fn keys(&self) -> Result<Vec<RequestKey>> {
    self.storage.keys(&self.name)
  }

  /// Fetch every request concurrently and store the responses as one batch.
  ///
  /// Fails without writing anything if any fetch fails or comes back with a
  /// non-2xx status.
  pub async fn add_all(&self, network: &dyn Network, requests: &[Request]) -> Result<()> {
    let fetches = requests.iter().map(|request| async move {
      let response = network.fetch(request).await?;
      if !response.ok() {
        return Err(eyre!(
          "Failed to cache {}: HTTP {}",
          request.url,
          response.status
        ));
      }
      Ok((RequestKey::from_request(request), response))
    });

    let entries = try_join_all(fetches).await?;
    self.storage.put_all(&self.name, &entries)
  }
}
