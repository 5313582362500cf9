//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use sha2::{Digest, Sha256};

use crate::net::{Request, Response};

/// Normalized identity of a cached request: method plus absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: &str, url: &str) -> Self {
    Self {
      method: method.to_ascii_uppercase(),
      url: url.to_string(),
    }
  }

  pub fn from_request(request: &Request) -> Self {
    Self::new(&request.method, request.url.as_str())
  }

  /// SHA256 of `METHOD url`, used as the stable storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A response snapshot stored in a partition.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub partition: String,
  pub key: RequestKey,
  pub response: Response,
  /// When the snapshot was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for partitioned cache storage backends.
///
/// Writing a key that already exists in a partition replaces the entry.
pub trait CacheStorage: Send + Sync {
  /// Create the partition if it does not exist yet.
  fn create_partition(&self, name: &str) -> Result<()>;

  /// Names of every partition, in creation order.
  fn partition_names(&self) -> Result<Vec<String>>;

  /// Destroy a partition and all of its entries. Returns false if it did not exist.
  fn delete_partition(&self, name: &str) -> Result<bool>;

  /// Store one entry, creating the partition lazily.
  fn put(&self, partition: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Store a batch in a single transaction: either every entry lands or none does.
  fn put_all(&self, partition: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Look up a key in one partition.
  fn get(&self, partition: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Look up a key across every partition; the most recent write wins.
  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Keys stored in a partition, in write order.
  fn keys(&self, partition: &str) -> Result<Vec<RequestKey>>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_key_hash_is_stable_and_method_sensitive() {
    let get = RequestKey::new("get", "http://localhost/index.html");
    let again = RequestKey::new("GET", "http://localhost/index.html");
    let head = RequestKey::new("HEAD", "http://localhost/index.html");

    assert_eq!(get, again);
    assert_eq!(get.cache_hash(), again.cache_hash());
    assert_ne!(get.cache_hash(), head.cache_hash());
    assert_eq!(get.cache_hash().len(), 64);
  }
}
