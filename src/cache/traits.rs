//! Core types for the caching system.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use url::Url;

use crate::http::Request;

/// Normalised cache key for a request.
///
/// Keys are absolute URLs with the fragment removed, so `/page#top` and
/// `/page` share one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  url: Url,
}

impl RequestKey {
  pub fn new(url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self { url }
  }

  /// Key for a request, or `None` when the method is never cached.
  pub fn for_request(request: &Request) -> Option<Self> {
    request.is_get().then(|| Self::new(&request.url))
  }

  pub fn url(&self) -> &str {
    self.url.as_str()
  }

  /// SHA256 hash for stable, fixed-length storage keys
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.url.as_str().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Result from a shell fetch, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Fresh network data that was also written to the cache.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Network data that bypassed the cache.
  pub fn passthrough(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Passthrough,
      cached_at: None,
    }
  }

  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Fallback document served for a failed navigation.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::OfflineFallback,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Network response, stored in the cache
  Network,
  /// Network response, not eligible for caching or no controller
  Passthrough,
  /// Served from the controlling cache generation
  Cache,
  /// Network unavailable, serving the fallback document
  OfflineFallback,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Self::Network => "network",
      Self::Passthrough => "passthrough",
      Self::Cache => "cache",
      Self::OfflineFallback => "offline-fallback",
    };
    f.write_str(s)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_fragment_is_ignored() {
    let a = RequestKey::new(&Url::parse("https://devcard.example/index.html#about").unwrap());
    let b = RequestKey::new(&Url::parse("https://devcard.example/index.html").unwrap());
    assert_eq!(a, b);
    assert_eq!(a.cache_hash(), b.cache_hash());
    assert_eq!(a.cache_hash().len(), 64);
  }

  #[test]
  fn test_query_is_significant() {
    let a = RequestKey::new(&Url::parse("https://devcard.example/script.js?v=1").unwrap());
    let b = RequestKey::new(&Url::parse("https://devcard.example/script.js?v=2").unwrap());
    assert_ne!(a.cache_hash(), b.cache_hash());
  }

  #[test]
  fn test_non_get_has_no_key() {
    let url = Url::parse("https://devcard.example/contact").unwrap();
    assert!(RequestKey::for_request(&Request::get(url.clone())).is_some());
    assert!(RequestKey::for_request(&Request::get(url).with_method("post")).is_none());
  }
}
