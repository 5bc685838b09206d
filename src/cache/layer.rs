//! Cache layer that orchestrates cache-first lookups with network fetching.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::{CacheStorage, CachedResponse};
use super::traits::{CacheResult, RequestKey};
use crate::http::{Request, Response};

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the shell and the network client. It never
/// checks freshness: a hit is always served.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self::shared(Arc::new(storage))
  }

  /// Create a cache layer over storage that other owners also hold.
  pub fn shared(storage: Arc<S>) -> Self {
    Self { storage }
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Look up a request in a generation. Non-GET requests always miss.
  pub fn lookup(&self, generation: &str, request: &Request) -> Result<Option<CachedResponse>> {
    match RequestKey::for_request(request) {
      Some(key) => self.storage.match_request(generation, &key),
      None => Ok(None),
    }
  }

  /// Fetch a request with cache-first strategy.
  ///
  /// 1. Check the generation - on a hit, return immediately
  /// 2. On a miss, fetch from network
  /// 3. Store a copy of a cacheable response, return the original
  ///
  /// Network errors are returned to the caller untouched.
  pub async fn fetch_one<F, Fut>(
    &self,
    generation: &str,
    request: &Request,
    fetcher: F,
  ) -> Result<CacheResult<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    // Check cache first
    if let Some(cached) = self.lookup(generation, request)? {
      debug!(url = %request.url, generation, "cache hit");
      return Ok(CacheResult::from_cache(cached.response, cached.cached_at));
    }

    debug!(url = %request.url, generation, "cache miss");
    let response = fetcher().await?;

    let key = match RequestKey::for_request(request) {
      Some(key) if response.is_cacheable() => key,
      _ => return Ok(CacheResult::passthrough(response)),
    };

    // The stored copy and the returned response each get their own body handle.
    let to_cache = response.clone();
    match self.storage.put(generation, &key, &to_cache) {
      Ok(true) => debug!(url = key.url(), generation, bytes = to_cache.body.len(), "stored"),
      Ok(false) => {
        debug!(url = key.url(), generation, "generation gone, not stored");
        return Ok(CacheResult::passthrough(response));
      }
      Err(e) => warn!(url = key.url(), generation, error = %e, "failed to store response"),
    }

    Ok(CacheResult::from_network(response))
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}
