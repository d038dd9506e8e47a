//! Cache layer that answers requests from the network, the cache, or both.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::partition::Generation;
use super::store::{CacheEntry, ContentCache};
use super::strategy::{Strategy, StrategySelector};
use super::traits::CacheResult;
use crate::http::{CachedResponse, Fetcher, Request};

/// Cache layer that manages caching strategies and network fetching.
///
/// This layer sits between the application and the network, choosing a
/// strategy per request and keeping the content cache up to date.
pub struct CacheLayer {
  store: Arc<ContentCache>,
  fetcher: Arc<dyn Fetcher>,
  selector: StrategySelector,
  generation: Generation,
  /// Upper bound on a network-first fetch before falling back to cache
  network_timeout: Duration,
  /// Keys tried, in order, when a navigation has nothing else to fall back on
  root_documents: Vec<String>,
}

impl CacheLayer {
  pub fn new(
    store: Arc<ContentCache>,
    fetcher: Arc<dyn Fetcher>,
    selector: StrategySelector,
    generation: Generation,
    origin: &Url,
  ) -> Result<Self> {
    let root_documents = ["/index.html", "/"]
      .iter()
      .map(|path| {
        origin
          .join(path)
          .map(|url| Request::get(url).cache_key())
          .map_err(|e| eyre!("Invalid origin {}: {}", origin, e))
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(Self {
      store,
      fetcher,
      selector,
      generation,
      network_timeout: Duration::from_secs(8),
      root_documents,
    })
  }

  /// Set the timeout for network-first fetches.
  pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
    self.network_timeout = timeout;
    self
  }

  pub fn strategy_for(&self, request: &Request) -> Strategy {
    self.selector.select(request)
  }

  /// Answer a request with the strategy its classification calls for.
  pub async fn handle(&self, request: &Request) -> Result<CacheResult<CachedResponse>> {
    let strategy = self.selector.select(request);
    debug!(url = %request.url, method = %request.method, ?strategy, "Handling request");

    match strategy {
      Strategy::NetworkOnly => self
        .fetcher
        .fetch(request)
        .await
        .map(CacheResult::passthrough),
      Strategy::CacheFirst => self.cache_first(request).await,
      Strategy::NetworkFirst => Ok(self.network_first(request).await),
      Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
    }
  }

  /// Cache-first strategy.
  ///
  /// 1. Cached entry present - return it
  /// 2. Otherwise fetch; network errors propagate
  /// 3. Store 200 same-origin responses in the static partition
  pub async fn cache_first(&self, request: &Request) -> Result<CacheResult<CachedResponse>> {
    let key = request.cache_key();

    if let Some(entry) = self.lookup(&key) {
      return Ok(CacheResult::from_cache(entry.response, entry.inserted_at));
    }

    let response = self.fetcher.fetch(request).await?;
    if response.is_cacheable_static() {
      self.write(&key, &response, &self.generation.static_partition());
    }

    Ok(CacheResult::from_network(response))
  }

  /// Network-first strategy.
  ///
  /// 1. Fetch (bounded by the network timeout); a 200 is stored in the
  ///    dynamic partition and returned
  /// 2. On failure, timeout or any other status, return the cached entry
  /// 3. Navigations fall back to the cached root document
  /// 4. Otherwise synthesize a 503
  pub async fn network_first(&self, request: &Request) -> CacheResult<CachedResponse> {
    let key = request.cache_key();

    match tokio::time::timeout(self.network_timeout, self.fetcher.fetch(request)).await {
      Ok(Ok(response)) if response.status == 200 => {
        if response.is_cacheable_dynamic() {
          self.write(&key, &response, &self.generation.dynamic_partition());
        }
        return CacheResult::from_network(response);
      }
      Ok(Ok(response)) => {
        debug!(url = %request.url, status = response.status, "Network answered with an error status");
      }
      Ok(Err(e)) => {
        debug!(url = %request.url, error = %e, "Network request failed");
      }
      Err(_) => {
        warn!(url = %request.url, timeout = ?self.network_timeout, "Network request timed out");
      }
    }

    if let Some(entry) = self.lookup(&key) {
      return CacheResult::fallback(entry.response, entry.inserted_at);
    }

    if request.is_navigation() {
      if let Some(entry) = self.root_documents.iter().find_map(|root| self.lookup(root)) {
        return CacheResult::fallback(entry.response, entry.inserted_at);
      }
    }

    CacheResult::offline(CachedResponse::offline())
  }

  /// Stale-while-revalidate strategy.
  ///
  /// A refresh is always started in the background. A cached entry is
  /// returned without waiting for it; without one, the caller gets the
  /// refresh's own result (or error).
  pub async fn stale_while_revalidate(
    &self,
    request: &Request,
  ) -> Result<CacheResult<CachedResponse>> {
    let key = request.cache_key();
    let cached = self.lookup(&key);

    let store = Arc::clone(&self.store);
    let fetcher = Arc::clone(&self.fetcher);
    let partition = self.generation.dynamic_partition();
    let background = request.clone();

    let refresh = tokio::spawn(async move {
      match fetcher.fetch(&background).await {
        Ok(response) => {
          if response.is_cacheable_dynamic() {
            if let Err(e) = store.put(&background.cache_key(), &response, &partition) {
              warn!(url = %background.url, error = %e, "Failed to store revalidated response");
            }
          }
          Ok(response)
        }
        Err(e) => {
          debug!(url = %background.url, error = %e, "Background revalidation failed");
          Err(e)
        }
      }
    });

    match cached {
      Some(entry) => Ok(CacheResult::from_cache(entry.response, entry.inserted_at)),
      None => {
        let response = refresh
          .await
          .map_err(|e| eyre!("Revalidation task failed: {}", e))??;
        Ok(CacheResult::from_network(response))
      }
    }
  }

  /// Cache read that degrades to a miss on local-store errors.
  fn lookup(&self, key: &str) -> Option<CacheEntry> {
    match self.store.get(key) {
      Ok(Some(entry)) => {
        debug!(key, partition = %entry.partition, "Cache hit");
        Some(entry)
      }
      Ok(None) => None,
      Err(e) => {
        warn!(key, error = %e, "Cache read failed, treating as miss");
        None
      }
    }
  }

  /// Cache write that is skipped on local-store errors.
  fn write(&self, key: &str, response: &CachedResponse, partition: &str) {
    if let Err(e) = self.store.put(key, response, partition) {
      warn!(key, partition, error = %e, "Cache write failed, skipping");
    }
  }
}
