use reqwest::Method;

use super::manifest::StaticManifest;
use crate::http::Request;

/// How a request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Serve from cache, fetch and store only on a miss.
  CacheFirst,
  /// Fetch, store on success, fall back to cache or an offline answer.
  NetworkFirst,
  /// Serve from cache immediately and refresh in the background.
  StaleWhileRevalidate,
  /// Not cacheable at all (non-GET).
  NetworkOnly,
}

/// Classifies requests. First match wins:
///
/// 1. API host (exact or subdomain) -> network-first
/// 2. static manifest entry -> cache-first
/// 3. navigation -> network-first
/// 4. anything else -> stale-while-revalidate
#[derive(Debug, Clone)]
pub struct StrategySelector {
  api_hosts: Vec<String>,
  manifest: StaticManifest,
}

impl StrategySelector {
  pub fn new(api_hosts: Vec<String>, manifest: StaticManifest) -> Self {
    let api_hosts = api_hosts
      .into_iter()
      .map(|h| h.trim().trim_start_matches('.').to_lowercase())
      .filter(|h| !h.is_empty())
      .collect();
    Self {
      api_hosts,
      manifest,
    }
  }

  pub fn select(&self, request: &Request) -> Strategy {
    if request.method != Method::GET {
      return Strategy::NetworkOnly;
    }

    if self.is_api_request(request) {
      Strategy::NetworkFirst
    } else if self.manifest.contains(&request.url) {
      Strategy::CacheFirst
    } else if request.is_navigation() {
      Strategy::NetworkFirst
    } else {
      Strategy::StaleWhileRevalidate
    }
  }

  fn is_api_request(&self, request: &Request) -> bool {
    let Some(host) = request.url.host_str() else {
      return false;
    };
    let host = host.to_lowercase();

    self.api_hosts.iter().any(|api| {
      host == *api
        || host
          .strip_suffix(api.as_str())
          .is_some_and(|rest| rest.ends_with('.'))
    })
  }
}
