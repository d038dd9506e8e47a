//! Scriptable fetcher for tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::{CachedResponse, Fetcher, Request};

#[derive(Default)]
pub struct FakeFetcher {
  routes: Mutex<HashMap<String, CachedResponse>>,
  calls: Mutex<Vec<String>>,
  delay: Mutex<Duration>,
}

impl FakeFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Answer requests for `url` with `response`. Unrouted URLs fail.
  pub fn respond(&self, url: &str, response: CachedResponse) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  /// Make requests for `url` fail like an unreachable network.
  pub fn fail(&self, url: &str) {
    self.routes.lock().unwrap().remove(url);
  }

  /// Delay every answer.
  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = delay;
  }

  pub fn calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Fetcher for FakeFetcher {
  async fn fetch(&self, request: &Request) -> Result<CachedResponse> {
    self.calls.lock().unwrap().push(request.url.to_string());

    let delay = *self.delay.lock().unwrap();
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }

    let route = self.routes.lock().unwrap().get(request.url.as_str()).cloned();
    route.ok_or_else(|| eyre!("network unreachable: {}", request.url))
  }
}
