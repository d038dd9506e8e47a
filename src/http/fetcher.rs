use async_trait::async_trait;
use reqwest::header::HeaderMap;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use url::{Origin, Url};

use super::request::Request;
use super::response::{CachedResponse, ResponseKind};

/// Network seam for the cache layer.
#[async_trait]
pub trait Fetcher: Send + Sync {
  /// Perform the request and read the whole response.
  ///
  /// Transport failures are errors; HTTP error statuses are not.
  async fn fetch(&self, request: &Request) -> Result<CachedResponse>;
}

/// Fetcher backed by reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  origin: Origin,
}

impl HttpFetcher {
  /// Create a fetcher for an application served from `origin`.
  ///
  /// Responses from that origin are `Basic`; all others are `Cors`.
  pub fn new(origin: &Url, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("catalog-sw/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin: origin.origin(),
    })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<CachedResponse> {
    let response = self
      .client
      .request(request.method.clone(), request.url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = header_pairs(response.headers());

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?
      .to_vec();

    let kind = if request.url.origin() == self.origin {
      ResponseKind::Basic
    } else {
      ResponseKind::Cors
    };

    Ok(CachedResponse {
      status,
      headers,
      body,
      kind,
    })
  }
}

/// Copy every header. Values that are not visible ASCII (UTF-8 filenames in
/// `content-disposition`, for one) are decoded lossily instead of dropped.
fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
  headers
    .iter()
    .map(|(name, value)| {
      (
        name.as_str().to_string(),
        String::from_utf8_lossy(value.as_bytes()).into_owned(),
      )
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::header::HeaderValue;

  #[test]
  fn test_header_pairs_keep_non_ascii_values() {
    let mut headers = HeaderMap::new();
    headers.insert("content-type", HeaderValue::from_static("application/pdf"));
    headers.insert(
      "content-disposition",
      HeaderValue::from_bytes("attachment; filename=\"résumé.pdf\"".as_bytes()).unwrap(),
    );

    let pairs = header_pairs(&headers);
    assert_eq!(pairs.len(), 2);
    assert!(pairs.contains(&(
      "content-disposition".to_string(),
      "attachment; filename=\"résumé.pdf\"".to_string()
    )));
    assert!(pairs.contains(&("content-type".to_string(), "application/pdf".to_string())));
  }
}
