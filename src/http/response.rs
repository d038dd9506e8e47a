use serde::{Deserialize, Serialize};

/// How the response relates to the application's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
  /// Same-origin response
  Basic,
  /// Cross-origin response whose contents are readable
  Cors,
  /// Cross-origin response whose contents cannot be inspected
  Opaque,
}

impl ResponseKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "basic" => Some(Self::Basic),
      "cors" => Some(Self::Cors),
      "opaque" => Some(Self::Opaque),
      _ => None,
    }
  }
}

/// A fully-read HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub kind: ResponseKind,
}

impl CachedResponse {
  pub fn new(status: u16, kind: ResponseKind, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
      kind,
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Synthesized answer for requests that can be served neither by the
  /// network nor by the cache.
  pub fn offline() -> Self {
    Self::new(503, ResponseKind::Basic, "Offline content not available")
      .with_header("content-type", "text/plain; charset=utf-8")
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Eligible for the static partition: 200 from our own origin.
  pub fn is_cacheable_static(&self) -> bool {
    self.status == 200 && self.kind == ResponseKind::Basic
  }

  /// Eligible for the dynamic partition: any readable 200.
  pub fn is_cacheable_dynamic(&self) -> bool {
    self.status == 200 && self.kind != ResponseKind::Opaque
  }

  /// First header value with the given name (case-insensitive).
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_offline_response() {
    let response = CachedResponse::offline();
    assert_eq!(response.status, 503);
    assert_eq!(response.header("Content-Type"), Some("text/plain; charset=utf-8"));
    assert_eq!(response.body, b"Offline content not available");
  }

  #[test]
  fn test_cacheability() {
    assert!(CachedResponse::new(200, ResponseKind::Basic, "ok").is_cacheable_static());
    assert!(!CachedResponse::new(200, ResponseKind::Cors, "ok").is_cacheable_static());
    assert!(CachedResponse::new(200, ResponseKind::Cors, "ok").is_cacheable_dynamic());
    assert!(!CachedResponse::new(200, ResponseKind::Opaque, "").is_cacheable_dynamic());
    assert!(!CachedResponse::new(404, ResponseKind::Basic, "missing").is_cacheable_static());
    assert!(!CachedResponse::new(204, ResponseKind::Basic, "").is_cacheable_dynamic());
  }

  #[test]
  fn test_kind_parse() {
    for kind in [ResponseKind::Basic, ResponseKind::Cors, ResponseKind::Opaque] {
      assert_eq!(ResponseKind::parse(kind.as_str()), Some(kind));
    }
    assert_eq!(ResponseKind::parse("error"), None);
  }
}
