use reqwest::Method;
use url::Url;

/// What the client intends to do with the response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
  /// A navigation: the client wants an HTML document to display.
  Document,
  /// Subresources, API calls and everything else.
  #[default]
  Other,
}

/// An outgoing request as seen by the cache layer.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      destination: Destination::Other,
    }
  }

  /// A GET request for a document the client will navigate to.
  pub fn navigate(url: Url) -> Self {
    Self {
      destination: Destination::Document,
      ..Self::get(url)
    }
  }

  #[cfg(test)]
  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.destination == Destination::Document
  }

  /// Key under which the response to this request is cached (method + URL).
  pub fn cache_key(&self) -> String {
    format!("{} {}", self.method, self.url)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cache_key_includes_method() {
    let url = Url::parse("http://localhost:3000/css/style.css").unwrap();
    assert_eq!(
      Request::get(url.clone()).cache_key(),
      "GET http://localhost:3000/css/style.css"
    );
    assert_eq!(
      Request::get(url).with_method(Method::POST).cache_key(),
      "POST http://localhost:3000/css/style.css"
    );
  }

  #[test]
  fn test_navigation_flag() {
    let url = Url::parse("http://localhost:3000/").unwrap();
    assert!(Request::navigate(url.clone()).is_navigation());
    assert!(!Request::get(url).is_navigation());
  }
}
