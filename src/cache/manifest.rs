use color_eyre::{eyre::eyre, Result};
use url::Url;

/// Fixed list of assets that make up one build of the site.
///
/// Entries are either absolute URLs (CDN assets) or paths on the
/// application's own origin.
#[derive(Debug, Clone)]
pub struct StaticManifest {
  origin: Url,
  urls: Vec<Url>,
  paths: Vec<String>,
}

impl StaticManifest {
  pub fn new(origin: Url, entries: &[String]) -> Result<Self> {
    let mut urls = Vec::with_capacity(entries.len());
    let mut paths = Vec::new();

    for entry in entries {
      if entry.starts_with('/') {
        paths.push(entry.clone());
        let url = origin
          .join(entry)
          .map_err(|e| eyre!("Invalid manifest path '{}': {}", entry, e))?;
        urls.push(url);
      } else {
        let url =
          Url::parse(entry).map_err(|e| eyre!("Invalid manifest URL '{}': {}", entry, e))?;
        urls.push(url);
      }
    }

    Ok(Self {
      origin,
      urls,
      paths,
    })
  }

  /// Absolute URLs of every asset, in manifest order.
  pub fn urls(&self) -> &[Url] {
    &self.urls
  }

  pub fn len(&self) -> usize {
    self.urls.len()
  }

  pub fn is_empty(&self) -> bool {
    self.urls.is_empty()
  }

  /// Exact match by full URL, or by path for same-origin requests.
  pub fn contains(&self, url: &Url) -> bool {
    if self.urls.iter().any(|u| u == url) {
      return true;
    }
    url.origin() == self.origin.origin() && self.paths.iter().any(|p| p == url.path())
  }
}
