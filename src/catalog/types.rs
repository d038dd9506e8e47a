use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::cache::Cacheable;

/// Catalog category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
  #[serde(default, deserialize_with = "deserialize_id")]
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub icon: Option<String>,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub count: u64,
}

/// Downloadable catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Download {
  #[serde(default, deserialize_with = "deserialize_id")]
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub category: String,
  #[serde(default, deserialize_with = "deserialize_optional_id")]
  pub category_id: Option<String>,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub url: String,
  #[serde(default)]
  pub version: Option<String>,
  #[serde(default)]
  pub size: Option<String>,
  #[serde(default)]
  pub downloads: u64,
  #[serde(default)]
  pub image: Option<String>,
  #[serde(default)]
  pub date_added: Option<String>,
  #[serde(default)]
  pub featured: bool,
}

/// Entry of the activity timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
  #[serde(rename = "type")]
  pub activity_type: String,
  pub message: String,
  /// RFC 3339 timestamp
  pub time: String,
  #[serde(default, deserialize_with = "deserialize_optional_id")]
  pub download_id: Option<String>,
}

/// Everything needed to render the catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
  pub categories: Vec<Category>,
  pub downloads: Vec<Download>,
}

/// Document stores hand out numeric ids (local) or string keys (remote).
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(deserialize_optional_id(deserializer)?.unwrap_or_default())
}

fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  match Value::deserialize(deserializer)? {
    Value::Null => Ok(None),
    Value::String(s) => Ok(Some(s)),
    Value::Number(n) => Ok(Some(n.to_string())),
    other => Err(serde::de::Error::custom(format!(
      "expected string or number id, got {}",
      other
    ))),
  }
}

// ============================================================================
// Cacheable implementations
// ============================================================================

impl Cacheable for Category {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "category"
  }
}

impl Cacheable for Download {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "download"
  }
}
