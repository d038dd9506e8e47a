use async_trait::async_trait;
use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::store::CatalogStore;
use super::types::{Activity, Category, Download};

/// Catalog hosted in a Firebase Realtime Database, reached over its REST API.
///
/// Collections live at `{base}/{name}.json`; pushing to a collection
/// returns the generated key as `{"name": "<key>"}`.
#[derive(Clone)]
pub struct RemoteStore {
  client: reqwest::Client,
  base: Url,
  token: Option<String>,
}

impl RemoteStore {
  pub fn new(base: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
    // Url::join replaces the last segment unless the base ends with a slash.
    let base = if base.ends_with('/') {
      base.to_string()
    } else {
      format!("{}/", base)
    };
    let base = Url::parse(&base).map_err(|e| eyre!("Invalid database URL '{}': {}", base, e))?;

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      client,
      base,
      token,
    })
  }

  fn collection_url(&self, name: &str) -> Result<Url> {
    let mut url = self
      .base
      .join(&format!("{}.json", name))
      .map_err(|e| eyre!("Invalid collection '{}': {}", name, e))?;
    if let Some(token) = &self.token {
      url.query_pairs_mut().append_pair("auth", token);
    }
    Ok(url)
  }

  async fn get_collection<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
    let url = self.collection_url(name)?;
    let response = self
      .client
      .get(url)
      .send()
      .await
      .and_then(|r| r.error_for_status())
      .map_err(|e| eyre!("Failed to get {}: {}", name, e))?;

    let value: Value = response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse {}: {}", name, e))?;

    parse_collection(value).map_err(|e| eyre!("Failed to parse {}: {}", name, e))
  }

  async fn push<T: serde::Serialize + Sync>(&self, name: &str, document: &T) -> Result<String> {
    let url = self.collection_url(name)?;
    let response: Value = self
      .client
      .post(url)
      .json(document)
      .send()
      .await
      .and_then(|r| r.error_for_status())
      .map_err(|e| eyre!("Failed to write to {}: {}", name, e))?
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse push response from {}: {}", name, e))?;

    response
      .get("name")
      .and_then(Value::as_str)
      .map(String::from)
      .ok_or_else(|| eyre!("Push to {} returned no key", name))
  }
}

/// A collection comes back as `null` (empty), an object keyed by document
/// id, or an array when ids are small integers.
fn parse_collection<T: DeserializeOwned>(value: Value) -> serde_json::Result<Vec<T>> {
  let documents: Vec<Value> = match value {
    Value::Null => Vec::new(),
    Value::Object(map) => map
      .into_iter()
      .map(|(key, mut doc)| {
        if let Value::Object(fields) = &mut doc {
          fields.entry("id").or_insert(Value::String(key));
        }
        doc
      })
      .collect(),
    Value::Array(items) => items
      .into_iter()
      .enumerate()
      .filter(|(_, doc)| !doc.is_null())
      .map(|(index, mut doc)| {
        if let Value::Object(fields) = &mut doc {
          fields.entry("id").or_insert(Value::from(index));
        }
        doc
      })
      .collect(),
    other => vec![other],
  };

  documents.into_iter().map(serde_json::from_value).collect()
}

#[async_trait]
impl CatalogStore for RemoteStore {
  async fn get_categories(&self) -> Result<Vec<Category>> {
    self.get_collection("categories").await
  }

  async fn get_downloads(&self) -> Result<Vec<Download>> {
    let mut downloads: Vec<Download> = self.get_collection("downloads").await?;
    downloads.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(downloads)
  }

  async fn add_download(&self, mut download: Download) -> Result<Download> {
    if download.date_added.is_none() {
      download.date_added = Some(Utc::now().to_rfc3339());
    }
    download.id = self.push("downloads", &download).await?;

    let activity = Activity {
      activity_type: "upload".to_string(),
      message: format!("{} was added to the catalog", download.name),
      time: Utc::now().to_rfc3339(),
      download_id: Some(download.id.clone()),
    };
    self.push("activities", &activity).await?;

    debug!(id = %download.id, name = %download.name, "Download added remotely");
    Ok(download)
  }

  async fn record_activity(&self, activity_type: &str, message: &str) -> Result<()> {
    let activity = Activity {
      activity_type: activity_type.to_string(),
      message: message.to_string(),
      time: Utc::now().to_rfc3339(),
      download_id: None,
    };
    self.push("activities", &activity).await?;
    Ok(())
  }

  async fn recent_activity(&self, limit: usize) -> Result<Vec<Activity>> {
    let mut activities: Vec<Activity> = self.get_collection("activities").await?;
    // RFC 3339 timestamps in UTC sort lexicographically.
    activities.sort_by(|a, b| b.time.cmp(&a.time));
    activities.truncate(limit);
    Ok(activities)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_keyed_collection_injects_ids() {
    let value = json!({
      "-Nb1": { "name": "VLC" },
      "-Nb2": { "name": "GIMP", "id": "custom" }
    });
    let mut downloads: Vec<Download> = parse_collection(value).unwrap();
    downloads.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(downloads[0].id, "custom");
    assert_eq!(downloads[1].id, "-Nb1");
  }

  #[test]
  fn test_parse_array_collection_skips_holes() {
    let value = json!([null, { "name": "Jeux" }, { "name": "Outils" }]);
    let categories: Vec<Category> = parse_collection(value).unwrap();
    assert_eq!(categories.len(), 2);
    assert_eq!(categories[0].id, "1");
    assert_eq!(categories[1].id, "2");
  }

  #[test]
  fn test_parse_null_collection_is_empty() {
    let categories: Vec<Category> = parse_collection(Value::Null).unwrap();
    assert!(categories.is_empty());
  }

  #[test]
  fn test_collection_url_with_token() {
    let store = RemoteStore::new(
      "https://demo-default-rtdb.firebaseio.com",
      Some("secret".to_string()),
      Duration::from_secs(5),
    )
    .unwrap();
    assert_eq!(
      store.collection_url("activities").unwrap().as_str(),
      "https://demo-default-rtdb.firebaseio.com/activities.json?auth=secret"
    );
  }

  #[test]
  fn test_collection_url_keeps_base_path() {
    let store =
      RemoteStore::new("https://db.example.com/catalog", None, Duration::from_secs(5)).unwrap();
    assert_eq!(
      store.collection_url("downloads").unwrap().as_str(),
      "https://db.example.com/catalog/downloads.json"
    );
  }
}
