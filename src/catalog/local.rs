use async_trait::async_trait;
use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::store::CatalogStore;
use super::types::{Activity, Category, Download};

/// Activities kept in the local timeline; older ones are evicted.
const ACTIVITY_LIMIT: usize = 100;

#[derive(Debug, Default, Serialize, Deserialize)]
struct LocalDocument {
  #[serde(default)]
  categories: Vec<Category>,
  #[serde(default)]
  downloads: Vec<Download>,
  /// Newest first
  #[serde(default)]
  activities: VecDeque<Activity>,
}

/// Catalog kept in a JSON document on this machine.
pub struct LocalStore {
  path: Option<PathBuf>,
  doc: Mutex<LocalDocument>,
}

impl LocalStore {
  /// Open the document at `path`, starting empty if it does not exist yet.
  pub fn open(path: &Path) -> Result<Self> {
    let doc = if path.exists() {
      let contents = std::fs::read_to_string(path)
        .map_err(|e| eyre!("Failed to read catalog {}: {}", path.display(), e))?;
      serde_json::from_str(&contents)
        .map_err(|e| eyre!("Failed to parse catalog {}: {}", path.display(), e))?
    } else {
      LocalDocument::default()
    };

    Ok(Self {
      path: Some(path.to_path_buf()),
      doc: Mutex::new(doc),
    })
  }

  /// A store that is never written to disk.
  #[cfg(test)]
  pub fn in_memory(categories: Vec<Category>, downloads: Vec<Download>) -> Self {
    Self {
      path: None,
      doc: Mutex::new(LocalDocument {
        categories,
        downloads,
        activities: VecDeque::new(),
      }),
    }
  }

  fn lock(&self) -> Result<MutexGuard<'_, LocalDocument>> {
    self.doc.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn persist(&self, doc: &LocalDocument) -> Result<()> {
    let Some(path) = &self.path else {
      return Ok(());
    };

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create catalog directory: {}", e))?;
    }

    let contents =
      serde_json::to_string_pretty(doc).map_err(|e| eyre!("Failed to serialize catalog: {}", e))?;

    // Replace atomically: write a sibling file, then rename over.
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)
      .map_err(|e| eyre!("Failed to write catalog {}: {}", tmp.display(), e))?;
    std::fs::rename(&tmp, path)
      .map_err(|e| eyre!("Failed to replace catalog {}: {}", path.display(), e))?;

    Ok(())
  }
}

fn push_activity(doc: &mut LocalDocument, activity_type: &str, message: &str, id: Option<String>) {
  doc.activities.push_front(Activity {
    activity_type: activity_type.to_string(),
    message: message.to_string(),
    time: Utc::now().to_rfc3339(),
    download_id: id,
  });
  doc.activities.truncate(ACTIVITY_LIMIT);
}

#[async_trait]
impl CatalogStore for LocalStore {
  async fn get_categories(&self) -> Result<Vec<Category>> {
    Ok(self.lock()?.categories.clone())
  }

  async fn get_downloads(&self) -> Result<Vec<Download>> {
    Ok(self.lock()?.downloads.clone())
  }

  async fn add_download(&self, mut download: Download) -> Result<Download> {
    let mut doc = self.lock()?;

    let next_id = doc
      .downloads
      .iter()
      .filter_map(|d| d.id.parse::<u64>().ok())
      .max()
      .unwrap_or(0)
      + 1;
    download.id = next_id.to_string();
    if download.date_added.is_none() {
      download.date_added = Some(Utc::now().to_rfc3339());
    }

    doc.downloads.push(download.clone());
    let message = format!("{} was added to the catalog", download.name);
    push_activity(&mut doc, "upload", &message, Some(download.id.clone()));
    self.persist(&doc)?;

    debug!(id = %download.id, name = %download.name, "Download added locally");
    Ok(download)
  }

  async fn record_activity(&self, activity_type: &str, message: &str) -> Result<()> {
    let mut doc = self.lock()?;
    push_activity(&mut doc, activity_type, message, None);
    self.persist(&doc)
  }

  async fn recent_activity(&self, limit: usize) -> Result<Vec<Activity>> {
    Ok(self.lock()?.activities.iter().take(limit).cloned().collect())
  }
}
