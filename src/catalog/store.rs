use async_trait::async_trait;
use color_eyre::Result;

use super::types::{Activity, CatalogSnapshot, Category, Download};

/// Storage collaborator behind the catalog.
///
/// Implemented by `LocalStore` (file on this machine) and `RemoteStore`
/// (hosted document database); the application picks one at startup.
#[async_trait]
pub trait CatalogStore: Send + Sync {
  async fn get_categories(&self) -> Result<Vec<Category>>;

  async fn get_downloads(&self) -> Result<Vec<Download>>;

  /// Add a catalog entry and record an `upload` activity for it.
  async fn add_download(&self, download: Download) -> Result<Download>;

  /// Append an entry to the activity timeline.
  async fn record_activity(&self, activity_type: &str, message: &str) -> Result<()>;

  /// Most recent activities, newest first.
  async fn recent_activity(&self, limit: usize) -> Result<Vec<Activity>>;

  /// Categories and downloads fetched together.
  async fn fetch_catalog_snapshot(&self) -> Result<CatalogSnapshot> {
    let (categories, downloads) = futures::try_join!(self.get_categories(), self.get_downloads())?;
    Ok(CatalogSnapshot {
      categories,
      downloads,
    })
  }
}
