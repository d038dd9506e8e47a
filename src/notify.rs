//! Notifications for whatever renders the catalog.

use tracing::info;

use crate::catalog::CatalogSnapshot;

/// Where displayed catalog data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOrigin {
  /// Fetched from the storage collaborator just now
  Live,
  /// Last snapshot saved locally
  Cached,
}

/// UI collaborator. Every call is fire-and-forget.
pub trait Notifier: Send + Sync {
  /// Show or hide the persistent offline badge.
  fn offline_indicator(&self, visible: bool);

  /// Explain offline mode; shown at most once per session.
  fn offline_notice(&self);

  /// Connection is back and `synced` queued actions were replayed.
  fn reconnected(&self, synced: usize);

  /// An action was queued for later sync.
  fn action_acknowledged(&self, message: &str);

  /// Render catalog data.
  fn display_catalog(&self, snapshot: &CatalogSnapshot, origin: DataOrigin);
}

/// Notifier that writes to the log, for headless use.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn offline_indicator(&self, visible: bool) {
    info!(visible, "Offline indicator");
  }

  fn offline_notice(&self) {
    info!("Offline mode: browsing cached data, actions will sync on reconnection");
  }

  fn reconnected(&self, synced: usize) {
    info!(synced, "Connection restored, {} action(s) synced", synced);
  }

  fn action_acknowledged(&self, message: &str) {
    info!(message, "Action saved for synchronization");
  }

  fn display_catalog(&self, snapshot: &CatalogSnapshot, origin: DataOrigin) {
    info!(
      ?origin,
      categories = snapshot.categories.len(),
      downloads = snapshot.downloads.len(),
      "Catalog updated"
    );
  }
}
