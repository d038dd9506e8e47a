//! Reconnection handling: replays queued actions and refreshes the catalog.

use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::action_log::{ActionLog, ActionType, OfflineAction};
use super::connectivity::ConnectivityState;
use super::snapshot::SnapshotStore;
use crate::catalog::{CatalogStore, Category, Download};
use crate::notify::{DataOrigin, Notifier};
use crate::push::SubscriptionForwarder;

#[derive(Debug, Clone)]
pub struct SyncSettings {
  /// Bound on each remote call made while syncing
  pub action_timeout: Duration,
  /// Synced actions kept after a drain
  pub retain_synced: usize,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      action_timeout: Duration::from_secs(10),
      retain_synced: 20,
    }
  }
}

/// Outcome of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
  pub synced: usize,
  pub failed: usize,
}

/// What is available offline right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineStatus {
  pub online: bool,
  pub cached_categories: usize,
  pub cached_downloads: usize,
  pub pending_actions: usize,
}

/// Reacts to connectivity changes.
pub struct SyncCoordinator {
  state: ConnectivityState,
  log: Arc<ActionLog>,
  catalog: Arc<dyn CatalogStore>,
  snapshots: Arc<SnapshotStore>,
  notifier: Arc<dyn Notifier>,
  forwarder: Option<Arc<SubscriptionForwarder>>,
  settings: SyncSettings,
  notice_shown: bool,
}

impl SyncCoordinator {
  pub fn new(
    initial: ConnectivityState,
    log: Arc<ActionLog>,
    catalog: Arc<dyn CatalogStore>,
    snapshots: Arc<SnapshotStore>,
    notifier: Arc<dyn Notifier>,
  ) -> Self {
    Self {
      state: initial,
      log,
      catalog,
      snapshots,
      notifier,
      forwarder: None,
      settings: SyncSettings::default(),
      notice_shown: false,
    }
  }

  pub fn with_settings(mut self, settings: SyncSettings) -> Self {
    self.settings = settings;
    self
  }

  pub fn with_forwarder(mut self, forwarder: Arc<SubscriptionForwarder>) -> Self {
    self.forwarder = Some(forwarder);
    self
  }

  pub fn state(&self) -> ConnectivityState {
    self.state
  }

  /// React to a connectivity signal.
  ///
  /// Every Online signal drains the log, even when already online. Returns
  /// the drain report when one ran.
  pub async fn handle_signal(&mut self, signal: ConnectivityState) -> Option<SyncReport> {
    match (self.state, signal) {
      (_, ConnectivityState::Online) => Some(self.reconnect().await),
      (ConnectivityState::Online, ConnectivityState::Offline) => {
        self.go_offline();
        None
      }
      (ConnectivityState::Offline, ConnectivityState::Offline) => {
        debug!("Already offline");
        None
      }
    }
  }

  /// Show the offline UI right away when starting without a network.
  pub fn start(&mut self) {
    if self.state == ConnectivityState::Offline {
      self.go_offline();
    }
  }

  async fn reconnect(&mut self) -> SyncReport {
    self.state = ConnectivityState::Online;
    self.notifier.offline_indicator(false);

    let report = match self.drain().await {
      Ok(report) => report,
      Err(e) => {
        warn!(error = %e, "Could not read offline actions");
        SyncReport::default()
      }
    };

    self.refresh_catalog().await;

    if let Some(forwarder) = self.forwarder.as_ref().filter(|f| f.has_pending()) {
      if let Err(e) = forwarder.flush().await {
        warn!(error = %e, "Push subscription retry failed");
      }
    }

    self.notifier.reconnected(report.synced);

    match self.log.prune_synced(self.settings.retain_synced) {
      Ok(0) => {}
      Ok(pruned) => debug!(pruned, "Pruned synced actions"),
      Err(e) => warn!(error = %e, "Could not prune offline actions"),
    }

    info!(synced = report.synced, failed = report.failed, "Back online");
    report
  }

  fn go_offline(&mut self) {
    self.state = ConnectivityState::Offline;
    self.notifier.offline_indicator(true);

    if !self.notice_shown {
      self.notifier.offline_notice();
      self.notice_shown = true;
    }

    match self.snapshots.load_snapshot() {
      Ok(Some(snapshot)) => self.notifier.display_catalog(&snapshot, DataOrigin::Cached),
      Ok(None) => debug!("No cached catalog to display"),
      Err(e) => warn!(error = %e, "Could not load cached catalog"),
    }
    info!("Offline");
  }

  /// Replay unsynced actions in order, one at a time.
  ///
  /// A failed or timed out action stays unsynced and does not stop the
  /// ones after it. Delivery is at-least-once: an action whose remote call
  /// succeeded but could not be marked is sent again next time.
  pub async fn drain(&self) -> Result<SyncReport> {
    let pending = self.log.list_unsynced()?;
    let mut report = SyncReport::default();

    for action in pending {
      if self.replay(&action).await {
        report.synced += 1;
      } else {
        report.failed += 1;
      }
    }

    Ok(report)
  }

  async fn replay(&self, action: &OfflineAction) -> bool {
    let call = self
      .catalog
      .record_activity(action.action_type.as_str(), &action.message);

    match timeout(self.settings.action_timeout, call).await {
      Ok(Ok(())) => match self.log.mark_synced(action.id) {
        Ok(()) => {
          debug!(id = action.id, "Offline action synced");
          true
        }
        Err(e) => {
          warn!(id = action.id, error = %e, "Action sent but not marked synced");
          false
        }
      },
      Ok(Err(e)) => {
        warn!(id = action.id, error = %e, "Failed to sync offline action");
        false
      }
      Err(_) => {
        warn!(id = action.id, timeout = ?self.settings.action_timeout, "Offline action sync timed out");
        false
      }
    }
  }

  async fn refresh_catalog(&self) {
    let fetched = timeout(
      self.settings.action_timeout,
      self.catalog.fetch_catalog_snapshot(),
    )
    .await;

    let snapshot = match fetched {
      Ok(Ok(snapshot)) => snapshot,
      Ok(Err(e)) => {
        warn!(error = %e, "Catalog refresh failed");
        return;
      }
      Err(_) => {
        warn!("Catalog refresh timed out");
        return;
      }
    };

    if let Err(e) = self.snapshots.store_snapshot(&snapshot) {
      warn!(error = %e, "Could not store catalog snapshot");
    }
    self.notifier.display_catalog(&snapshot, DataOrigin::Live);
  }

  pub fn status(&self) -> Result<OfflineStatus> {
    Ok(OfflineStatus {
      online: self.state == ConnectivityState::Online,
      cached_categories: self.snapshots.count::<Category>()?,
      cached_downloads: self.snapshots.count::<Download>()?,
      pending_actions: self.log.pending_count()?,
    })
  }
}

/// Queue a user action for the next sync and acknowledge it.
///
/// Needs only the log, so queuing works while the catalog is unreachable.
pub fn record_offline_action(
  log: &ActionLog,
  notifier: &dyn Notifier,
  action_type: ActionType,
  message: &str,
) -> Result<OfflineAction> {
  let action = log.append(action_type, message)?;
  notifier.action_acknowledged(message);
  Ok(action)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::catalog::{Activity, CatalogSnapshot};
  use crate::push::tests::{subscription, FlakySink};
  use async_trait::async_trait;
  use color_eyre::eyre::eyre;
  use std::collections::HashSet;
  use std::sync::atomic::Ordering;
  use std::sync::Mutex;

  /// Catalog that records activity calls.
  #[derive(Default)]
  struct FakeCatalog {
    recorded: Mutex<Vec<(String, String)>>,
    rejected: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    unreachable: Mutex<bool>,
  }

  impl FakeCatalog {
    fn recorded(&self) -> Vec<(String, String)> {
      self.recorded.lock().unwrap().clone()
    }

    fn reject(&self, message: &str) {
      self.rejected.lock().unwrap().insert(message.to_string());
    }
  }

  #[async_trait]
  impl CatalogStore for FakeCatalog {
    async fn get_categories(&self) -> Result<Vec<Category>> {
      if *self.unreachable.lock().unwrap() {
        return Err(eyre!("catalog unreachable"));
      }
      Ok(vec![serde_json::from_value(
        serde_json::json!({ "id": 1, "name": "Jeux" }),
      )?])
    }

    async fn get_downloads(&self) -> Result<Vec<Download>> {
      Ok(vec![serde_json::from_value(
        serde_json::json!({ "id": 1, "name": "Minecraft" }),
      )?])
    }

    async fn add_download(&self, download: Download) -> Result<Download> {
      Ok(download)
    }

    async fn record_activity(&self, activity_type: &str, message: &str) -> Result<()> {
      let delay = *self.delay.lock().unwrap();
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }
      if self.rejected.lock().unwrap().contains(message) {
        return Err(eyre!("rejected"));
      }
      self
        .recorded
        .lock()
        .unwrap()
        .push((activity_type.to_string(), message.to_string()));
      Ok(())
    }

    async fn recent_activity(&self, _limit: usize) -> Result<Vec<Activity>> {
      Ok(Vec::new())
    }
  }

  #[derive(Debug, Clone, PartialEq)]
  enum Event {
    Indicator(bool),
    Notice,
    Reconnected(usize),
    Acknowledged(String),
    Catalog(DataOrigin, usize),
  }

  #[derive(Default)]
  struct RecordingNotifier {
    events: Mutex<Vec<Event>>,
  }

  impl RecordingNotifier {
    fn events(&self) -> Vec<Event> {
      self.events.lock().unwrap().clone()
    }

    fn push(&self, event: Event) {
      self.events.lock().unwrap().push(event);
    }
  }

  impl Notifier for RecordingNotifier {
    fn offline_indicator(&self, visible: bool) {
      self.push(Event::Indicator(visible));
    }

    fn offline_notice(&self) {
      self.push(Event::Notice);
    }

    fn reconnected(&self, synced: usize) {
      self.push(Event::Reconnected(synced));
    }

    fn action_acknowledged(&self, message: &str) {
      self.push(Event::Acknowledged(message.to_string()));
    }

    fn display_catalog(&self, snapshot: &CatalogSnapshot, origin: DataOrigin) {
      self.push(Event::Catalog(origin, snapshot.downloads.len()));
    }
  }

  struct Harness {
    coordinator: SyncCoordinator,
    log: Arc<ActionLog>,
    catalog: Arc<FakeCatalog>,
    snapshots: Arc<SnapshotStore>,
    notifier: Arc<RecordingNotifier>,
  }

  fn harness(initial: ConnectivityState) -> Harness {
    let log = Arc::new(ActionLog::in_memory().unwrap());
    let catalog = Arc::new(FakeCatalog::default());
    let snapshots = Arc::new(SnapshotStore::in_memory().unwrap());
    let notifier = Arc::new(RecordingNotifier::default());
    let coordinator = SyncCoordinator::new(
      initial,
      Arc::clone(&log),
      catalog.clone(),
      Arc::clone(&snapshots),
      notifier.clone(),
    );
    Harness {
      coordinator,
      log,
      catalog,
      snapshots,
      notifier,
    }
  }

  #[tokio::test]
  async fn test_reconnect_replays_three_actions_in_order() {
    let mut h = harness(ConnectivityState::Offline);
    for (kind, message) in [
      (ActionType::Download, "VLC"),
      (ActionType::Download, "GIMP"),
      (ActionType::Search, "editor"),
    ] {
      record_offline_action(&h.log, &*h.notifier, kind, message).unwrap();
    }

    let report = h
      .coordinator
      .handle_signal(ConnectivityState::Online)
      .await
      .unwrap();

    assert_eq!(report, SyncReport { synced: 3, failed: 0 });
    assert_eq!(
      h.catalog.recorded(),
      vec![
        ("download".to_string(), "VLC".to_string()),
        ("download".to_string(), "GIMP".to_string()),
        ("search".to_string(), "editor".to_string()),
      ]
    );
    assert!(h.log.list_all().unwrap().iter().all(|a| a.synced));
    assert_eq!(h.coordinator.state(), ConnectivityState::Online);
  }

  #[tokio::test]
  async fn test_n_actions_make_n_calls() {
    let mut h = harness(ConnectivityState::Offline);
    for i in 0..7 {
      record_offline_action(
        &h.log,
        &*h.notifier,
        ActionType::Download,
        &format!("item {}", i),
      )
      .unwrap();
    }

    h.coordinator.handle_signal(ConnectivityState::Online).await;

    let messages: Vec<String> = h.catalog.recorded().into_iter().map(|(_, m)| m).collect();
    let expected: Vec<String> = (0..7).map(|i| format!("item {}", i)).collect();
    assert_eq!(messages, expected);
    assert_eq!(h.log.pending_count().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_redundant_online_makes_no_calls() {
    let mut h = harness(ConnectivityState::Offline);
    record_offline_action(&h.log, &*h.notifier, ActionType::Download, "VLC").unwrap();
    h.coordinator.handle_signal(ConnectivityState::Online).await;
    assert_eq!(h.catalog.recorded().len(), 1);

    let report = h
      .coordinator
      .handle_signal(ConnectivityState::Online)
      .await
      .unwrap();
    assert_eq!(report, SyncReport::default());
    assert_eq!(h.catalog.recorded().len(), 1);
  }

  #[tokio::test]
  async fn test_failed_action_stays_queued_without_blocking_others() {
    let mut h = harness(ConnectivityState::Offline);
    for message in ["first", "broken", "third"] {
      record_offline_action(&h.log, &*h.notifier, ActionType::Download, message).unwrap();
    }
    h.catalog.reject("broken");

    let report = h
      .coordinator
      .handle_signal(ConnectivityState::Online)
      .await
      .unwrap();
    assert_eq!(report, SyncReport { synced: 2, failed: 1 });

    let pending = h.log.list_unsynced().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].message, "broken");

    h.catalog.rejected.lock().unwrap().clear();
    let retry = h
      .coordinator
      .handle_signal(ConnectivityState::Online)
      .await
      .unwrap();
    assert_eq!(retry.synced, 1);
  }

  #[tokio::test]
  async fn test_slow_remote_times_out() {
    let h = harness(ConnectivityState::Offline);
    let mut coordinator = h.coordinator.with_settings(SyncSettings {
      action_timeout: Duration::from_millis(20),
      retain_synced: 20,
    });
    record_offline_action(&h.log, &*h.notifier, ActionType::Search, "slow").unwrap();
    *h.catalog.delay.lock().unwrap() = Some(Duration::from_secs(5));

    let report = coordinator
      .handle_signal(ConnectivityState::Online)
      .await
      .unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(h.log.pending_count().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_reconnect_refreshes_snapshot_and_notifies() {
    let mut h = harness(ConnectivityState::Offline);
    record_offline_action(&h.log, &*h.notifier, ActionType::Download, "VLC").unwrap();
    h.coordinator.handle_signal(ConnectivityState::Online).await;

    assert_eq!(
      h.notifier.events(),
      vec![
        Event::Acknowledged("VLC".to_string()),
        Event::Indicator(false),
        Event::Catalog(DataOrigin::Live, 1),
        Event::Reconnected(1),
      ]
    );
    assert!(h.snapshots.load_snapshot().unwrap().is_some());
  }

  #[tokio::test]
  async fn test_catalog_refresh_failure_still_reports_sync() {
    let mut h = harness(ConnectivityState::Offline);
    *h.catalog.unreachable.lock().unwrap() = true;
    h.coordinator.handle_signal(ConnectivityState::Online).await;

    assert_eq!(
      h.notifier.events(),
      vec![Event::Indicator(false), Event::Reconnected(0)]
    );
    assert!(h.snapshots.load_snapshot().unwrap().is_none());
  }

  #[tokio::test]
  async fn test_offline_notice_shown_once() {
    let mut h = harness(ConnectivityState::Online);
    h.coordinator.handle_signal(ConnectivityState::Offline).await;
    h.coordinator.handle_signal(ConnectivityState::Offline).await;
    h.coordinator.handle_signal(ConnectivityState::Online).await;
    h.coordinator.handle_signal(ConnectivityState::Offline).await;

    let events = h.notifier.events();
    assert_eq!(events.iter().filter(|e| **e == Event::Notice).count(), 1);
    assert_eq!(
      events
        .iter()
        .filter(|e| **e == Event::Indicator(true))
        .count(),
      2
    );
  }

  #[tokio::test]
  async fn test_going_offline_displays_cached_catalog() {
    let mut h = harness(ConnectivityState::Online);
    h.coordinator.handle_signal(ConnectivityState::Online).await;
    h.coordinator.handle_signal(ConnectivityState::Offline).await;

    assert_eq!(
      h.notifier.events().last(),
      Some(&Event::Catalog(DataOrigin::Cached, 1))
    );
  }

  #[tokio::test]
  async fn test_pending_subscription_sent_on_reconnect() {
    let h = harness(ConnectivityState::Offline);
    let sink = Arc::new(FlakySink::default());
    sink.down.store(true, Ordering::SeqCst);
    let forwarder = Arc::new(SubscriptionForwarder::new(Box::new(Arc::clone(&sink))));
    forwarder
      .submit(subscription("https://push.example.com/a"))
      .await
      .unwrap();
    assert!(forwarder.has_pending());

    let mut coordinator = h.coordinator.with_forwarder(Arc::clone(&forwarder));
    sink.down.store(false, Ordering::SeqCst);
    coordinator.handle_signal(ConnectivityState::Online).await;

    assert!(!forwarder.has_pending());
    assert_eq!(sink.sent.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_synced_actions_pruned_after_drain() {
    let h = harness(ConnectivityState::Offline);
    let mut coordinator = h.coordinator.with_settings(SyncSettings {
      action_timeout: Duration::from_secs(1),
      retain_synced: 2,
    });
    for i in 0..5 {
      record_offline_action(
        &h.log,
        &*h.notifier,
        ActionType::Download,
        &format!("a{}", i),
      )
      .unwrap();
    }
    h.catalog.reject("a0");

    coordinator.handle_signal(ConnectivityState::Online).await;

    let kept: Vec<String> = h
      .log
      .list_all()
      .unwrap()
      .into_iter()
      .map(|a| a.message)
      .collect();
    assert_eq!(kept, vec!["a0", "a3", "a4"]);
  }

  #[tokio::test]
  async fn test_status_counts() {
    let mut h = harness(ConnectivityState::Offline);
    h.coordinator.handle_signal(ConnectivityState::Online).await;
    record_offline_action(&h.log, &*h.notifier, ActionType::Search, "later").unwrap();

    assert_eq!(
      h.coordinator.status().unwrap(),
      OfflineStatus {
        online: true,
        cached_categories: 1,
        cached_downloads: 1,
        pending_actions: 1,
      }
    );
  }

  #[tokio::test]
  async fn test_start_offline_shows_offline_ui() {
    let mut h = harness(ConnectivityState::Offline);
    h.coordinator.start();
    assert_eq!(
      h.notifier.events(),
      vec![Event::Indicator(true), Event::Notice]
    );

    h.coordinator.handle_signal(ConnectivityState::Online).await;
    assert_eq!(h.coordinator.state(), ConnectivityState::Online);
  }

  #[tokio::test]
  async fn test_start_online_is_quiet() {
    let mut h = harness(ConnectivityState::Online);
    h.coordinator.start();
    assert!(h.notifier.events().is_empty());
  }

  #[test]
  fn test_record_offline_action_acknowledges() {
    let h = harness(ConnectivityState::Offline);
    let action =
      record_offline_action(&h.log, &*h.notifier, ActionType::Upload, "report.pdf").unwrap();

    assert_eq!(action.action_type, ActionType::Upload);
    assert!(!action.synced);
    assert_eq!(
      h.notifier.events(),
      vec![Event::Acknowledged("report.pdf".to_string())]
    );
  }
}
