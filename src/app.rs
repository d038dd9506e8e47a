use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheLayer, ContentCache, Lifecycle, LifecycleState, StrategySelector};
use crate::catalog::{Activity, CatalogStore, Download, LocalStore, RemoteStore};
use crate::config::{Config, StorageBackend};
use crate::db;
use crate::http::{Fetcher, HttpFetcher, Request};
use crate::notify::{LogNotifier, Notifier};
use crate::offline::{
  record_offline_action, ActionLog, ActionType, ConnectivityMonitor, ConnectivityState,
  HttpProbe, Probe, SnapshotStore, SyncCoordinator, SyncSettings,
};
use crate::push::{HttpSubscriptionSink, Subscription, SubscriptionForwarder};

/// Composition root: owns the stores and wires them into each command.
pub struct App {
  config: Config,
  origin: Url,
  data_dir: PathBuf,
  cache: Arc<ContentCache>,
  fetcher: Arc<dyn Fetcher>,
  actions: Arc<ActionLog>,
  snapshots: Arc<SnapshotStore>,
  notifier: Arc<dyn Notifier>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let data_dir = db::data_dir()?;
    Self::with_data_dir(config, data_dir)
  }

  /// Build the application with all persisted state under `data_dir`.
  pub fn with_data_dir(config: Config, data_dir: PathBuf) -> Result<Self> {
    let origin = config.origin()?;
    let db_path = data_dir.join("cache.db");

    let cache = Arc::new(ContentCache::open(&db_path)?);
    let actions = Arc::new(ActionLog::open(&db_path)?);
    let snapshots = Arc::new(SnapshotStore::open(&db_path)?);
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&origin, config.network_timeout())?);

    Ok(Self {
      config,
      origin,
      data_dir,
      cache,
      fetcher,
      actions,
      snapshots,
      notifier: Arc::new(LogNotifier),
    })
  }

  #[cfg(test)]
  fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
    self.fetcher = fetcher;
    self
  }

  fn lifecycle(&self) -> Result<Lifecycle> {
    Ok(Lifecycle::new(
      Arc::clone(&self.cache),
      Arc::clone(&self.fetcher),
      self.config.manifest()?,
      self.config.generation(),
    ))
  }

  fn cache_layer(&self) -> Result<CacheLayer> {
    let selector = StrategySelector::new(self.config.cache.api_hosts.clone(), self.config.manifest()?);
    Ok(
      CacheLayer::new(
        Arc::clone(&self.cache),
        Arc::clone(&self.fetcher),
        selector,
        self.config.generation(),
        &self.origin,
      )?
      .with_network_timeout(self.config.network_timeout()),
    )
  }

  fn catalog(&self) -> Result<Arc<dyn CatalogStore>> {
    match self.config.storage.backend {
      StorageBackend::Local => {
        let path = self
          .config
          .storage
          .path
          .clone()
          .unwrap_or_else(|| self.data_dir.join("catalog.json"));
        Ok(Arc::new(LocalStore::open(&path)?))
      }
      StorageBackend::Remote => {
        let url = self
          .config
          .storage
          .database_url
          .as_deref()
          .ok_or_else(|| eyre!("storage.database_url is required for the remote backend"))?;
        Ok(Arc::new(RemoteStore::new(
          url,
          Config::database_token(),
          self.config.sync_timeout(),
        )?))
      }
    }
  }

  fn forwarder(&self) -> Result<Option<Arc<SubscriptionForwarder>>> {
    let Some(url) = &self.config.push.subscribe_url else {
      return Ok(None);
    };
    let url = Url::parse(url).map_err(|e| eyre!("Invalid push.subscribe_url '{}': {}", url, e))?;
    let sink = HttpSubscriptionSink::new(url, self.config.network_timeout())?;
    Ok(Some(Arc::new(SubscriptionForwarder::new(Box::new(sink)))))
  }

  fn coordinator(&self, initial: ConnectivityState) -> Result<SyncCoordinator> {
    let coordinator = SyncCoordinator::new(
      initial,
      Arc::clone(&self.actions),
      self.catalog()?,
      Arc::clone(&self.snapshots),
      Arc::clone(&self.notifier),
    )
    .with_settings(SyncSettings {
      action_timeout: self.config.sync_timeout(),
      retain_synced: self.config.offline.retain_synced,
    });
    Ok(coordinator)
  }

  fn probe(&self) -> Result<Arc<dyn Probe>> {
    Ok(Arc::new(HttpProbe::new(
      self.config.probe_url()?,
      self.config.network_timeout(),
    )?))
  }

  /// Seed the static partition of the configured generation.
  pub async fn install(&self) -> Result<()> {
    let mut lifecycle = self.lifecycle()?;
    let count = lifecycle.install().await?;
    println!(
      "Installed {} assets into {}",
      count,
      lifecycle.generation().static_partition()
    );
    Ok(())
  }

  /// Activate a generation installed earlier.
  pub fn activate(&self) -> Result<()> {
    let mut lifecycle = self.lifecycle()?;
    if !lifecycle.recover()? {
      return Err(eyre!(
        "Version {} is not installed; run `install` first",
        lifecycle.generation().version()
      ));
    }
    for name in lifecycle.activate()? {
      println!("Deleted {}", name);
    }
    Ok(())
  }

  pub fn clean(&self) -> Result<()> {
    let deleted = self.lifecycle()?.clean_old_caches()?;
    if deleted.is_empty() {
      println!("No old caches");
    }
    for name in deleted {
      println!("Deleted {}", name);
    }
    Ok(())
  }

  /// Answer a request through the cache layer and describe the result.
  pub async fn fetch(&self, target: &str, navigate: bool) -> Result<()> {
    let url = resolve_target(&self.origin, target)?;
    let request = if navigate {
      Request::navigate(url)
    } else {
      Request::get(url)
    };

    let layer = self.cache_layer()?;
    let strategy = layer.strategy_for(&request);
    let result = layer.handle(&request).await?;

    println!("{} {}", result.data.status, request.url);
    println!("strategy: {:?}", strategy);
    println!("source: {}", result.source);
    if let Some(cached_at) = result.cached_at {
      println!("cached at: {}", cached_at.to_rfc3339());
    }
    if let Some(content_type) = result.data.header("content-type") {
      println!("content-type: {}", content_type);
    }
    println!("{} bytes", result.data.body.len());
    Ok(())
  }

  pub fn queue_add(&self, action_type: &str, message: &str) -> Result<()> {
    let action = record_offline_action(
      &self.actions,
      self.notifier.as_ref(),
      ActionType::from(action_type),
      message,
    )?;
    println!("Queued #{} {} {}", action.id, action.action_type, action.message);
    Ok(())
  }

  pub fn queue_list(&self) -> Result<()> {
    let actions = self.actions.list_all()?;
    if actions.is_empty() {
      println!("Queue is empty");
    }
    for action in actions {
      println!(
        "#{:<5} {:<8} {:<10} {} {}",
        action.id,
        if action.synced { "synced" } else { "pending" },
        action.action_type,
        action.timestamp.format("%Y-%m-%d %H:%M:%S"),
        action.message
      );
    }
    Ok(())
  }

  pub fn queue_clear(&self) -> Result<()> {
    let removed = self.actions.clear()?;
    println!("Removed {} actions", removed);
    Ok(())
  }

  /// Print the newest entries of the activity timeline.
  pub async fn activity(&self, limit: usize) -> Result<()> {
    let activities: Vec<Activity> = self.catalog()?.recent_activity(limit).await?;
    if activities.is_empty() {
      println!("No activity");
    }
    for activity in activities {
      println!(
        "{} {:<10} {}",
        activity.time, activity.activity_type, activity.message
      );
    }
    Ok(())
  }

  /// Add a download to the catalog. Needs the network for the remote backend.
  pub async fn publish(&self, download: Download) -> Result<()> {
    let added = self.catalog()?.add_download(download).await?;
    println!("Published #{} {}", added.id, added.name);
    Ok(())
  }

  /// Replay queued actions now, if the network is reachable.
  pub async fn sync(&self) -> Result<()> {
    if self.probe()?.check().await == ConnectivityState::Offline {
      return Err(eyre!("Offline; {} actions stay queued", self.actions.pending_count()?));
    }

    let mut coordinator = self.coordinator(ConnectivityState::Offline)?;
    if let Some(forwarder) = self.forwarder()? {
      coordinator = coordinator.with_forwarder(forwarder);
    }

    let report = coordinator
      .handle_signal(ConnectivityState::Online)
      .await
      .unwrap_or_default();
    println!("Synced {} actions, {} failed", report.synced, report.failed);
    Ok(())
  }

  pub async fn status(&self) -> Result<()> {
    let state = self.probe()?.check().await;
    let coordinator = self.coordinator(state)?;
    let status = coordinator.status()?;
    let generation = self.config.generation();

    let mut lifecycle = self.lifecycle()?;
    lifecycle.recover()?;
    let installed = match lifecycle.state() {
      LifecycleState::Installed => "installed",
      _ => "not installed",
    };

    println!("connectivity: {}", if status.online { "online" } else { "offline" });
    println!("version: {} ({})", generation.version(), installed);
    for partition in self.cache.partitions()? {
      let marker = if generation.is_current(&partition) { "*" } else { " " };
      println!(
        "{} {} ({} entries)",
        marker,
        partition,
        self.cache.entry_count(&partition)?
      );
    }
    println!(
      "cached catalog: {} categories, {} downloads",
      status.cached_categories, status.cached_downloads
    );
    println!("pending actions: {}", status.pending_actions);
    Ok(())
  }

  /// Install and activate the configured generation unless a previous run did.
  async fn ensure_active(&self) -> Result<()> {
    let mut lifecycle = self.lifecycle()?;
    if !lifecycle.recover()? {
      lifecycle.install().await?;
    }
    lifecycle.activate()?;
    Ok(())
  }

  /// Install and activate the cache the first time the network is reachable.
  ///
  /// A failed attempt is retried on the next Online signal.
  async fn activate_when_online(&self, state: ConnectivityState, active: &mut bool) {
    if *active || state == ConnectivityState::Offline {
      return;
    }
    match self.ensure_active().await {
      Ok(()) => *active = true,
      Err(e) => warn!(error = %e, "Cache install failed; serving without static cache"),
    }
  }

  /// Follow connectivity until interrupted, syncing on every reconnection.
  pub async fn watch(&self, subscription: Option<&Path>) -> Result<()> {
    let probe = self.probe()?;
    let initial = probe.check().await;
    info!(?initial, "Watching connectivity");

    let mut active = false;
    self.activate_when_online(initial, &mut active).await;

    let mut coordinator = self.coordinator(initial)?;
    match (self.forwarder()?, subscription) {
      (Some(forwarder), Some(path)) => {
        forwarder.submit(Subscription::load(path)?).await?;
        coordinator = coordinator.with_forwarder(forwarder);
      }
      (Some(forwarder), None) => coordinator = coordinator.with_forwarder(forwarder),
      (None, Some(_)) => warn!("push.subscribe_url is not set; subscription ignored"),
      (None, None) => {}
    }
    coordinator.start();

    let mut monitor = ConnectivityMonitor::spawn(probe, self.config.probe_interval());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
      tokio::select! {
        signal = monitor.next() => {
          let Some(signal) = signal else { break };
          self.activate_when_online(signal, &mut active).await;
          coordinator.handle_signal(signal).await;
        }
        result = &mut shutdown => {
          result.map_err(|e| eyre!("Failed to listen for ctrl-c: {}", e))?;
          info!(state = ?coordinator.state(), "Shutting down");
          break;
        }
      }
    }

    Ok(())
  }
}

/// A target is either an absolute URL or a path on the origin.
fn resolve_target(origin: &Url, target: &str) -> Result<Url> {
  match Url::parse(target) {
    Ok(url) => Ok(url),
    Err(url::ParseError::RelativeUrlWithoutBase) => origin
      .join(target)
      .map_err(|e| eyre!("Invalid path '{}': {}", target, e)),
    Err(e) => Err(eyre!("Invalid URL '{}': {}", target, e)),
  }
}
