//! Install and activation of a cache generation.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{info, warn};

use super::manifest::StaticManifest;
use super::partition::Generation;
use super::store::ContentCache;
use crate::http::{Fetcher, Request};

/// Lifecycle of one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Installing,
  Installed,
  Activating,
  Active,
  /// Install failed; this generation must never become active
  Redundant,
}

/// Seeds the static partition and retires superseded generations.
pub struct Lifecycle {
  store: Arc<ContentCache>,
  fetcher: Arc<dyn Fetcher>,
  manifest: StaticManifest,
  generation: Generation,
  state: LifecycleState,
}

impl Lifecycle {
  pub fn new(
    store: Arc<ContentCache>,
    fetcher: Arc<dyn Fetcher>,
    manifest: StaticManifest,
    generation: Generation,
  ) -> Self {
    Self {
      store,
      fetcher,
      manifest,
      generation,
      state: LifecycleState::Installing,
    }
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  pub fn generation(&self) -> &Generation {
    &self.generation
  }

  /// Fetch every manifest asset and store them all in the static partition.
  ///
  /// Any failed fetch or non-2xx answer fails the whole install and nothing
  /// is written. Returns the number of assets stored.
  pub async fn install(&mut self) -> Result<usize> {
    self.state = LifecycleState::Installing;
    let partition = self.generation.static_partition();
    info!(partition = %partition, assets = self.manifest.len(), "Installing static assets");
    if self.manifest.is_empty() {
      warn!(partition = %partition, "Static manifest is empty; nothing will be cached offline");
    }

    let fetches = self.manifest.urls().iter().map(|url| {
      let fetcher = Arc::clone(&self.fetcher);
      let request = Request::get(url.clone());
      async move {
        let response = fetcher.fetch(&request).await?;
        if !response.is_success() {
          return Err(eyre!("{} answered with status {}", request.url, response.status));
        }
        Ok((request.cache_key(), response))
      }
    });

    let entries = match try_join_all(fetches).await {
      Ok(entries) => entries,
      Err(e) => {
        self.state = LifecycleState::Redundant;
        return Err(e.wrap_err(format!("Install of {} failed", partition)));
      }
    };

    if let Err(e) = self.store.put_all(&partition, &entries) {
      self.state = LifecycleState::Redundant;
      return Err(e.wrap_err(format!("Failed to seed {}", partition)));
    }

    self.state = LifecycleState::Installed;
    info!(partition = %partition, assets = entries.len(), "Static assets installed");
    Ok(entries.len())
  }

  /// Pick up a generation installed by an earlier run.
  ///
  /// The generation counts as installed only if every manifest asset is
  /// present in its static partition.
  pub fn recover(&mut self) -> Result<bool> {
    let partition = self.generation.static_partition();
    let mut complete = true;
    for url in self.manifest.urls() {
      let key = Request::get(url.clone()).cache_key();
      if self.store.get_in(&partition, &key)?.is_none() {
        complete = false;
        break;
      }
    }

    if complete && self.state == LifecycleState::Installing {
      self.state = LifecycleState::Installed;
    }
    Ok(complete)
  }

  /// Delete every partition that is not part of this generation, then take
  /// control of clients.
  ///
  /// Returns the deleted partitions.
  pub fn activate(&mut self) -> Result<Vec<String>> {
    if self.state != LifecycleState::Installed {
      return Err(eyre!(
        "Cannot activate version {} while {:?}",
        self.generation.version(),
        self.state
      ));
    }

    self.state = LifecycleState::Activating;
    let deleted = match self.store.delete_partitions_except(
      &self.generation.static_partition(),
      &self.generation.dynamic_partition(),
    ) {
      Ok(deleted) => deleted,
      Err(e) => {
        // Could not even list partitions; stale ones stay until the next run.
        warn!(error = %e, "Cache cleanup failed during activation");
        Vec::new()
      }
    };

    self.state = LifecycleState::Active;
    info!(version = self.generation.version(), removed = deleted.len(), "Activated; clients claimed");
    Ok(deleted)
  }

  /// Delete this application's partitions from other versions, leaving
  /// foreign partitions alone.
  pub fn clean_old_caches(&self) -> Result<Vec<String>> {
    let deleted = self
      .store
      .delete_partitions_matching(|name| {
        self.generation.owns(name) && !self.generation.is_current(name)
      })?;
    info!(removed = deleted.len(), "Old caches cleaned");
    Ok(deleted)
  }
}
