//! Online/offline detection.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

/// Connectivity as seen by the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
  Online,
  Offline,
}

/// One connectivity check.
#[async_trait]
pub trait Probe: Send + Sync {
  async fn check(&self) -> ConnectivityState;
}

/// Probe that sends a HEAD request.
///
/// Any HTTP answer, even an error status, means the network is reachable.
pub struct HttpProbe {
  client: reqwest::Client,
  url: Url,
}

impl HttpProbe {
  pub fn new(url: Url, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;
    Ok(Self { client, url })
  }
}

#[async_trait]
impl Probe for HttpProbe {
  async fn check(&self) -> ConnectivityState {
    match self.client.head(self.url.clone()).send().await {
      Ok(_) => ConnectivityState::Online,
      Err(e) => {
        debug!(url = %self.url, error = %e, "Connectivity probe failed");
        ConnectivityState::Offline
      }
    }
  }
}

/// Shortest time between two connectivity checks.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Periodically probes connectivity and reports changes.
pub struct ConnectivityMonitor {
  rx: mpsc::UnboundedReceiver<ConnectivityState>,
}

impl ConnectivityMonitor {
  /// Start probing every `interval`.
  ///
  /// The first result is always sent; after that only transitions are.
  /// Intervals shorter than `MIN_INTERVAL` are raised to it.
  pub fn spawn(probe: Arc<dyn Probe>, interval: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    let interval = interval.max(MIN_INTERVAL);

    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      let mut last = None;

      loop {
        ticker.tick().await;
        let state = probe.check().await;
        if last == Some(state) {
          continue;
        }
        last = Some(state);
        debug!(?state, "Connectivity changed");
        if tx.send(state).is_err() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Receive the next state change
  pub async fn next(&mut self) -> Option<ConnectivityState> {
    self.rx.recv().await
  }
}
