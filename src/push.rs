//! Push subscription forwarding.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Browser push subscription as produced by the Push API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
  pub endpoint: String,
  pub keys: SubscriptionKeys,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
  pub p256dh: String,
  pub auth: String,
}

impl Subscription {
  /// Read a subscription from a JSON file.
  pub fn load(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read subscription {}: {}", path.display(), e))?;
    serde_json::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse subscription {}: {}", path.display(), e))
  }
}

/// Where subscriptions are delivered.
#[async_trait]
pub trait SubscriptionSink: Send + Sync {
  async fn send(&self, subscription: &Subscription) -> Result<()>;
}

/// Sink that POSTs the subscription as JSON.
pub struct HttpSubscriptionSink {
  client: reqwest::Client,
  url: Url,
}

impl HttpSubscriptionSink {
  pub fn new(url: Url, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;
    Ok(Self { client, url })
  }
}

#[async_trait]
impl SubscriptionSink for HttpSubscriptionSink {
  async fn send(&self, subscription: &Subscription) -> Result<()> {
    self
      .client
      .post(self.url.clone())
      .json(subscription)
      .send()
      .await
      .and_then(|r| r.error_for_status())
      .map_err(|e| eyre!("Failed to send subscription to {}: {}", self.url, e))?;
    Ok(())
  }
}

/// Holds a subscription until it has been delivered.
pub struct SubscriptionForwarder {
  sink: Box<dyn SubscriptionSink>,
  pending: Mutex<Option<Subscription>>,
}

impl SubscriptionForwarder {
  pub fn new(sink: Box<dyn SubscriptionSink>) -> Self {
    Self {
      sink,
      pending: Mutex::new(None),
    }
  }

  fn lock(&self) -> Result<MutexGuard<'_, Option<Subscription>>> {
    self
      .pending
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Replace any pending subscription and try to deliver it right away.
  ///
  /// Returns whether it was delivered.
  pub async fn submit(&self, subscription: Subscription) -> Result<bool> {
    *self.lock()? = Some(subscription);
    self.flush().await
  }

  /// Retry delivery of the pending subscription, if any.
  ///
  /// Returns whether something was delivered. A failure keeps it pending.
  pub async fn flush(&self) -> Result<bool> {
    // Never hold the lock across the network call.
    let Some(subscription) = self.lock()?.clone() else {
      return Ok(false);
    };

    match self.sink.send(&subscription).await {
      Ok(()) => {
        let mut pending = self.lock()?;
        // A newer submit may have replaced it while sending.
        if pending.as_ref() == Some(&subscription) {
          *pending = None;
        }
        info!(endpoint = %subscription.endpoint, "Push subscription forwarded");
        Ok(true)
      }
      Err(e) => {
        warn!(error = %e, "Push subscription kept for retry");
        Ok(false)
      }
    }
  }

  pub fn has_pending(&self) -> bool {
    self.lock().map(|p| p.is_some()).unwrap_or(false)
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::sync::Arc;

  /// Sink that can be switched between failing and succeeding.
  #[derive(Default)]
  pub(crate) struct FlakySink {
    pub(crate) down: AtomicBool,
    pub(crate) sent: AtomicUsize,
  }

  #[async_trait]
  impl SubscriptionSink for Arc<FlakySink> {
    async fn send(&self, _subscription: &Subscription) -> Result<()> {
      if self.down.load(Ordering::SeqCst) {
        return Err(eyre!("push server unreachable"));
      }
      self.sent.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }
  }

  pub(crate) fn subscription(endpoint: &str) -> Subscription {
    Subscription {
      endpoint: endpoint.to_string(),
      keys: SubscriptionKeys {
        p256dh: "BNc".to_string(),
        auth: "tBH".to_string(),
      },
    }
  }

  #[tokio::test]
  async fn test_submit_delivers_immediately() {
    let sink = Arc::new(FlakySink::default());
    let forwarder = SubscriptionForwarder::new(Box::new(Arc::clone(&sink)));

    assert!(forwarder
      .submit(subscription("https://push.example.com/a"))
      .await
      .unwrap());
    assert!(!forwarder.has_pending());
    assert_eq!(sink.sent.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_failed_delivery_is_retried_on_flush() {
    let sink = Arc::new(FlakySink::default());
    sink.down.store(true, Ordering::SeqCst);
    let forwarder = SubscriptionForwarder::new(Box::new(Arc::clone(&sink)));

    assert!(!forwarder
      .submit(subscription("https://push.example.com/a"))
      .await
      .unwrap());
    assert!(forwarder.has_pending());

    sink.down.store(false, Ordering::SeqCst);
    assert!(forwarder.flush().await.unwrap());
    assert!(!forwarder.has_pending());
    assert!(!forwarder.flush().await.unwrap());
    assert_eq!(sink.sent.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_load_subscription_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("subscription.json");
    std::fs::write(
      &path,
      r#"{"endpoint":"https://push.example.com/x","keys":{"p256dh":"BNc","auth":"tBH"}}"#,
    )
    .unwrap();

    let loaded = Subscription::load(&path).unwrap();
    assert_eq!(loaded, subscription("https://push.example.com/x"));
  }
}
