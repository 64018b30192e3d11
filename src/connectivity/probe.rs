//! HTTP reachability probe for hosts without a native connectivity API.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use super::monitor::ConnectivityMonitor;

/// Periodically checks whether a URL answers and reports the result.
///
/// Any HTTP response counts as reachable; only transport errors and timeouts
/// count as offline. When reachable the probe reports `link_type`, since it
/// cannot see the underlying interface.
#[derive(Clone)]
pub struct ReachabilityProbe {
  client: reqwest::Client,
  url: Url,
  interval: Duration,
  link_type: String,
}

impl ReachabilityProbe {
  pub fn new(url: Url, interval: Duration, timeout: Duration, link_type: &str) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create probe client: {}", e))?;

    Ok(Self {
      client,
      url,
      interval,
      link_type: link_type.to_string(),
    })
  }

  /// Issue a single probe request.
  pub async fn probe_once(&self) -> bool {
    match self.client.head(self.url.clone()).send().await {
      Ok(_) => true,
      Err(e) => {
        debug!(url = %self.url, error = %e, "Reachability probe failed");
        false
      }
    }
  }

  /// Probe once and feed the result to `monitor`.
  pub async fn report(&self, monitor: &ConnectivityMonitor) {
    let reachable = self.probe_once().await;
    let raw_type = if reachable {
      self.link_type.as_str()
    } else {
      "none"
    };
    monitor.handle_event(reachable, raw_type);
  }

  /// Probe every `interval` until `cancel` fires.
  pub async fn run(self, monitor: Arc<ConnectivityMonitor>, cancel: CancellationToken) {
    info!(url = %self.url, interval = ?self.interval, "Reachability probe started");
    let mut ticker = tokio::time::interval(self.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        _ = cancel.cancelled() => break,
        _ = ticker.tick() => self.report(&monitor).await,
      }
    }

    info!("Reachability probe stopped");
  }
}
