//! Readiness probing.
//!
//! Blocks until the service accepts TCP connections and answers a liveness
//! query. A refused connection is the expected state while the service is
//! starting and is retried on the next tick.

use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::{About, InventoryService};
use crate::consts::READINESS_TICK;
use crate::poll::deadline_after;

#[derive(Debug, Error)]
pub enum ReadinessError {
  #[error("service at {addr} not ready after {waited:?} ({attempts} attempt(s))")]
  Timeout {
    addr: String,
    waited: Duration,
    attempts: usize,
  },
}

/// Probe for a single `host:port`.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
  addr: String,
  tick: Duration,
}

impl ReadinessProbe {
  pub fn new(addr: impl Into<String>) -> Self {
    Self {
      addr: addr.into(),
      tick: READINESS_TICK,
    }
  }

  /// Override the probe period.
  pub fn with_tick(mut self, tick: Duration) -> Self {
    self.tick = tick;
    self
  }

  pub fn addr(&self) -> &str {
    &self.addr
  }

  /// Wait until the service is reachable and answers `about`, or `timeout` elapses.
  ///
  /// The first attempt happens one tick after the call. Returns as soon as an
  /// attempt succeeds.
  pub async fn wait_until_ready(
    &self,
    service: &dyn InventoryService,
    timeout: Duration,
  ) -> Result<About, ReadinessError> {
    let start = Instant::now();
    let mut attempts = 0;

    let outcome = time::timeout_at(deadline_after(timeout), self.probe(service, &mut attempts)).await;
    match outcome {
      Ok(about) => {
        info!(
          addr = %self.addr,
          version = %about.version,
          elapsed = ?start.elapsed(),
          "service is ready"
        );
        Ok(about)
      }
      Err(_) => Err(ReadinessError::Timeout {
        addr: self.addr.clone(),
        waited: start.elapsed(),
        attempts,
      }),
    }
  }

  async fn probe(&self, service: &dyn InventoryService, attempts: &mut usize) -> About {
    let mut ticker = time::interval_at(Instant::now() + self.tick, self.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      ticker.tick().await;
      *attempts += 1;

      match TcpStream::connect(&self.addr).await {
        Ok(stream) => drop(stream),
        Err(e) => {
          warn!(addr = %self.addr, error = %e, "failed to establish tcp connection");
          continue;
        }
      }

      match service.about().await {
        Ok(about) => return about,
        Err(e) => {
          warn!(addr = %self.addr, error = %e, "liveness query failed");
          debug!(attempt = *attempts, "retrying on next tick");
        }
      }
    }
  }
}
