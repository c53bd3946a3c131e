//! Completion polling for accepted uploads.

use std::time::Duration;

use thiserror::Error;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use crate::client::{ClientError, InventoryService, UploadToken};

/// Terminal failures of a tracked wait.
#[derive(Debug, Error)]
pub enum PollError {
  /// The shared deadline elapsed while the token was still processing.
  #[error("timed out waiting for token {token} after {polls} poll(s)")]
  TimedOut { token: UploadToken, polls: usize },

  /// The status query itself failed. Not retried.
  #[error("status query for token {token} failed: {source}")]
  Status {
    token: UploadToken,
    #[source]
    source: ClientError,
  },

  /// A zero poll interval can't drive a periodic tick.
  #[error("poll interval for token {token} must be greater than zero")]
  ZeroInterval { token: UploadToken },
}

impl PollError {
  pub fn is_timeout(&self) -> bool {
    matches!(self, PollError::TimedOut { .. })
  }
}

/// Roughly thirty years; stands in for "no deadline".
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `Instant::now() + timeout`, saturating to a far-future instant instead of overflowing.
pub fn deadline_after(timeout: Duration) -> Instant {
  let now = Instant::now();
  now
    .checked_add(timeout)
    .or_else(|| now.checked_add(FAR_FUTURE))
    .unwrap_or(now)
}

/// A token that finished processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
  /// Status queries issued, including the final one.
  pub polls: usize,
  pub elapsed: Duration,
}

/// Poll `token` every `poll_interval` until the service reports it idle.
///
/// The first query is issued one interval after the call. A query error ends
/// the wait immediately; `deadline` bounds the whole wait, including a query
/// in flight. A zero `poll_interval` is rejected before any query.
pub async fn await_completion(
  service: &dyn InventoryService,
  token: &UploadToken,
  poll_interval: Duration,
  deadline: Instant,
) -> Result<Completion, PollError> {
  if poll_interval.is_zero() {
    return Err(PollError::ZeroInterval { token: token.clone() });
  }

  let start = Instant::now();
  let mut polls = 0;

  let outcome = time::timeout_at(deadline, poll_until_idle(service, token, poll_interval, &mut polls)).await;
  match outcome {
    Ok(Ok(())) => Ok(Completion {
      polls,
      elapsed: start.elapsed(),
    }),
    Ok(Err(source)) => Err(PollError::Status {
      token: token.clone(),
      source,
    }),
    Err(_) => Err(PollError::TimedOut {
      token: token.clone(),
      polls,
    }),
  }
}

async fn poll_until_idle(
  service: &dyn InventoryService,
  token: &UploadToken,
  poll_interval: Duration,
  polls: &mut usize,
) -> Result<(), ClientError> {
  let mut ticker = time::interval_at(Instant::now() + poll_interval, poll_interval);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    ticker.tick().await;
    *polls += 1;

    if !service.is_being_processed(token).await? {
      return Ok(());
    }
    debug!(token = %token, polls = *polls, "still processing");
  }
}
