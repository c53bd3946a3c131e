//! Convergence of the remote project count.
//!
//! Reads the current project total, computes the signed delta to the target
//! and either uploads new BOMs, deletes the oldest projects, or does nothing.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info};

use crate::client::{ClientError, InventoryService, PageOptions};
use crate::dispatch::{self, CompletionSummary, DispatchError, DispatchOptions, Tracking};
use crate::manifest::ManifestSet;
use crate::poll;
use crate::sweep::{self, SweepError};

#[derive(Debug, Error)]
pub enum ReconcileError {
  #[error("failed to count projects: {0}")]
  Count(#[source] ClientError),

  #[error(transparent)]
  Dispatch(#[from] DispatchError),

  #[error(transparent)]
  Sweep(#[from] SweepError),
}

/// Completion tracking knobs for the create path.
#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
  pub poll_interval: Duration,
  /// Deadline for all tracked waits, measured from the start of the uploads.
  pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
  pub target: usize,
  pub concurrency: NonZeroU32,
  pub skip_failed: bool,
  pub delay: Duration,
  /// Track processing of every accepted upload when set.
  pub wait: Option<WaitOptions>,
}

/// Signed difference between desired and observed project counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergenceDelta(pub i64);

impl ConvergenceDelta {
  pub fn between(current: usize, desired: usize) -> Self {
    Self(desired as i64 - current as i64)
  }

  pub fn action(self) -> Action {
    match self.0 {
      n if n > 0 => Action::Create { count: n as usize },
      n if n < 0 => Action::Delete {
        count: n.unsigned_abs() as usize,
      },
      _ => Action::Converged,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
  Create { count: usize },
  Delete { count: usize },
  Converged,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
  pub current: usize,
  pub desired: usize,
  pub action: Action,
  /// Upload attempts (create path).
  pub attempted: usize,
  /// Skipped upload failures (create path).
  pub failed: usize,
  pub deleted: usize,
  #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
  pub elapsed: Duration,
  #[serde(rename = "elapsed_with_completion_ms", serialize_with = "opt_as_millis")]
  pub elapsed_with_completion: Option<Duration>,
  pub completions: Option<CompletionSummary>,
}

impl ReconcileReport {
  fn new(current: usize, desired: usize, action: Action) -> Self {
    Self {
      current,
      desired,
      action,
      attempted: 0,
      failed: 0,
      deleted: 0,
      elapsed: Duration::ZERO,
      elapsed_with_completion: None,
      completions: None,
    }
  }
}

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
  s.serialize_u64(d.as_millis() as u64)
}

fn opt_as_millis<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
  match d {
    Some(d) => s.serialize_some(&(d.as_millis() as u64)),
    None => s.serialize_none(),
  }
}

/// Count the projects the service currently holds.
pub async fn current_count(service: &dyn InventoryService) -> Result<usize, ClientError> {
  let page = service.list_projects(PageOptions::first(1)).await?;
  Ok(page.total_count)
}

/// Converge the service to `options.target` projects.
pub async fn reconcile(
  service: Arc<dyn InventoryService>,
  manifests: &ManifestSet,
  options: &ReconcileOptions,
) -> Result<ReconcileReport, ReconcileError> {
  info!("fetching projects");
  let start = Instant::now();
  let current = current_count(service.as_ref()).await.map_err(|e| {
    error!(elapsed = ?start.elapsed(), error = %e, "failed to count projects");
    ReconcileError::Count(e)
  })?;

  let action = ConvergenceDelta::between(current, options.target).action();
  info!(found = current, want = options.target, "counted projects");
  let mut report = ReconcileReport::new(current, options.target, action);

  match action {
    Action::Create { count } => {
      info!(count, "creating projects");
      let dispatch_options = DispatchOptions {
        concurrency: options.concurrency,
        skip_failed: options.skip_failed,
        delay: options.delay,
        tracking: options.wait.map(|wait| Tracking {
          poll_interval: wait.poll_interval,
          deadline: poll::deadline_after(wait.timeout),
        }),
      };
      let result = dispatch::dispatch(service, manifests, count, &dispatch_options).await?;

      report.attempted = result.attempted;
      report.failed = result.failed;
      report.elapsed = result.elapsed;
      report.elapsed_with_completion = result.elapsed_with_completion;
      if options.wait.is_some() {
        report.completions = Some(result.completion_summary());
      }
    }
    Action::Delete { count } => {
      let result = sweep::delete_oldest(service.as_ref(), count).await?;
      report.deleted = result.deleted;
      report.elapsed = result.elapsed;
    }
    Action::Converged => {
      info!("nothing to do");
      report.elapsed = start.elapsed();
    }
  }

  Ok(report)
}
