//! Sequential deletion of the oldest projects.
//!
//! Unlike uploads there is no skip policy: the first failed deletion ends the
//! sweep.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

use crate::client::{ClientError, InventoryService, PageOptions};

#[derive(Debug, Error)]
pub enum SweepError {
  #[error("failed to fetch {requested} project(s): {source}")]
  List {
    requested: usize,
    #[source]
    source: ClientError,
  },

  #[error("failed to delete project {uuid} ({index}/{requested}) after {deleted} deletion(s): {source}")]
  Delete {
    uuid: Uuid,
    index: usize,
    requested: usize,
    deleted: usize,
    #[source]
    source: ClientError,
  },

  /// The service listed fewer projects than requested; the listed ones were deleted.
  #[error("only {deleted} of {requested} project(s) available to delete")]
  Exhausted { deleted: usize, requested: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
  pub deleted: usize,
  pub elapsed: Duration,
}

/// Delete the first `count` projects in the service's default listing order.
pub async fn delete_oldest(service: &dyn InventoryService, count: usize) -> Result<SweepReport, SweepError> {
  let start = Instant::now();
  if count == 0 {
    return Ok(SweepReport::default());
  }

  info!(count, "deleting first projects");
  let page = service
    .list_projects(PageOptions::first(count))
    .await
    .map_err(|source| SweepError::List {
      requested: count,
      source,
    })?;

  let mut deleted = 0;
  for (i, project) in page.items.iter().take(count).enumerate() {
    info!(uuid = %project.uuid, index = i + 1, total = count, "deleting project");
    if let Err(source) = service.delete_project(project.uuid).await {
      error!(uuid = %project.uuid, elapsed = ?start.elapsed(), error = %source, "delete failed");
      return Err(SweepError::Delete {
        uuid: project.uuid,
        index: i + 1,
        requested: count,
        deleted,
        source,
      });
    }
    deleted += 1;
  }

  if deleted < count {
    return Err(SweepError::Exhausted {
      deleted,
      requested: count,
    });
  }

  Ok(SweepReport {
    deleted,
    elapsed: start.elapsed(),
  })
}
