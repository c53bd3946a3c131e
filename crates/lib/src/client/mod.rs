//! Inventory service boundary.
//!
//! [`InventoryService`] is the seam between the convergence core and the
//! remote Dependency-Track instance. [`DependencyTrackClient`] implements it
//! over HTTP; tests substitute in-memory fakes.

mod http;
mod types;

use std::future::Future;

use async_trait::async_trait;
use uuid::Uuid;

pub use http::DependencyTrackClient;
pub use types::{About, ApiKey, BomUpload, ClientError, Page, PageOptions, Project, Team, UploadToken};

/// Operations the convergence core needs from the remote service.
#[async_trait]
pub trait InventoryService: Send + Sync {
  /// Lightweight liveness query.
  async fn about(&self) -> Result<About, ClientError>;

  /// List projects in the service's default order.
  async fn list_projects(&self, page: PageOptions) -> Result<Page<Project>, ClientError>;

  async fn delete_project(&self, uuid: Uuid) -> Result<(), ClientError>;

  /// Submit a BOM for background processing.
  async fn upload_bom(&self, upload: BomUpload<'_>) -> Result<UploadToken, ClientError>;

  /// Whether the BOM behind `token` is still being processed.
  async fn is_being_processed(&self, token: &UploadToken) -> Result<bool, ClientError>;
}

/// Walk every page of a listing and collect the items.
///
/// Stops when the collected count reaches the reported total or the service
/// returns an empty page, whichever comes first.
pub async fn fetch_all<T, F, Fut>(page_size: usize, mut fetch: F) -> Result<Vec<T>, ClientError>
where
  F: FnMut(PageOptions) -> Fut,
  Fut: Future<Output = Result<Page<T>, ClientError>>,
{
  let mut items = Vec::new();
  let mut page = PageOptions::first(page_size);

  loop {
    let result = fetch(page).await?;
    if result.items.is_empty() {
      break;
    }
    items.extend(result.items);
    if items.len() >= result.total_count {
      break;
    }
    page = page.next();
  }

  Ok(items)
}
