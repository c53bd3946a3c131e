//! In-memory [`InventoryService`] used by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::client::{About, BomUpload, ClientError, InventoryService, Page, PageOptions, Project, UploadToken};

/// Upload recorded by the fake, in call order.
#[derive(Debug, Clone)]
pub struct RecordedUpload {
  pub project_name: String,
  pub project_version: String,
  pub bom: Vec<u8>,
  pub auto_create: bool,
}

fn status_error(endpoint: &str, status: u16) -> ClientError {
  ClientError::Status {
    endpoint: endpoint.to_string(),
    status,
    body: "injected failure".to_string(),
  }
}

/// Scriptable fake service.
///
/// - uploads sleep for `upload_latency` and track peak concurrency
/// - upload calls listed in `failing_uploads` (0-based call order) fail
/// - every token reports "processing" for `processing_ticks` status queries
/// - status queries fail once `failing_status` is set
/// - `about` fails for the first `about_failures` calls
/// - project listing fails once `failing_list` is set
#[derive(Default)]
pub struct FakeService {
  projects: Mutex<Vec<Project>>,
  deleted: Mutex<Vec<Uuid>>,
  failing_deletes: HashSet<Uuid>,
  uploads: Mutex<Vec<RecordedUpload>>,
  upload_latency: Duration,
  failing_uploads: HashSet<usize>,
  upload_calls: AtomicUsize,
  in_flight: AtomicUsize,
  peak_in_flight: AtomicUsize,
  processing_ticks: usize,
  failing_status: bool,
  status_calls: Mutex<HashMap<UploadToken, usize>>,
  about_failures: usize,
  about_calls: AtomicUsize,
  list_calls: AtomicUsize,
  failing_list: bool,
}

impl FakeService {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_projects(mut self, count: usize) -> Self {
    let projects = (0..count)
      .map(|i| Project {
        uuid: Uuid::new_v4(),
        name: format!("project-{i}"),
        version: None,
      })
      .collect();
    self.projects = Mutex::new(projects);
    self
  }

  pub fn with_upload_latency(mut self, latency: Duration) -> Self {
    self.upload_latency = latency;
    self
  }

  pub fn with_failing_uploads(mut self, calls: impl IntoIterator<Item = usize>) -> Self {
    self.failing_uploads = calls.into_iter().collect();
    self
  }

  pub fn with_failing_delete(mut self, uuid: Uuid) -> Self {
    self.failing_deletes.insert(uuid);
    self
  }

  pub fn with_processing_ticks(mut self, ticks: usize) -> Self {
    self.processing_ticks = ticks;
    self
  }

  pub fn with_failing_status(mut self) -> Self {
    self.failing_status = true;
    self
  }

  pub fn with_about_failures(mut self, failures: usize) -> Self {
    self.about_failures = failures;
    self
  }

  pub fn projects(&self) -> Vec<Project> {
    self.projects.lock().unwrap().clone()
  }

  pub fn deleted(&self) -> Vec<Uuid> {
    self.deleted.lock().unwrap().clone()
  }

  pub fn uploads(&self) -> Vec<RecordedUpload> {
    self.uploads.lock().unwrap().clone()
  }

  pub fn upload_calls(&self) -> usize {
    self.upload_calls.load(Ordering::SeqCst)
  }

  pub fn peak_in_flight(&self) -> usize {
    self.peak_in_flight.load(Ordering::SeqCst)
  }

  pub fn status_calls(&self, token: &UploadToken) -> usize {
    self.status_calls.lock().unwrap().get(token).copied().unwrap_or(0)
  }

  pub fn total_status_calls(&self) -> usize {
    self.status_calls.lock().unwrap().values().sum()
  }

  pub fn about_calls(&self) -> usize {
    self.about_calls.load(Ordering::SeqCst)
  }

  pub fn with_failing_list(mut self) -> Self {
    self.failing_list = true;
    self
  }

  pub fn list_calls(&self) -> usize {
    self.list_calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl InventoryService for FakeService {
  async fn about(&self) -> Result<About, ClientError> {
    let call = self.about_calls.fetch_add(1, Ordering::SeqCst);
    if call < self.about_failures {
      return Err(status_error("api/version", 503));
    }
    Ok(About {
      application: "Dependency-Track".to_string(),
      version: "4.11.0".to_string(),
    })
  }

  async fn list_projects(&self, page: PageOptions) -> Result<Page<Project>, ClientError> {
    self.list_calls.fetch_add(1, Ordering::SeqCst);
    if self.failing_list {
      return Err(status_error("api/v1/project", 500));
    }
    let projects = self.projects.lock().unwrap();
    let start = (page.page_number - 1) * page.page_size;
    let items = projects.iter().skip(start).take(page.page_size).cloned().collect();
    Ok(Page {
      items,
      total_count: projects.len(),
    })
  }

  async fn delete_project(&self, uuid: Uuid) -> Result<(), ClientError> {
    if self.failing_deletes.contains(&uuid) {
      return Err(status_error("api/v1/project", 500));
    }
    let mut projects = self.projects.lock().unwrap();
    let Some(index) = projects.iter().position(|p| p.uuid == uuid) else {
      return Err(status_error("api/v1/project", 404));
    };
    projects.remove(index);
    self.deleted.lock().unwrap().push(uuid);
    Ok(())
  }

  async fn upload_bom(&self, upload: BomUpload<'_>) -> Result<UploadToken, ClientError> {
    let call = self.upload_calls.fetch_add(1, Ordering::SeqCst);
    let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

    if !self.upload_latency.is_zero() {
      tokio::time::sleep(self.upload_latency).await;
    }

    self.in_flight.fetch_sub(1, Ordering::SeqCst);

    if self.failing_uploads.contains(&call) {
      return Err(status_error("api/v1/bom", 500));
    }

    self.uploads.lock().unwrap().push(RecordedUpload {
      project_name: upload.project_name.to_string(),
      project_version: upload.project_version.to_string(),
      bom: upload.bom.to_vec(),
      auto_create: upload.auto_create,
    });
    self.projects.lock().unwrap().push(Project {
      uuid: Uuid::new_v4(),
      name: upload.project_name.to_string(),
      version: Some(upload.project_version.to_string()),
    });

    Ok(UploadToken(format!("token-{call}")))
  }

  async fn is_being_processed(&self, token: &UploadToken) -> Result<bool, ClientError> {
    let calls = {
      let mut status_calls = self.status_calls.lock().unwrap();
      let calls = status_calls.entry(token.clone()).or_insert(0);
      *calls += 1;
      *calls
    };

    if self.failing_status {
      return Err(status_error("api/v1/bom/token", 500));
    }
    Ok(calls <= self.processing_ticks)
  }
}
