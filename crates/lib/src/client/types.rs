//! Wire types and errors for the inventory service.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors produced while talking to the inventory service.
#[derive(Debug, Error)]
pub enum ClientError {
  /// The configured base URL could not be parsed or joined.
  #[error("invalid url '{url}': {source}")]
  InvalidUrl {
    url: String,
    #[source]
    source: url::ParseError,
  },

  /// The base URL has no host or port to connect to.
  #[error("url '{0}' has no host and port")]
  NoAuthority(String),

  /// Failed to build the underlying HTTP client.
  #[error("failed to initialize http client: {0}")]
  Init(#[source] reqwest::Error),

  /// The request never produced a response (refused, reset, timed out).
  #[error("request to {endpoint} failed: {source}")]
  Transport {
    endpoint: String,
    #[source]
    source: reqwest::Error,
  },

  /// The service answered with a non-success status.
  #[error("{endpoint} returned HTTP {status}: {body}")]
  Status { endpoint: String, status: u16, body: String },

  /// The response body did not match the expected shape.
  #[error("failed to decode response from {endpoint}: {message}")]
  Decode { endpoint: String, message: String },
}

impl ClientError {
  /// HTTP status of the response, if the service answered at all.
  pub fn status(&self) -> Option<u16> {
    match self {
      ClientError::Status { status, .. } => Some(*status),
      _ => None,
    }
  }

  pub fn is_unauthorized(&self) -> bool {
    self.status() == Some(401)
  }
}

/// 1-based page selector for listing endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOptions {
  pub page_number: usize,
  pub page_size: usize,
}

impl PageOptions {
  pub fn first(page_size: usize) -> Self {
    Self {
      page_number: 1,
      page_size,
    }
  }

  pub fn next(self) -> Self {
    Self {
      page_number: self.page_number + 1,
      ..self
    }
  }
}

/// One page of a listing together with the total item count reported by the service.
#[derive(Debug, Clone)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub total_count: usize,
}

/// A remote project. Only its identifier matters to the seeder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
  pub uuid: Uuid,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub version: Option<String>,
}

/// Response of the liveness endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct About {
  #[serde(default)]
  pub application: String,
  #[serde(default)]
  pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
  pub uuid: Uuid,
  pub name: String,
  #[serde(default)]
  pub api_keys: Vec<ApiKey>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiKey {
  pub key: String,
}

/// Opaque handle returned by an accepted BOM upload, used to poll processing status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadToken(pub String);

impl fmt::Display for UploadToken {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// A BOM upload with auto-create semantics.
///
/// The body is sent verbatim (base64-encoded on the wire); the project is
/// created by the service if `(project_name, project_version)` does not exist.
#[derive(Debug, Clone, Copy)]
pub struct BomUpload<'a> {
  pub project_name: &'a str,
  pub project_version: &'a str,
  pub bom: &'a [u8],
  pub auto_create: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BomUploadBody<'a> {
  pub project_name: &'a str,
  pub project_version: &'a str,
  pub auto_create: bool,
  pub bom: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BomUploadResponse {
  pub token: UploadToken,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProcessingResponse {
  pub processing: bool,
}
