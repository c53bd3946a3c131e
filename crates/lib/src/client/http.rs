//! HTTP implementation of [`InventoryService`] for Dependency-Track.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use super::types::{BomUploadBody, BomUploadResponse, ProcessingResponse};
use super::{About, ApiKey, BomUpload, ClientError, InventoryService, Page, PageOptions, Project, Team, UploadToken};

const TOTAL_COUNT_HEADER: &str = "X-Total-Count";
const API_KEY_HEADER: &str = "X-Api-Key";

#[derive(Clone)]
enum Credentials {
  Anonymous,
  Bearer(String),
  ApiKey(String),
}

/// Dependency-Track REST client.
///
/// Cloning is cheap; the underlying connection pool is shared.
#[derive(Clone)]
pub struct DependencyTrackClient {
  http: reqwest::Client,
  base_url: Url,
  credentials: Credentials,
}

impl std::fmt::Debug for DependencyTrackClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let auth = match self.credentials {
      Credentials::Anonymous => "anonymous",
      Credentials::Bearer(_) => "bearer",
      Credentials::ApiKey(_) => "api-key",
    };
    f.debug_struct("DependencyTrackClient")
      .field("base_url", &self.base_url.as_str())
      .field("auth", &auth)
      .finish()
  }
}

impl DependencyTrackClient {
  /// Create an unauthenticated client for `base_url`.
  pub fn new(base_url: &str) -> Result<Self, ClientError> {
    let mut url = Url::parse(base_url).map_err(|source| ClientError::InvalidUrl {
      url: base_url.to_string(),
      source,
    })?;
    // Endpoints are joined as relative paths, so keep any path prefix intact.
    if !url.path().ends_with('/') {
      let path = format!("{}/", url.path());
      url.set_path(&path);
    }

    let http = reqwest::Client::builder()
      .connect_timeout(Duration::from_secs(15))
      .timeout(Duration::from_secs(120))
      .build()
      .map_err(ClientError::Init)?;

    Ok(Self {
      http,
      base_url: url,
      credentials: Credentials::Anonymous,
    })
  }

  /// Same client, authenticating with a JWT obtained from [`login`](Self::login).
  pub fn with_bearer_token(&self, token: impl Into<String>) -> Self {
    Self {
      credentials: Credentials::Bearer(token.into()),
      ..self.clone()
    }
  }

  /// Same client, authenticating with a team API key.
  pub fn with_api_key(&self, key: impl Into<String>) -> Self {
    Self {
      credentials: Credentials::ApiKey(key.into()),
      ..self.clone()
    }
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  /// `host:port` of the service, for raw TCP probing.
  pub fn authority(&self) -> Result<String, ClientError> {
    let host = self.base_url.host_str();
    let port = self.base_url.port_or_known_default();
    match (host, port) {
      (Some(host), Some(port)) => Ok(format!("{host}:{port}")),
      _ => Err(ClientError::NoAuthority(self.base_url.to_string())),
    }
  }

  /// Exchange credentials for a JWT.
  pub async fn login(&self, username: &str, password: &str) -> Result<String, ClientError> {
    let path = "api/v1/user/login";
    let request = self
      .request(Method::POST, path)?
      .form(&[("username", username), ("password", password)]);
    let response = self.send(request, path).await?;
    text(response, path).await
  }

  /// Rotate a password the service flagged as "must change" (first launch).
  pub async fn force_change_password(
    &self,
    username: &str,
    password: &str,
    new_password: &str,
  ) -> Result<(), ClientError> {
    let path = "api/v1/user/forceChangePassword";
    let request = self.request(Method::POST, path)?.form(&[
      ("username", username),
      ("password", password),
      ("newPassword", new_password),
      ("confirmPassword", new_password),
    ]);
    self.send(request, path).await?;
    Ok(())
  }

  pub async fn teams(&self, page: PageOptions) -> Result<Page<Team>, ClientError> {
    self.get_page("api/v1/team", page).await
  }

  /// Generate a new API key for `team` and return it.
  pub async fn generate_api_key(&self, team: Uuid) -> Result<String, ClientError> {
    let path = format!("api/v1/team/{team}/key");
    let request = self.request(Method::PUT, &path)?;
    let response = self.send(request, &path).await?;
    let key: ApiKey = json(response, &path).await?;
    Ok(key.key)
  }

  fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ClientError> {
    let url = self.base_url.join(path).map_err(|source| ClientError::InvalidUrl {
      url: format!("{}{}", self.base_url, path),
      source,
    })?;

    let builder = self.http.request(method, url);
    Ok(match &self.credentials {
      Credentials::Anonymous => builder,
      Credentials::Bearer(token) => builder.bearer_auth(token),
      Credentials::ApiKey(key) => builder.header(API_KEY_HEADER, key),
    })
  }

  async fn send(&self, request: RequestBuilder, endpoint: &str) -> Result<Response, ClientError> {
    let response = request.send().await.map_err(|source| ClientError::Transport {
      endpoint: endpoint.to_string(),
      source,
    })?;

    let status = response.status();
    debug!(endpoint, status = status.as_u16(), "response received");
    if status.is_success() {
      return Ok(response);
    }

    let body = response
      .text()
      .await
      .unwrap_or_else(|_| "unable to read response body".to_string());
    Err(ClientError::Status {
      endpoint: endpoint.to_string(),
      status: status.as_u16(),
      body,
    })
  }

  async fn get_page<T: DeserializeOwned>(&self, path: &str, page: PageOptions) -> Result<Page<T>, ClientError> {
    let request = self.request(Method::GET, path)?.query(&[
      ("pageNumber", page.page_number.to_string()),
      ("pageSize", page.page_size.to_string()),
    ]);
    let response = self.send(request, path).await?;

    // Callers size the inventory from this header, so a page without it is unusable.
    let total_count = response
      .headers()
      .get(TOTAL_COUNT_HEADER)
      .and_then(|value| value.to_str().ok())
      .and_then(|value| value.trim().parse::<usize>().ok())
      .ok_or_else(|| ClientError::Decode {
        endpoint: path.to_string(),
        message: format!("missing or invalid {TOTAL_COUNT_HEADER} header"),
      })?;
    let items: Vec<T> = json(response, path).await?;

    Ok(Page { items, total_count })
  }
}

async fn text(response: Response, endpoint: &str) -> Result<String, ClientError> {
  response.text().await.map_err(|e| ClientError::Decode {
    endpoint: endpoint.to_string(),
    message: e.to_string(),
  })
}

async fn json<T: DeserializeOwned>(response: Response, endpoint: &str) -> Result<T, ClientError> {
  let body = response.bytes().await.map_err(|e| ClientError::Decode {
    endpoint: endpoint.to_string(),
    message: e.to_string(),
  })?;
  serde_json::from_slice(&body).map_err(|e| ClientError::Decode {
    endpoint: endpoint.to_string(),
    message: e.to_string(),
  })
}

#[async_trait]
impl InventoryService for DependencyTrackClient {
  async fn about(&self) -> Result<About, ClientError> {
    let path = "api/version";
    let request = self.request(Method::GET, path)?;
    let response = self.send(request, path).await?;
    json(response, path).await
  }

  async fn list_projects(&self, page: PageOptions) -> Result<Page<Project>, ClientError> {
    self.get_page("api/v1/project", page).await
  }

  async fn delete_project(&self, uuid: Uuid) -> Result<(), ClientError> {
    let path = format!("api/v1/project/{uuid}");
    let request = self.request(Method::DELETE, &path)?;
    self.send(request, &path).await?;
    Ok(())
  }

  async fn upload_bom(&self, upload: BomUpload<'_>) -> Result<UploadToken, ClientError> {
    let path = "api/v1/bom";
    let body = BomUploadBody {
      project_name: upload.project_name,
      project_version: upload.project_version,
      auto_create: upload.auto_create,
      bom: STANDARD.encode(upload.bom),
    };
    let request = self.request(Method::PUT, path)?.json(&body);
    let response = self.send(request, path).await?;
    let accepted: BomUploadResponse = json(response, path).await?;
    Ok(accepted.token)
  }

  async fn is_being_processed(&self, token: &UploadToken) -> Result<bool, ClientError> {
    let path = format!("api/v1/bom/token/{token}");
    let request = self.request(Method::GET, &path)?;
    let response = self.send(request, &path).await?;
    let status: ProcessingResponse = json(response, &path).await?;
    Ok(status.processing)
  }
}
