//! Authentication bootstrap.
//!
//! Logs in as the admin user, rotating the factory password on first launch,
//! then provisions (or reuses) an API key of the `Administrators` team and
//! returns a client authenticated with it.

use thiserror::Error;
use tracing::info;

use crate::client::{ClientError, DependencyTrackClient, fetch_all};
use crate::consts::{ADMIN_TEAM_NAME, FETCH_ALL_PAGE_SIZE, INITIAL_ADMIN_PASSWORD};

#[derive(Debug, Error)]
pub enum BootstrapError {
  #[error("failed to authenticate as '{user}': {source}")]
  Login {
    user: String,
    #[source]
    source: ClientError,
  },

  #[error("failed to change password of '{user}': {source}")]
  ChangePassword {
    user: String,
    #[source]
    source: ClientError,
  },

  #[error("failed to get teams: {0}")]
  Teams(#[source] ClientError),

  #[error("unable to find team '{0}'")]
  TeamNotFound(String),

  #[error("failed to generate api key: {0}")]
  GenerateKey(#[source] ClientError),
}

/// Authenticate `user` and return a client carrying an admin-team API key.
pub async fn authenticate(
  client: &DependencyTrackClient,
  user: &str,
  password: &str,
) -> Result<DependencyTrackClient, BootstrapError> {
  let token = login(client, user, password).await?;
  let client = client.with_bearer_token(token);

  info!("fetching teams");
  let teams = fetch_all(FETCH_ALL_PAGE_SIZE, |page| client.teams(page))
    .await
    .map_err(BootstrapError::Teams)?;

  let team = teams
    .into_iter()
    .find(|team| team.name == ADMIN_TEAM_NAME)
    .ok_or_else(|| BootstrapError::TeamNotFound(ADMIN_TEAM_NAME.to_string()))?;

  let key = match team.api_keys.into_iter().next() {
    Some(key) => {
      info!("reusing existing api key");
      key.key
    }
    None => {
      info!(team = %team.uuid, "generating api key");
      client
        .generate_api_key(team.uuid)
        .await
        .map_err(BootstrapError::GenerateKey)?
    }
  };

  Ok(client.with_api_key(key))
}

/// Log in, rotating the factory password if the service rejects `password`.
async fn login(client: &DependencyTrackClient, user: &str, password: &str) -> Result<String, BootstrapError> {
  info!(user, "authenticating");
  match client.login(user, password).await {
    Ok(token) => return Ok(token),
    Err(e) if e.is_unauthorized() => {
      info!("probably first launch, changing admin password");
    }
    Err(source) => {
      return Err(BootstrapError::Login {
        user: user.to_string(),
        source,
      });
    }
  }

  client
    .force_change_password(user, INITIAL_ADMIN_PASSWORD, password)
    .await
    .map_err(|source| BootstrapError::ChangePassword {
      user: user.to_string(),
      source,
    })?;

  info!("re-attempting login");
  client
    .login(user, password)
    .await
    .map_err(|source| BootstrapError::Login {
      user: user.to_string(),
      source,
    })
}
