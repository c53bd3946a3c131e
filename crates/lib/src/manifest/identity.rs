use std::fmt;

use uuid::Uuid;

use super::IdentityHints;
use crate::consts::DEFAULT_PROJECT_NAME;

/// Name and version used to create (or locate) a remote project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectIdentity {
  pub name: String,
  pub version: String,
}

impl ProjectIdentity {
  /// Derive an identity with a fresh random version token.
  ///
  /// The token makes every upload land in a new project, even when the same
  /// BOM is submitted on repeated runs.
  pub fn derive(hints: &IdentityHints) -> Self {
    Self::derive_with_token(hints, Uuid::new_v4())
  }

  /// Deterministic variant of [`derive`](Self::derive).
  pub fn derive_with_token(hints: &IdentityHints, token: Uuid) -> Self {
    let name = match (&hints.name, &hints.group) {
      (Some(name), Some(group)) => format!("{group}_{name}"),
      (Some(name), None) => name.clone(),
      (None, _) => DEFAULT_PROJECT_NAME.to_string(),
    };

    let version = match &hints.version {
      Some(version) => format!("{version}_{token}"),
      None => token.to_string(),
    };

    Self { name, version }
  }
}

impl fmt::Display for ProjectIdentity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}@{}", self.name, self.version)
  }
}
