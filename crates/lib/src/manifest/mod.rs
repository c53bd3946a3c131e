//! BOM manifests.
//!
//! Manifests are loaded once from a directory of `*.cdx.json` files and
//! shared read-only across every upload. Decoding is deferred to the unit of
//! work that submits the manifest.

mod bom;
mod identity;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

pub use bom::IdentityHints;
pub use identity::ProjectIdentity;

use crate::consts::BOM_FILE_SUFFIX;

/// Configuration errors: nothing to upload, or a manifest that can't be used.
#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("failed to read manifest directory '{path}': {source}")]
  ReadDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to read manifest '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("no *.cdx.json manifests found in '{0}'")]
  NoManifests(PathBuf),

  #[error("failed to decode manifest '{path}': {source}")]
  Decode {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

/// Raw bytes of one BOM document.
#[derive(Debug, Clone)]
pub struct Manifest {
  path: PathBuf,
  body: Arc<[u8]>,
}

impl Manifest {
  pub fn new(path: impl Into<PathBuf>, body: impl Into<Arc<[u8]>>) -> Self {
    Self {
      path: path.into(),
      body: body.into(),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn body(&self) -> &[u8] {
    &self.body
  }

  /// Decode the identity hints embedded in the BOM metadata.
  pub fn decode(&self) -> Result<IdentityHints, ManifestError> {
    IdentityHints::from_json(&self.body).map_err(|source| ManifestError::Decode {
      path: self.path.clone(),
      source,
    })
  }
}

/// A non-empty, ordered, immutable sequence of manifests.
///
/// Cloning shares the underlying storage.
#[derive(Debug, Clone)]
pub struct ManifestSet {
  manifests: Arc<[Manifest]>,
}

impl ManifestSet {
  /// Wrap loaded manifests. `origin` is only used to report an empty set.
  pub fn new(manifests: Vec<Manifest>, origin: &Path) -> Result<Self, ManifestError> {
    if manifests.is_empty() {
      return Err(ManifestError::NoManifests(origin.to_path_buf()));
    }
    Ok(Self {
      manifests: manifests.into(),
    })
  }

  pub fn len(&self) -> usize {
    self.manifests.len()
  }

  /// Always false; an empty set can't be constructed.
  pub fn is_empty(&self) -> bool {
    self.manifests.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Manifest> {
    self.manifests.iter()
  }

  /// Manifest used by unit of work `unit`.
  ///
  /// Selection is round-robin offset by one, so unit 0 uses the second
  /// manifest loaded. Existing seeded instances depend on this ordering.
  pub fn select(&self, unit: usize) -> &Manifest {
    &self.manifests[selection_index(unit, self.manifests.len())]
  }
}

/// `(unit + 1) mod count`; `count` must be at least 1.
pub fn selection_index(unit: usize, count: usize) -> usize {
  (unit % count + 1) % count
}

/// Load every `*.cdx.json` file directly under `dir`, sorted by file name.
pub fn load_all(dir: &Path) -> Result<ManifestSet, ManifestError> {
  let entries = fs::read_dir(dir).map_err(|source| ManifestError::ReadDir {
    path: dir.to_path_buf(),
    source,
  })?;

  let mut paths = Vec::new();
  for entry in entries {
    let entry = entry.map_err(|source| ManifestError::ReadDir {
      path: dir.to_path_buf(),
      source,
    })?;
    let path = entry.path();
    let is_bom = path
      .file_name()
      .and_then(|name| name.to_str())
      .is_some_and(|name| name.ends_with(BOM_FILE_SUFFIX));
    if is_bom && path.is_file() {
      paths.push(path);
    }
  }
  paths.sort();

  let mut manifests = Vec::with_capacity(paths.len());
  for path in paths {
    let body = fs::read(&path).map_err(|source| ManifestError::Read {
      path: path.clone(),
      source,
    })?;
    manifests.push(Manifest::new(path, body));
  }

  let set = ManifestSet::new(manifests, dir)?;
  info!(count = set.len(), dir = %dir.display(), "found bom files");
  Ok(set)
}
