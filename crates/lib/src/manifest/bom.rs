//! Minimal CycloneDX decoding.
//!
//! Only `metadata.component` is read; everything else in the document is
//! ignored but the body must still be a JSON object.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Bom {
  #[serde(default)]
  metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
  #[serde(default)]
  component: Option<Component>,
}

#[derive(Debug, Deserialize)]
struct Component {
  #[serde(default)]
  name: String,
  #[serde(default)]
  group: String,
  #[serde(default)]
  version: String,
}

/// Project identity hints carried by a BOM's primary component.
///
/// Empty strings are normalised to `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityHints {
  pub name: Option<String>,
  pub group: Option<String>,
  pub version: Option<String>,
}

impl IdentityHints {
  pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
    let bom: Bom = serde_json::from_slice(body)?;
    let Some(component) = bom.metadata.and_then(|m| m.component) else {
      return Ok(Self::default());
    };

    Ok(Self {
      name: non_empty(component.name),
      group: non_empty(component.group),
      version: non_empty(component.version),
    })
  }
}

fn non_empty(value: String) -> Option<String> {
  if value.is_empty() { None } else { Some(value) }
}
