//! Package registry queries.
//!
//! A registry maps package names to the versions that have been registered.
//! [`DirRegistry`] reads a local registry checkout laid out as
//!
//! ```text
//! <root>/<FIRST LETTER>/<Name>/Versions.toml
//! ```
//!
//! where each top-level table of `Versions.toml` is a version string holding
//! the `git-tree-sha1` of the registered tree.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse {path}: {message}")]
  Parse { path: PathBuf, message: String },

  #[error("invalid package name '{0}'")]
  InvalidName(String),
}

/// Read access to registered versions.
pub trait Registry {
  /// Every registered version of `package`. Unknown packages yield an empty list.
  fn list_versions(&self, package: &str) -> Result<Vec<Version>, RegistryError>;
}

/// One entry in `Versions.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
  #[serde(rename = "git-tree-sha1")]
  pub git_tree_sha1: String,
}

/// Name a built package is registered and wrapped under.
pub fn registered_name(package: &str) -> String {
  format!("{}_jll", package)
}

/// Path of a package's versions file, relative to the registry root, with `/` separators.
pub fn versions_file(package: &str) -> Result<String, RegistryError> {
  let first = package
    .chars()
    .next()
    .filter(|c| c.is_ascii_alphabetic())
    .ok_or_else(|| RegistryError::InvalidName(package.to_string()))?;
  if package.contains(['/', '\\']) || package.contains("..") {
    return Err(RegistryError::InvalidName(package.to_string()));
  }
  Ok(format!("{}/{}/Versions.toml", first.to_ascii_uppercase(), package))
}

/// Parse `Versions.toml` content into its entries.
pub fn parse_versions(content: &str, origin: &Path) -> Result<BTreeMap<String, VersionEntry>, RegistryError> {
  toml::from_str(content).map_err(|e| RegistryError::Parse {
    path: origin.to_path_buf(),
    message: e.to_string(),
  })
}

/// Render one `Versions.toml` entry.
pub fn render_versions_entry(version: &Version, tree_hash: &str) -> String {
  format!("[\"{}\"]\ngit-tree-sha1 = \"{}\"\n", version, tree_hash)
}

/// Append an entry to existing `Versions.toml` content, keeping a blank line between tables.
pub fn append_versions_entry(existing: &str, version: &Version, tree_hash: &str) -> String {
  let mut out = existing.trim_end().to_string();
  if !out.is_empty() {
    out.push_str("\n\n");
  }
  out.push_str(&render_versions_entry(version, tree_hash));
  out
}

/// A registry checked out on the local filesystem.
#[derive(Debug, Clone)]
pub struct DirRegistry {
  root: PathBuf,
}

impl DirRegistry {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }
}

impl Registry for DirRegistry {
  fn list_versions(&self, package: &str) -> Result<Vec<Version>, RegistryError> {
    let path = self.root.join(versions_file(package)?);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(package, path = %path.display(), "package not registered");
        return Ok(Vec::new());
      }
      Err(source) => return Err(RegistryError::Read { path, source }),
    };

    let entries = parse_versions(&content, &path)?;
    let mut versions = Vec::with_capacity(entries.len());
    for key in entries.keys() {
      match Version::parse(key) {
        Ok(v) => versions.push(v),
        Err(e) => warn!(package, version = %key, error = %e, "skipping unparseable registry version"),
      }
    }
    Ok(versions)
  }
}
