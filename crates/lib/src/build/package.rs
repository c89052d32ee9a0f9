//! Packaging an installed prefix into a release tarball.

use std::path::{Path, PathBuf};

use semver::Version;
use tracing::info;

use super::types::PackageError;
use crate::platform::Platform;
use crate::util::archive::write_tarball;
use crate::util::hash::{ContentHash, hash_directory};

/// What packaging produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageOutput {
  pub tarball: PathBuf,
  /// SHA-256 of the tarball bytes.
  pub content_hash: ContentHash,
  /// Hash of the uncompressed tree.
  pub tree_hash: ContentHash,
}

pub trait Packager {
  fn package(
    &self,
    prefix: &Path,
    name: &str,
    version: &Version,
    platform: &Platform,
  ) -> Result<PackageOutput, PackageError>;
}

/// `<name>.v<version>.<triplet>.tar.gz`
pub fn tarball_name(name: &str, version: &Version, platform: &Platform) -> String {
  format!("{}.v{}.{}.tar.gz", name, version, platform.triplet())
}

/// Writes deterministic `.tar.gz` files into an output directory.
#[derive(Debug, Clone)]
pub struct TarballPackager {
  output_dir: PathBuf,
}

impl TarballPackager {
  pub fn new(output_dir: impl Into<PathBuf>) -> Self {
    Self {
      output_dir: output_dir.into(),
    }
  }

  pub fn output_dir(&self) -> &Path {
    &self.output_dir
  }
}

impl Packager for TarballPackager {
  fn package(
    &self,
    prefix: &Path,
    name: &str,
    version: &Version,
    platform: &Platform,
  ) -> Result<PackageOutput, PackageError> {
    let tarball = self.output_dir.join(tarball_name(name, version, platform));
    let tree_hash = hash_directory(prefix)?;
    let content_hash = write_tarball(prefix, &tarball)?;
    info!(tarball = %tarball.display(), %content_hash, %tree_hash, "packaged");
    Ok(PackageOutput {
      tarball,
      content_hash,
      tree_hash,
    })
  }
}
