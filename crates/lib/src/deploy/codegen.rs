//! Wrapper files committed to the package repository.
//!
//! The wrapper describes where each platform's tarball can be downloaded and
//! what it contains, so the package manager on the other end can pick the
//! right one for its host.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use super::forge::{RepoId, release_tag};
use super::github::DEFAULT_HOST;
use crate::build::{BuildOutputMeta, Dependency};
use crate::platform::Platform;
use crate::registry::registered_name;
use crate::version::BuildVersion;

/// Generates the files describing a build.
pub trait WrapperGenerator {
  /// Write into `checkout`, returning the written paths.
  fn generate(
    &self,
    package: &str,
    version: &BuildVersion,
    meta: &BuildOutputMeta,
    dependencies: &[Dependency],
    checkout: &Path,
  ) -> io::Result<Vec<PathBuf>>;
}

/// Writes `Artifacts.toml` (one entry per platform) and `Project.toml`.
///
/// Download URLs point at the GitHub release for the version's tag.
#[derive(Debug, Clone)]
pub struct ArtifactsTomlGenerator {
  repo: RepoId,
  download_host: String,
}

impl ArtifactsTomlGenerator {
  pub fn new(repo: RepoId) -> Self {
    Self {
      repo,
      download_host: DEFAULT_HOST.to_string(),
    }
  }

  pub fn with_download_host(mut self, host: impl Into<String>) -> Self {
    self.download_host = host.into().trim_end_matches('/').to_string();
    self
  }

  fn download_url(&self, tag: &str, tarball: &str) -> String {
    format!(
      "{}/{}/releases/download/{}/{}",
      self.download_host, self.repo, tag, tarball
    )
  }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct ArtifactEntry {
  arch: String,
  os: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  libc: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  libgfortran_version: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  cxxstring_abi: Option<String>,
  triplet: String,
  tree_sha256: String,
  download: Vec<DownloadEntry>,
}

#[derive(Debug, Serialize)]
struct DownloadEntry {
  sha256: String,
  url: String,
}

#[derive(Debug, Serialize)]
struct ProjectToml<'a> {
  name: String,
  version: String,
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  deps: BTreeMap<&'a str, String>,
}

fn os_name(platform: &Platform) -> &'static str {
  use crate::platform::Os;
  match platform.os {
    Os::Linux => "linux",
    Os::MacOs => "macos",
    Os::FreeBsd => "freebsd",
    Os::Windows => "windows",
  }
}

fn libc_name(platform: &Platform) -> Option<String> {
  use crate::platform::Libc;
  platform.libc.map(|libc| match libc {
    Libc::Glibc => "glibc".to_string(),
    Libc::Musl => "musl".to_string(),
  })
}

impl WrapperGenerator for ArtifactsTomlGenerator {
  fn generate(
    &self,
    package: &str,
    version: &BuildVersion,
    meta: &BuildOutputMeta,
    dependencies: &[Dependency],
    checkout: &Path,
  ) -> io::Result<Vec<PathBuf>> {
    let tag = release_tag(package, version);

    let entries: Vec<ArtifactEntry> = meta
      .iter()
      .map(|(platform, artifact)| ArtifactEntry {
        arch: platform.arch.as_str().to_string(),
        os: os_name(platform).to_string(),
        libc: libc_name(platform),
        libgfortran_version: platform.compiler.libgfortran.map(|v| format!("{}.0.0", v)),
        cxxstring_abi: platform.compiler.cxxstring.map(|abi| abi.as_str().to_string()),
        triplet: platform.triplet(),
        tree_sha256: artifact.tree_hash.to_string(),
        download: vec![DownloadEntry {
          sha256: artifact.tarball_hash.to_string(),
          url: self.download_url(&tag, &artifact.tarball_name),
        }],
      })
      .collect();
    let artifacts = BTreeMap::from([(package.to_string(), entries)]);

    let project = ProjectToml {
      name: registered_name(package),
      version: version.to_string(),
      deps: dependencies
        .iter()
        .map(|d| (d.name.as_str(), registered_name(&d.name)))
        .collect(),
    };

    let to_io = |e: toml::ser::Error| io::Error::new(io::ErrorKind::InvalidData, e);
    let files = [
      ("Artifacts.toml", toml::to_string(&artifacts).map_err(to_io)?),
      ("Project.toml", toml::to_string(&project).map_err(to_io)?),
    ];

    fs::create_dir_all(checkout)?;
    let mut written = Vec::with_capacity(files.len());
    for (name, content) in files {
      let path = checkout.join(name);
      fs::write(&path, content)?;
      written.push(path);
    }
    info!(package, %version, files = written.len(), "generated wrapper");
    Ok(written)
  }
}
