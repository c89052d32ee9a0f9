//! Remote repository and registry staging interfaces.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use super::credentials::PushCredentials;
use crate::source::GitError;
use crate::version::BuildVersion;

/// `owner/name` of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoId {
  pub owner: String,
  pub name: String,
}

impl RepoId {
  pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      owner: owner.into(),
      name: name.into(),
    }
  }
}

impl fmt::Display for RepoId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.owner, self.name)
  }
}

impl FromStr for RepoId {
  type Err = ForgeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || ForgeError::InvalidRepo(s.to_string());
    let (owner, name) = s.trim().split_once('/').ok_or_else(invalid)?;
    let valid = |part: &str| {
      !part.is_empty()
        && part != "."
        && part != ".."
        && part.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    if !valid(owner) || !valid(name) {
      return Err(invalid());
    }
    Ok(Self::new(owner, name))
  }
}

/// Release tag for a package version: `<package>-v<version>`.
pub fn release_tag(package: &str, version: &BuildVersion) -> String {
  format!("{}-v{}", package, version)
}

/// A request to add a version to the package registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
  pub package: String,
  pub repository: RepoId,
  /// Git tree id of the committed wrapper checkout.
  pub tree_hash: String,
  pub version: BuildVersion,
}

#[derive(Debug, Error)]
pub enum ForgeError {
  #[error("invalid repository '{0}', expected owner/name")]
  InvalidRepo(String),

  #[error("request to {url} failed: {message}")]
  Http { url: String, message: String },

  #[error("{url} returned {status}: {message}")]
  Api { url: String, status: u16, message: String },

  #[error("git {command} failed: {message}")]
  Git { command: String, message: String },

  #[error(transparent)]
  Repository(#[from] GitError),

  #[error("no credentials available for {0}")]
  MissingCredentials(String),

  #[error("io error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// The hosted side of a deployment.
pub trait Forge {
  fn repo_exists(&self, repo: &RepoId) -> impl Future<Output = Result<bool, ForgeError>>;

  fn create_repo(&self, repo: &RepoId) -> impl Future<Output = Result<(), ForgeError>>;

  /// Clone `repo` into `dest`, which must not exist yet.
  fn clone_repo(&self, repo: &RepoId, dest: &Path) -> impl Future<Output = Result<(), ForgeError>>;

  /// Bring an existing checkout up to date and move its history onto the
  /// remote `branch`, keeping the working tree.
  fn fetch(&self, checkout: &Path, branch: &str) -> impl Future<Output = Result<(), ForgeError>>;

  /// Stage every file in `checkout` and commit. Returns `false` when there was nothing to commit.
  fn commit_all(&self, checkout: &Path, message: &str) -> impl Future<Output = Result<bool, ForgeError>>;

  fn push(
    &self,
    checkout: &Path,
    branch: &str,
    credentials: &PushCredentials,
  ) -> impl Future<Output = Result<(), ForgeError>>;

  /// Tree id of `HEAD` in `checkout`.
  fn tree_hash(&self, checkout: &Path) -> impl Future<Output = Result<String, ForgeError>>;

  /// Upload every file in `dir` to the release `tag`, replacing assets with the same name.
  fn upload_release(&self, repo: &RepoId, tag: &str, dir: &Path) -> impl Future<Output = Result<(), ForgeError>>;
}

/// Proposes registry changes for review.
pub trait RegistryStaging {
  /// Returns the URL of the opened pull request.
  fn submit(&self, registration: &Registration) -> impl Future<Output = Result<String, ForgeError>>;
}
