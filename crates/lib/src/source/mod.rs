//! Source resolution: descriptors in, verified local content out.
//!
//! - [`local`] archives local directories into the cache
//! - [`remote`] downloads and verifies remote archives
//! - [`git`] maintains bare git mirrors
//!
//! Every source is resolved before any platform build starts. Any failure
//! here aborts the whole pipeline.
//!
//! # Cache Structure
//!
//! ```text
//! <cache>/downloads/<sha256>-<basename>   remote archives and archived directories
//! <cache>/clones/<basename(url)>          bare git mirrors
//! ```
//!
//! The cache is shared between concurrent invocations without locking. Entries
//! are checked before reuse and recreated on mismatch, but two writers on the
//! same key can still race.

pub mod git;
pub mod local;
pub mod remote;

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::consts::{APP_NAME, CLONES_DIR, DOWNLOADS_DIR};
use crate::platform::paths::cache_dir;
use crate::util::archive::{self, ArchiveError};
use crate::util::hash::{ContentHash, HashError};

pub use git::GitError;

/// A source as declared by a recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
  /// Archive fetched from `url` (or read from a local file) and verified against `hash`.
  RemoteArchive { url: String, hash: ContentHash },
  /// Git repository, identified by URL.
  GitRepo { url: String },
  /// Local directory archived as-is.
  LocalDir { path: PathBuf },
}

impl SourceSpec {
  /// Classify a `(url, hash)` descriptor.
  ///
  /// - `*.git` URLs are git repositories and take no hash
  /// - existing directories are local sources and take no hash
  /// - `http(s)://` URLs and existing files need a SHA-256
  pub fn from_descriptor(url: &str, hash: Option<&str>) -> Result<Self, SourceError> {
    let invalid = |reason: &str| SourceError::InvalidDescriptor {
      descriptor: url.to_string(),
      reason: reason.to_string(),
    };

    let url = url.trim();
    if url.is_empty() {
      return Err(invalid("empty source"));
    }

    if url.trim_end_matches('/').ends_with(".git") {
      if hash.is_some() {
        return Err(invalid("git sources are identified by URL and take no hash"));
      }
      return Ok(SourceSpec::GitRepo { url: url.to_string() });
    }

    let path = Path::new(url);
    if path.is_dir() {
      if hash.is_some() {
        return Err(invalid("local directories are hashed when archived and take no hash"));
      }
      return Ok(SourceSpec::LocalDir { path: path.to_path_buf() });
    }

    let Some(hash) = hash else {
      if remote::is_remote(url) || path.is_file() {
        return Err(invalid("archives require a sha256"));
      }
      return Err(SourceError::PathNotFound(path.to_path_buf()));
    };
    let hash = ContentHash::from_hex(hash).ok_or_else(|| invalid("sha256 must be 64 hex characters"))?;

    if remote::is_remote(url) || path.is_file() {
      Ok(SourceSpec::RemoteArchive {
        url: url.to_string(),
        hash,
      })
    } else if url.contains("://") {
      Err(invalid("unsupported URL scheme"))
    } else {
      Err(SourceError::PathNotFound(path.to_path_buf()))
    }
  }
}

/// How a resolved source is identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDigest {
  /// SHA-256 of the file at the resolved path.
  Sha256(ContentHash),
  /// Origin URL of a git mirror.
  Origin(String),
}

impl std::fmt::Display for SourceDigest {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      SourceDigest::Sha256(hash) => write!(f, "sha256:{}", hash),
      SourceDigest::Origin(url) => write!(f, "git:{}", url),
    }
  }
}

/// Verified local content for one [`SourceSpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
  pub path: PathBuf,
  pub digest: SourceDigest,
}

/// Errors that can occur while resolving sources.
#[derive(Debug, Error)]
pub enum SourceError {
  /// The descriptor does not describe any supported source.
  #[error("invalid source '{descriptor}': {reason}")]
  InvalidDescriptor { descriptor: String, reason: String },

  /// A local path does not exist or cannot be read.
  #[error("source path does not exist or is unreadable: {0}")]
  PathNotFound(PathBuf),

  /// Content does not match its declared hash.
  #[error("integrity check failed for {origin}: expected {expected}, got {actual}")]
  Integrity {
    origin: String,
    expected: ContentHash,
    actual: ContentHash,
  },

  /// HTTP request failed.
  #[error("download of {url} failed: {message}")]
  Download { url: String, message: String },

  #[error("failed to build HTTP client: {0}")]
  Client(String),

  #[error(transparent)]
  Git(#[from] GitError),

  #[error(transparent)]
  Archive(#[from] ArchiveError),

  #[error(transparent)]
  Hash(#[from] HashError),

  #[error("io error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Location of the shared on-disk source cache.
#[derive(Debug, Clone)]
pub struct SourceCache {
  root: PathBuf,
}

impl SourceCache {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// The cache at [`cache_dir`], honoring `BINFORGE_CACHE`.
  pub fn default_location() -> Self {
    Self::new(cache_dir())
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn downloads(&self) -> PathBuf {
    self.root.join(DOWNLOADS_DIR)
  }

  pub fn clones(&self) -> PathBuf {
    self.root.join(CLONES_DIR)
  }
}

/// Resolves [`SourceSpec`]s against a [`SourceCache`].
pub struct SourceResolver {
  cache: SourceCache,
  client: reqwest::Client,
}

impl SourceResolver {
  pub fn new(cache: SourceCache) -> Result<Self, SourceError> {
    let client = reqwest::Client::builder()
      .user_agent(format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| SourceError::Client(e.to_string()))?;
    Ok(Self { cache, client })
  }

  pub fn cache(&self) -> &SourceCache {
    &self.cache
  }

  /// Resolve every spec in order, stopping at the first failure.
  ///
  /// The output is index-aligned with `specs`.
  pub async fn resolve_all(&self, specs: &[SourceSpec]) -> Result<Vec<ResolvedSource>, SourceError> {
    let mut resolved = Vec::with_capacity(specs.len());
    for spec in specs {
      resolved.push(self.resolve(spec).await?);
    }
    info!(count = resolved.len(), "sources resolved");
    Ok(resolved)
  }

  pub async fn resolve(&self, spec: &SourceSpec) -> Result<ResolvedSource, SourceError> {
    debug!(?spec, "resolving source");
    match spec {
      SourceSpec::LocalDir { path } => local::archive_dir(path, &self.cache.downloads()),
      SourceSpec::RemoteArchive { url, hash } => {
        remote::fetch_archive(&self.client, url, hash, &self.cache.downloads()).await
      }
      SourceSpec::GitRepo { url } => {
        let mirror = git::sync_mirror(url, &self.cache.clones())?;
        Ok(ResolvedSource {
          path: mirror,
          digest: SourceDigest::Origin(url.clone()),
        })
      }
    }
  }
}

/// Materialize a resolved source inside a workspace source directory.
///
/// Archives are extracted, git mirrors are checked out into a subdirectory
/// named after the repository, and any other file is copied as-is.
pub fn unpack_into(source: &ResolvedSource, srcdir: &Path) -> Result<(), SourceError> {
  match &source.digest {
    SourceDigest::Origin(_) => {
      let dest = srcdir.join(git::checkout_name(&source.path));
      git::checkout(&source.path, &dest)?;
    }
    SourceDigest::Sha256(_) if archive::is_archive(&source.path) => {
      archive::unpack(&source.path, srcdir)?;
    }
    SourceDigest::Sha256(_) => {
      let name = source
        .path
        .file_name()
        .ok_or_else(|| SourceError::PathNotFound(source.path.clone()))?;
      fs::copy(&source.path, srcdir.join(name)).map_err(|e| SourceError::Io {
        path: source.path.clone(),
        source: e,
      })?;
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::hash::hash_bytes;
  use tempfile::TempDir;

  fn sha() -> String {
    hash_bytes(b"x").0
  }

  #[test]
  fn git_urls_are_repositories() {
    let spec = SourceSpec::from_descriptor("https://github.com/madler/zlib.git", None).unwrap();
    assert_eq!(
      spec,
      SourceSpec::GitRepo {
        url: "https://github.com/madler/zlib.git".to_string()
      }
    );
  }

  #[test]
  fn http_urls_with_hash_are_archives() {
    let spec = SourceSpec::from_descriptor("https://zlib.net/zlib-1.3.tar.gz", Some(&sha())).unwrap();
    assert!(matches!(spec, SourceSpec::RemoteArchive { .. }));
  }

  #[test]
  fn directories_are_local_sources() {
    let temp = TempDir::new().unwrap();
    let spec = SourceSpec::from_descriptor(temp.path().to_str().unwrap(), None).unwrap();
    assert_eq!(
      spec,
      SourceSpec::LocalDir {
        path: temp.path().to_path_buf()
      }
    );
  }

  #[test]
  fn archives_without_hash_are_rejected() {
    let err = SourceSpec::from_descriptor("https://zlib.net/zlib-1.3.tar.gz", None).unwrap_err();
    assert!(matches!(err, SourceError::InvalidDescriptor { .. }));
  }

  #[test]
  fn malformed_hash_is_rejected() {
    let err = SourceSpec::from_descriptor("https://zlib.net/zlib-1.3.tar.gz", Some("abc")).unwrap_err();
    assert!(matches!(err, SourceError::InvalidDescriptor { .. }));
  }

  #[test]
  fn unsupported_scheme_is_rejected() {
    let err = SourceSpec::from_descriptor("ftp://example.com/x.tar.gz", Some(&sha())).unwrap_err();
    assert!(matches!(err, SourceError::InvalidDescriptor { .. }));
  }

  #[test]
  fn missing_local_path_is_reported() {
    let err = SourceSpec::from_descriptor("/definitely/not/here", None).unwrap_err();
    assert!(matches!(err, SourceError::PathNotFound(_)));
  }

  #[tokio::test]
  async fn resolve_all_stops_at_first_failure() {
    let cache = TempDir::new().unwrap();
    let resolver = SourceResolver::new(SourceCache::new(cache.path())).unwrap();
    let specs = vec![
      SourceSpec::LocalDir {
        path: cache.path().join("missing"),
      },
      SourceSpec::LocalDir {
        path: cache.path().to_path_buf(),
      },
    ];

    let result = resolver.resolve_all(&specs).await;

    assert!(matches!(result, Err(SourceError::PathNotFound(_))));
    assert!(!cache.path().join(DOWNLOADS_DIR).exists());
  }

  #[tokio::test]
  async fn resolved_sources_unpack_into_workspace() {
    let cache = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    fs::write(project.path().join("configure"), "#!/bin/sh\n").unwrap();
    let resolver = SourceResolver::new(SourceCache::new(cache.path())).unwrap();

    let resolved = resolver
      .resolve(&SourceSpec::LocalDir {
        path: project.path().to_path_buf(),
      })
      .await
      .unwrap();
    let srcdir = TempDir::new().unwrap();
    unpack_into(&resolved, srcdir.path()).unwrap();

    assert!(srcdir.path().join("configure").exists());
  }
}
