//! Bare git mirrors in the source cache.
//!
//! Mirrors live at `<cache>/clones/<basename(url)>`. A mirror is reused only
//! when its recorded `origin` matches the requested URL; otherwise it is
//! destroyed and cloned again so a build never runs against the wrong
//! repository. Mirrors fetch with `+refs/*:refs/*`, so their branches and
//! `HEAD` follow the remote. There is no locking: two processes recloning the
//! same mirror at once can race.

use std::fs;
use std::path::{Path, PathBuf};

use gix::remote::Direction;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while maintaining a git mirror.
#[derive(Debug, Error)]
pub enum GitError {
  /// Failed to create or clear a cache directory.
  #[error("failed to prepare '{0}': {1}")]
  Prepare(PathBuf, #[source] std::io::Error),

  /// Failed to clone a git repository.
  #[error("failed to clone repository '{url}': {source}")]
  Clone {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  /// Failed to open an existing git repository.
  #[error("failed to open repository at '{path}': {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: Box<gix::open::Error>,
  },

  /// Failed to fetch from remote.
  #[error("failed to fetch from '{url}': {source}")]
  Fetch {
    url: String,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  /// Failed to check out a working tree.
  #[error("failed to check out '{path}': {source}")]
  Checkout {
    path: PathBuf,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  /// `HEAD` does not resolve to a commit with a tree.
  #[error("failed to read HEAD of '{path}': {source}")]
  Head {
    path: PathBuf,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  /// The repository has no remote to fetch from.
  #[error("no remote configured for repository")]
  NoRemote,
}

/// Fetch refspec of a mirror: every remote ref lands under the same local name.
pub const MIRROR_REFSPEC: &str = "+refs/*:refs/*";

/// What to do with the mirror slot for a requested URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorPlan {
  /// Nothing cached yet.
  Clone,
  /// Cached mirror points at the requested URL.
  Fetch,
  /// Cached mirror is for another origin (or unreadable) and must be replaced.
  Reclone { recorded: Option<String> },
}

/// Last path component of a repository URL, e.g. `zlib.git`.
pub fn mirror_name(url: &str) -> String {
  url
    .trim_end_matches('/')
    .rsplit(['/', ':'])
    .next()
    .filter(|s| !s.is_empty())
    .unwrap_or("repository.git")
    .to_string()
}

/// Directory name used when checking a mirror out into a workspace.
pub fn checkout_name(mirror: &Path) -> String {
  let name = mirror
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| "repository".to_string());
  name.strip_suffix(".git").map(str::to_string).unwrap_or(name)
}

/// The `origin` URL recorded in a cached mirror, if it can be read.
pub fn recorded_origin(mirror: &Path) -> Option<String> {
  let repo = gix::open(mirror).ok()?;
  let remote = repo.find_remote("origin").ok()?;
  remote.url(Direction::Fetch).map(|url| url.to_bstring().to_string())
}

/// Decide how to bring the mirror at `mirror` in line with `url`.
pub fn plan_mirror(mirror: &Path, url: &str) -> MirrorPlan {
  if !mirror.exists() {
    return MirrorPlan::Clone;
  }
  match recorded_origin(mirror) {
    Some(origin) if origin == url => MirrorPlan::Fetch,
    recorded => MirrorPlan::Reclone { recorded },
  }
}

/// Ensure an up-to-date bare mirror of `url` under `clones_dir`.
///
/// Returns the mirror path.
pub fn sync_mirror(url: &str, clones_dir: &Path) -> Result<PathBuf, GitError> {
  fs::create_dir_all(clones_dir).map_err(|e| GitError::Prepare(clones_dir.to_path_buf(), e))?;
  let mirror = clones_dir.join(mirror_name(url));

  match plan_mirror(&mirror, url) {
    MirrorPlan::Fetch => {
      debug!(url, path = %mirror.display(), "fetching into cached mirror");
      let repo = gix::open(&mirror).map_err(|e| GitError::Open {
        path: mirror.clone(),
        source: Box::new(e),
      })?;
      fetch_updates(&repo, url)?;
    }
    MirrorPlan::Reclone { recorded } => {
      warn!(
        url,
        recorded = recorded.as_deref().unwrap_or("<unreadable>"),
        path = %mirror.display(),
        "cached mirror has a different origin, recloning"
      );
      fs::remove_dir_all(&mirror).map_err(|e| GitError::Prepare(mirror.clone(), e))?;
      clone_bare(url, &mirror)?;
    }
    MirrorPlan::Clone => {
      info!(url, path = %mirror.display(), "cloning mirror");
      clone_bare(url, &mirror)?;
    }
  }

  Ok(mirror)
}

fn clone_bare(url: &str, dest: &Path) -> Result<gix::Repository, GitError> {
  let mut prepared = gix::prepare_clone_bare(url, dest)
    .map_err(|e| GitError::Clone {
      url: url.to_string(),
      source: Box::new(e),
    })?
    .configure_remote(|mut remote| {
      remote.replace_refspecs(Some(MIRROR_REFSPEC), Direction::Fetch)?;
      Ok(remote)
    });

  let (repo, _outcome) = prepared
    .fetch_only(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| GitError::Clone {
      url: url.to_string(),
      source: Box::new(e),
    })?;

  Ok(repo)
}

fn fetch_updates(repo: &gix::Repository, url: &str) -> Result<(), GitError> {
  let mut remote = repo
    .find_default_remote(Direction::Fetch)
    .ok_or(GitError::NoRemote)?
    .map_err(|e| GitError::Fetch {
      url: url.to_string(),
      source: Box::new(e),
    })?;
  // Mirrors cloned with the default refspec only ever moved `refs/remotes/*`.
  remote
    .replace_refspecs(Some(MIRROR_REFSPEC), Direction::Fetch)
    .map_err(|e| GitError::Fetch {
      url: url.to_string(),
      source: Box::new(e),
    })?;

  let connection = remote.connect(Direction::Fetch).map_err(|e| GitError::Fetch {
    url: url.to_string(),
    source: Box::new(e),
  })?;

  connection
    .prepare_fetch(gix::progress::Discard, Default::default())
    .map_err(|e| GitError::Fetch {
      url: url.to_string(),
      source: Box::new(e),
    })?
    .receive(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| GitError::Fetch {
      url: url.to_string(),
      source: Box::new(e),
    })?;

  Ok(())
}

/// Clone `source` (a mirror or any repository) into `dest` with a checked-out worktree.
pub fn checkout(source: &Path, dest: &Path) -> Result<(), GitError> {
  clone_worktree(&source.to_string_lossy(), dest)
}

/// Clone `url` into `dest` and check out its default branch.
pub fn clone_worktree(url: &str, dest: &Path) -> Result<(), GitError> {
  let mut prepared = gix::prepare_clone(url, dest).map_err(|e| GitError::Clone {
    url: url.to_string(),
    source: Box::new(e),
  })?;

  let (mut checkout, _outcome) = prepared
    .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| GitError::Clone {
      url: url.to_string(),
      source: Box::new(e),
    })?;

  checkout
    .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| GitError::Checkout {
      path: dest.to_path_buf(),
      source: Box::new(e),
    })?;

  Ok(())
}

/// Hex id of the tree `HEAD` points at in the repository at `path`.
pub fn head_tree_id(path: &Path) -> Result<String, GitError> {
  let repo = gix::open(path).map_err(|e| GitError::Open {
    path: path.to_path_buf(),
    source: Box::new(e),
  })?;
  let head = |e: Box<dyn std::error::Error + Send + Sync>| GitError::Head {
    path: path.to_path_buf(),
    source: e,
  };
  let commit = repo.head_commit().map_err(|e| head(Box::new(e)))?;
  let tree = commit.tree_id().map_err(|e| head(Box::new(e)))?;
  Ok(tree.to_string())
}
