use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::Platform;
use crate::product::Product;
use crate::source::SourceError;
use crate::util::archive::ArchiveError;
use crate::util::hash::{ContentHash, HashError};

/// Flags controlling one run of the platform loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildFlags {
  /// Stream build output instead of buffering it into the log file.
  pub verbose: bool,
  /// Open an interactive shell in the workspace when the script fails.
  pub debug: bool,
  pub skip_audit: bool,
  /// Log audit failures as warnings instead of failing.
  pub ignore_audit_errors: bool,
  pub autofix: bool,
  pub require_license: bool,
}

/// Compilers the build script expects to find.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
  pub c: bool,
  pub cxx: bool,
  pub fortran: bool,
  pub rust: bool,
  pub go: bool,
  pub gcc_version: Option<String>,
}

impl Default for CompilerConfig {
  fn default() -> Self {
    Self {
      c: true,
      cxx: false,
      fortran: false,
      rust: false,
      go: false,
      gcc_version: None,
    }
  }
}

impl CompilerConfig {
  /// Environment variables pointing the build at the requested toolchains.
  ///
  /// Native builds use the host compiler names; cross builds use the
  /// triplet-prefixed ones.
  pub fn env(&self, platform: &Platform) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    let cross = Platform::current().map(|h| h.base()) != Some(platform.base());
    let tool = |native: &str, cross_name: &str| {
      if cross {
        format!("{}-{}", platform.base().triplet(), cross_name)
      } else {
        native.to_string()
      }
    };

    if self.c {
      env.insert("CC".to_string(), tool("cc", "gcc"));
    }
    if self.cxx {
      env.insert("CXX".to_string(), tool("c++", "g++"));
    }
    if self.fortran {
      env.insert("FC".to_string(), tool("gfortran", "gfortran"));
    }
    if self.rust {
      env.insert("CARGO_BUILD_TARGET".to_string(), rust_target(platform));
    }
    if self.go {
      env.insert("GOOS".to_string(), go_os(platform).to_string());
      env.insert("GOARCH".to_string(), go_arch(platform).to_string());
    }
    if let Some(gcc) = &self.gcc_version {
      env.insert("BINFORGE_GCC_VERSION".to_string(), gcc.clone());
    }
    env
  }
}

fn rust_target(platform: &Platform) -> String {
  use crate::platform::{Arch, Libc, Os};
  let arch = match platform.arch {
    Arch::Armv7l => "armv7",
    Arch::Powerpc64le => "powerpc64le",
    other => other.as_str(),
  };
  match (platform.os, platform.libc) {
    (Os::Linux, Some(Libc::Musl)) if platform.arch == Arch::Armv7l => format!("{}-unknown-linux-musleabihf", arch),
    (Os::Linux, _) if platform.arch == Arch::Armv7l => format!("{}-unknown-linux-gnueabihf", arch),
    (Os::Linux, Some(Libc::Musl)) => format!("{}-unknown-linux-musl", arch),
    (Os::Linux, _) => format!("{}-unknown-linux-gnu", arch),
    (Os::MacOs, _) => format!("{}-apple-darwin", arch),
    (Os::FreeBsd, _) => format!("{}-unknown-freebsd", arch),
    (Os::Windows, _) => format!("{}-pc-windows-gnu", arch),
  }
}

fn go_os(platform: &Platform) -> &'static str {
  use crate::platform::Os;
  match platform.os {
    Os::Linux => "linux",
    Os::MacOs => "darwin",
    Os::FreeBsd => "freebsd",
    Os::Windows => "windows",
  }
}

fn go_arch(platform: &Platform) -> &'static str {
  use crate::platform::Arch;
  match platform.arch {
    Arch::X86_64 => "amd64",
    Arch::I686 => "386",
    Arch::Aarch64 => "arm64",
    Arch::Armv7l => "arm",
    Arch::Powerpc64le => "ppc64le",
  }
}

/// A prebuilt dependency to make available under the prefix during the build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
  pub name: String,
  /// Directory holding the dependency's prefix tree, or one subdirectory per triplet.
  pub path: PathBuf,
}

/// Everything the platform loop needs besides resolved sources and collaborators.
#[derive(Debug, Clone)]
pub struct BuildRequest {
  pub name: String,
  pub version: Version,
  pub script: String,
  pub platforms: Vec<Platform>,
  pub products: Vec<Product>,
  pub dependencies: Vec<Dependency>,
  pub compilers: CompilerConfig,
  pub flags: BuildFlags,
  /// Parent of the per-platform workspaces.
  pub build_root: PathBuf,
  /// Where tarballs and preserved logs are written.
  pub output_dir: PathBuf,
  /// Print a liveness line at this interval while building.
  pub heartbeat: Option<Duration>,
}

/// Where a product ended up in the packaged tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInfo {
  /// Relative to the prefix.
  pub path: PathBuf,
  /// For libraries: the soname, or the file name when none could be read.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub soname: Option<String>,
}

/// The packaged result of one platform build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
  pub tarball_name: String,
  pub tarball_hash: ContentHash,
  pub tree_hash: ContentHash,
  pub products: BTreeMap<Product, ProductInfo>,
}

/// Per-platform artifacts of one pipeline run.
///
/// Platforms are only ever added, and each exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildOutputMeta(BTreeMap<Platform, ArtifactMeta>);

impl BuildOutputMeta {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record the artifact for `platform`. A second record for the same platform is rejected.
  pub fn record(&mut self, platform: Platform, meta: ArtifactMeta) -> Result<(), BuildError> {
    if self.0.contains_key(&platform) {
      return Err(BuildError::AlreadyRecorded(platform));
    }
    self.0.insert(platform, meta);
    Ok(())
  }

  pub fn get(&self, platform: &Platform) -> Option<&ArtifactMeta> {
    self.0.get(platform)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&Platform, &ArtifactMeta)> {
    self.0.iter()
  }

  pub fn platforms(&self) -> impl Iterator<Item = &Platform> {
    self.0.keys()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Write as pretty JSON, creating parent directories.
  pub fn write_json(&self, path: &Path) -> Result<(), BuildError> {
    let io_err = |source| BuildError::Io {
      path: path.to_path_buf(),
      source,
    };
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(self).map_err(|e| BuildError::Io {
      path: path.to_path_buf(),
      source: io::Error::other(e),
    })?;
    fs::write(path, json).map_err(io_err)
  }
}

#[derive(Debug, Error)]
pub enum PackageError {
  #[error(transparent)]
  Archive(#[from] ArchiveError),

  #[error(transparent)]
  Hash(#[from] HashError),

  #[error("io error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

#[derive(Debug, Error)]
pub enum DependencyError {
  #[error("dependency '{name}' not found at {path}")]
  NotFound { name: String, path: PathBuf },

  #[error("io error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

#[derive(Debug, Error)]
pub enum BuildError {
  #[error("{package} [{platform}]: build script failed{}", exit_suffix(.code))]
  ScriptFailed {
    package: String,
    platform: Platform,
    code: Option<i32>,
  },

  #[error("{package} [{platform}]: audit failed: {}", joined(.issues, "; "))]
  AuditFailed {
    package: String,
    platform: Platform,
    issues: Vec<String>,
  },

  #[error("{package} [{platform}]: missing products: {}", joined(.products, ", "))]
  MissingProducts {
    package: String,
    platform: Platform,
    products: Vec<String>,
  },

  #[error("{package} [{platform}]: failed to run build: {message}")]
  Runner {
    package: String,
    platform: Platform,
    message: String,
  },

  #[error("platform {0} built twice")]
  AlreadyRecorded(Platform),

  #[error("failed to unpack sources: {0}")]
  Source(#[from] SourceError),

  #[error(transparent)]
  Dependency(#[from] DependencyError),

  #[error("packaging failed: {0}")]
  Package(#[from] PackageError),

  #[error("io error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

fn exit_suffix(code: &Option<i32>) -> String {
  match code {
    Some(code) => format!(" with exit code {}", code),
    None => " (terminated by signal)".to_string(),
  }
}

fn joined(items: &[String], sep: &str) -> String {
  items.join(sep)
}
