//! Build recipes (`binforge.toml`).
//!
//! ```toml
//! name = "Zlib"
//! version = "1.3.1"
//! script = """
//! ./configure --prefix=$prefix
//! make install
//! """
//! platforms = ["x86_64-linux-gnu", "aarch64-apple-darwin"]
//! products = ["library:libz"]
//!
//! [[sources]]
//! url = "https://zlib.net/zlib-1.3.1.tar.gz"
//! sha256 = "9a93b2b7dfdac77ceba5a558a580e74667dd6fede4585b91eefb60f03b72df23"
//!
//! [[dependencies]]
//! name = "Ncurses"
//! path = "deps/ncurses"
//!
//! [compilers]
//! cxx = true
//! ```
//!
//! Relative paths (sources, `script_file`, dependencies) are resolved against
//! the directory holding the recipe. An empty `platforms` list means every
//! supported platform.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use semver::Version;
use serde::Deserialize;
use thiserror::Error;

use crate::build::{BuildFlags, BuildRequest, CompilerConfig, Dependency};
use crate::platform::{Platform, supported_platforms};
use crate::product::Product;
use crate::source::{SourceError, SourceSpec, remote};

#[derive(Debug, Error)]
pub enum RecipeError {
  #[error("failed to read recipe {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse recipe {path}: {message}")]
  Parse { path: PathBuf, message: String },

  #[error("invalid recipe {path}: {reason}")]
  Invalid { path: PathBuf, reason: String },

  #[error("invalid source in {path}: {source}")]
  Source {
    path: PathBuf,
    #[source]
    source: SourceError,
  },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecipeFile {
  name: String,
  version: String,
  script: Option<String>,
  script_file: Option<PathBuf>,
  #[serde(default)]
  platforms: Vec<Platform>,
  #[serde(default)]
  products: Vec<Product>,
  #[serde(default)]
  sources: Vec<SourceEntry>,
  #[serde(default)]
  dependencies: Vec<Dependency>,
  #[serde(default)]
  compilers: CompilerConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceEntry {
  url: Option<String>,
  path: Option<PathBuf>,
  sha256: Option<String>,
}

/// A validated recipe with every path made absolute.
#[derive(Debug, Clone)]
pub struct Recipe {
  pub name: String,
  pub version: Version,
  pub script: String,
  pub platforms: Vec<Platform>,
  pub products: Vec<Product>,
  pub sources: Vec<SourceSpec>,
  pub dependencies: Vec<Dependency>,
  pub compilers: CompilerConfig,
  /// Directory relative paths were resolved against.
  pub dir: PathBuf,
}

impl Recipe {
  pub fn load(path: &Path) -> Result<Self, RecipeError> {
    let content = fs::read_to_string(path).map_err(|source| RecipeError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let path = dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    Self::parse(&content, &path, &dir)
  }

  /// Parse recipe text. `origin` is only used in errors.
  pub fn parse(content: &str, origin: &Path, dir: &Path) -> Result<Self, RecipeError> {
    let file: RecipeFile = toml::from_str(content).map_err(|e| RecipeError::Parse {
      path: origin.to_path_buf(),
      message: e.to_string(),
    })?;
    let invalid = |reason: String| RecipeError::Invalid {
      path: origin.to_path_buf(),
      reason,
    };

    if !is_valid_name(&file.name) {
      return Err(invalid(format!(
        "name '{}' must start with a letter and contain only letters, digits and '_'",
        file.name
      )));
    }

    let version = Version::parse(file.version.trim())
      .map_err(|e| invalid(format!("version '{}': {}", file.version, e)))?;
    if !version.build.is_empty() {
      return Err(invalid(format!(
        "version '{}' must not carry a build number, it is assigned on deploy",
        file.version
      )));
    }

    let script = match (file.script, file.script_file) {
      (Some(script), None) => script,
      (None, Some(script_file)) => {
        let script_path = dir.join(script_file);
        fs::read_to_string(&script_path).map_err(|source| RecipeError::Read {
          path: script_path,
          source,
        })?
      }
      (Some(_), Some(_)) => return Err(invalid("set either script or script_file, not both".to_string())),
      (None, None) => return Err(invalid("one of script or script_file is required".to_string())),
    };

    let sources = file
      .sources
      .into_iter()
      .map(|entry| source_spec(entry, dir))
      .collect::<Result<Vec<_>, _>>()
      .map_err(|e| match e {
        SourceSpecError::Entry(reason) => invalid(reason),
        SourceSpecError::Source(source) => RecipeError::Source {
          path: origin.to_path_buf(),
          source,
        },
      })?;

    let mut dependencies = file.dependencies;
    for dep in &mut dependencies {
      dep.path = dir.join(&dep.path);
    }

    let platforms = if file.platforms.is_empty() {
      supported_platforms()
    } else {
      let mut seen = HashSet::new();
      file.platforms.into_iter().filter(|p| seen.insert(*p)).collect()
    };

    Ok(Self {
      name: file.name,
      version,
      script,
      platforms,
      products: file.products,
      sources,
      dependencies,
      compilers: file.compilers,
      dir: dir.to_path_buf(),
    })
  }

  /// Keep only the listed platforms, in recipe order.
  pub fn restrict_platforms(&mut self, only: &[Platform]) {
    self.platforms.retain(|p| only.contains(p));
  }

  pub fn build_request(
    &self,
    flags: BuildFlags,
    build_root: &Path,
    output_dir: &Path,
    heartbeat: Option<Duration>,
  ) -> BuildRequest {
    BuildRequest {
      name: self.name.clone(),
      version: self.version.clone(),
      script: self.script.clone(),
      platforms: self.platforms.clone(),
      products: self.products.clone(),
      dependencies: self.dependencies.clone(),
      compilers: self.compilers.clone(),
      flags,
      build_root: build_root.to_path_buf(),
      output_dir: output_dir.to_path_buf(),
      heartbeat,
    }
  }
}

enum SourceSpecError {
  Entry(String),
  Source(SourceError),
}

fn source_spec(entry: SourceEntry, dir: &Path) -> Result<SourceSpec, SourceSpecError> {
  let location = match (entry.url, entry.path) {
    (Some(url), None) if remote::is_remote(&url) => url,
    (Some(url), None) => dir.join(url).to_string_lossy().into_owned(),
    (None, Some(path)) => dir.join(path).to_string_lossy().into_owned(),
    (Some(_), Some(_)) => return Err(SourceSpecError::Entry("source sets both url and path".to_string())),
    (None, None) => return Err(SourceSpecError::Entry("source needs a url or a path".to_string())),
  };
  SourceSpec::from_descriptor(&location, entry.sha256.as_deref()).map_err(SourceSpecError::Source)
}

fn is_valid_name(name: &str) -> bool {
  let mut chars = name.chars();
  chars.next().is_some_and(|c| c.is_ascii_alphabetic()) && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
