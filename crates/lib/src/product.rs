//! Declared build products and how to find them in a destination tree.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info};

use crate::platform::{Os, Platform};
use crate::util::hash::is_executable;
use crate::util::soname::read_soname;

/// A build output that must exist once the build script has run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Product {
  /// Shared library, looked up in the platform's library directories.
  Library { name: String },
  /// Executable under `bin/`.
  Executable { name: String },
  /// Any file, by path relative to the prefix.
  File { relpath: PathBuf },
}

impl Product {
  pub fn library(name: impl Into<String>) -> Self {
    Product::Library { name: name.into() }
  }

  pub fn executable(name: impl Into<String>) -> Self {
    Product::Executable { name: name.into() }
  }

  pub fn file(relpath: impl Into<PathBuf>) -> Self {
    Product::File { relpath: relpath.into() }
  }

  /// Short label used in logs and error messages.
  pub fn describe(&self) -> String {
    self.to_string()
  }

  /// Find this product under `prefix`, returning its path relative to `prefix`.
  ///
  /// With `verbose`, every candidate that was considered is logged so a
  /// missing product can be diagnosed.
  pub fn locate(&self, prefix: &Path, platform: &Platform, verbose: bool) -> Option<PathBuf> {
    match self {
      Product::Library { name } => locate_library(prefix, platform, name, verbose),
      Product::Executable { name } => {
        let rel = Path::new("bin").join(format!("{}{}", name, platform.os.exeext()));
        let full = prefix.join(&rel);
        let found = full.is_file() && (platform.os == Os::Windows || is_executable(&full));
        report(verbose, self, &full, found);
        found.then_some(rel)
      }
      Product::File { relpath } => {
        let full = prefix.join(relpath);
        let found = full.exists();
        report(verbose, self, &full, found);
        found.then(|| relpath.clone())
      }
    }
  }

  pub fn is_satisfied(&self, prefix: &Path, platform: &Platform) -> bool {
    self.locate(prefix, platform, false).is_some()
  }
}

fn report(verbose: bool, product: &Product, candidate: &Path, found: bool) {
  if verbose {
    info!(product = %product, candidate = %candidate.display(), found, "locating product");
  } else {
    debug!(product = %product, candidate = %candidate.display(), found, "locating product");
  }
}

/// Whether `file_name` is a shared library called `name` on `platform`.
///
/// Accepts versioned sonames (`libz.so.1`), versioned dylibs (`libz.1.dylib`)
/// and mingw's `libz-1.dll`.
fn library_matches(file_name: &str, name: &str, os: Os) -> bool {
  let ext = os.dlext();
  let stems: Vec<String> = if name.starts_with("lib") {
    vec![name.to_string()]
  } else {
    vec![format!("lib{}", name), name.to_string()]
  };

  stems.iter().any(|stem| {
    let Some(rest) = file_name.strip_prefix(stem.as_str()) else {
      return false;
    };
    match os {
      Os::MacOs => rest == format!(".{}", ext) || (rest.starts_with('.') && rest.ends_with(&format!(".{}", ext))),
      Os::Windows => rest == format!(".{}", ext) || (rest.starts_with('-') && rest.ends_with(&format!(".{}", ext))),
      _ => rest == format!(".{}", ext) || rest.starts_with(&format!(".{}.", ext)),
    }
  })
}

fn locate_library(prefix: &Path, platform: &Platform, name: &str, verbose: bool) -> Option<PathBuf> {
  let product = Product::library(name);
  for dir in platform.os.libdirs() {
    let full_dir = prefix.join(dir);
    let Ok(entries) = fs::read_dir(&full_dir) else {
      report(verbose, &product, &full_dir, false);
      continue;
    };
    let mut names: Vec<String> = entries
      .filter_map(|e| e.ok())
      .filter(|e| e.path().is_file())
      .map(|e| e.file_name().to_string_lossy().into_owned())
      .collect();
    names.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));

    let matches: Vec<String> = names
      .into_iter()
      .filter(|file_name| {
        let found = library_matches(file_name, name, platform.os);
        if verbose || found {
          report(verbose, &product, &full_dir.join(file_name), found);
        }
        found
      })
      .collect();
    if let Some(chosen) = runtime_file(&full_dir, &matches) {
      return Some(Path::new(dir).join(chosen));
    }
  }
  None
}

/// The match a library's soname points at (`libz.so` -> `libz.so.1`), else the shortest.
fn runtime_file<'a>(dir: &Path, matches: &'a [String]) -> Option<&'a String> {
  matches
    .iter()
    .find_map(|file_name| {
      let soname = read_soname(&dir.join(file_name))?;
      matches.iter().find(|m| **m == soname)
    })
    .or_else(|| matches.first())
}

impl fmt::Display for Product {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Product::Library { name } => write!(f, "library:{}", name),
      Product::Executable { name } => write!(f, "executable:{}", name),
      Product::File { relpath } => write!(f, "file:{}", relpath.display()),
    }
  }
}

impl FromStr for Product {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (kind, value) = s
      .split_once(':')
      .ok_or_else(|| format!("product '{}' must be written kind:name", s))?;
    let value = value.trim();
    if value.is_empty() {
      return Err(format!("product '{}' has an empty name", s));
    }
    match kind.trim() {
      "library" | "lib" => Ok(Product::library(value)),
      "executable" | "exe" => Ok(Product::executable(value)),
      "file" => {
        let relpath = PathBuf::from(value);
        if relpath.is_absolute() {
          return Err(format!("file product '{}' must be relative to the prefix", value));
        }
        Ok(Product::file(relpath))
      }
      other => Err(format!("unknown product kind '{}'", other)),
    }
  }
}

impl Serialize for Product {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for Product {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
  }
}
