//! Hashing utilities for content-addressed caching and verification.
//!
//! This module provides:
//! - `ContentHash`: a full 64-character SHA-256 hex digest
//! - `hash_directory()`: deterministic tree hash, independent of any archive format
//! - `hash_file()`: streaming single-file hash
//! - `hash_bytes()`: arbitrary byte hashing

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// A full 64-character SHA-256 hash, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
  /// Parse a user-supplied digest, normalizing case.
  ///
  /// Returns `None` unless the input is exactly 64 hex characters.
  pub fn from_hex(s: &str) -> Option<Self> {
    let s = s.trim();
    if s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit()) {
      Some(Self(s.to_ascii_lowercase()))
    } else {
      None
    }
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub(crate) fn from_hasher(hasher: Sha256) -> Self {
    Self(hex::encode(hasher.finalize()))
  }
}

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error during file or directory hashing.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
  #[error("failed to walk directory: {message}")]
  WalkDir { message: String },

  #[error("failed to read file {path}: {message}")]
  ReadFile { path: String, message: String },

  #[error("failed to read symlink {path}: {message}")]
  ReadSymlink { path: String, message: String },
}

/// Compute the tree hash of a directory.
///
/// The hash covers:
/// - File contents and the executable bit (not timestamps or ownership)
/// - Directory structure, including empty directories
/// - Symlink targets
///
/// Entries are sorted by path, so two trees with the same content hash
/// identically no matter how they were produced or archived.
pub fn hash_directory(path: &Path) -> Result<ContentHash, HashError> {
  let mut entries: Vec<(String, String)> = Vec::new();

  for entry in WalkDir::new(path).sort_by_file_name() {
    let entry = entry.map_err(|e| HashError::WalkDir { message: e.to_string() })?;
    let entry_path = entry.path();

    let rel_path = entry_path
      .strip_prefix(path)
      .unwrap_or(entry_path)
      .to_string_lossy()
      .replace('\\', "/");

    // Skip the root directory itself
    if rel_path.is_empty() {
      continue;
    }

    let file_type = entry.file_type();
    let entry_hash = if file_type.is_file() {
      let content_hash = hash_file(entry_path)?;
      let kind = if is_executable(entry_path) { "X" } else { "F" };
      format!("{}:{}:{}", kind, rel_path, content_hash.0)
    } else if file_type.is_dir() {
      format!("D:{}", rel_path)
    } else if file_type.is_symlink() {
      let target = fs::read_link(entry_path).map_err(|e| HashError::ReadSymlink {
        path: entry_path.display().to_string(),
        message: e.to_string(),
      })?;
      let target_hash = hash_bytes(target.to_string_lossy().as_bytes());
      format!("L:{}:{}", rel_path, target_hash.0)
    } else {
      // Skip special files (sockets, devices, etc.)
      continue;
    };

    entries.push((rel_path, entry_hash));
  }

  entries.sort_by(|a, b| a.0.cmp(&b.0));

  let mut hasher = Sha256::new();
  for (_, entry_hash) in entries {
    hasher.update(entry_hash.as_bytes());
    hasher.update(b"\n");
  }

  Ok(ContentHash::from_hasher(hasher))
}

/// Hash a file's contents.
pub fn hash_file(path: &Path) -> Result<ContentHash, HashError> {
  let mut file = fs::File::open(path).map_err(|e| HashError::ReadFile {
    path: path.display().to_string(),
    message: e.to_string(),
  })?;

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(|e| HashError::ReadFile {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash::from_hasher(hasher))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash::from_hasher(hasher)
}

#[cfg(unix)]
pub(crate) fn is_executable(path: &Path) -> bool {
  use std::os::unix::fs::PermissionsExt;
  fs::metadata(path)
    .map(|m| m.permissions().mode() & 0o111 != 0)
    .unwrap_or(false)
}

#[cfg(not(unix))]
pub(crate) fn is_executable(_path: &Path) -> bool {
  false
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::tempdir;

  #[test]
  fn hash_empty_directory() {
    let temp = tempdir().unwrap();
    let hash = hash_directory(temp.path()).unwrap();
    assert_eq!(hash.0.len(), 64);
  }

  #[test]
  fn hash_is_deterministic() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("a.txt"), "content a").unwrap();
    fs::write(temp.path().join("b.txt"), "content b").unwrap();

    let hash1 = hash_directory(temp.path()).unwrap();
    let hash2 = hash_directory(temp.path()).unwrap();

    assert_eq!(hash1, hash2);
  }

  #[test]
  fn hash_changes_with_content() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("file.txt"), "original").unwrap();
    let hash1 = hash_directory(temp.path()).unwrap();

    fs::write(temp.path().join("file.txt"), "modified").unwrap();
    let hash2 = hash_directory(temp.path()).unwrap();

    assert_ne!(hash1, hash2);
  }

  #[test]
  fn same_content_different_structure_different_hash() {
    let temp1 = tempdir().unwrap();
    fs::write(temp1.path().join("file.txt"), "content").unwrap();

    let temp2 = tempdir().unwrap();
    fs::create_dir(temp2.path().join("subdir")).unwrap();
    fs::write(temp2.path().join("subdir/file.txt"), "content").unwrap();

    assert_ne!(hash_directory(temp1.path()).unwrap(), hash_directory(temp2.path()).unwrap());
  }

  #[test]
  #[cfg(unix)]
  fn executable_bit_changes_tree_hash() {
    use std::os::unix::fs::PermissionsExt;

    let temp = tempdir().unwrap();
    let tool = temp.path().join("tool");
    fs::write(&tool, "#!/bin/sh\n").unwrap();
    let before = hash_directory(temp.path()).unwrap();

    fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
    let after = hash_directory(temp.path()).unwrap();

    assert_ne!(before, after);
  }

  #[test]
  fn hash_file_matches_hash_bytes() {
    let temp = tempdir().unwrap();
    let file_path = temp.path().join("test.txt");
    fs::write(&file_path, "hello world").unwrap();

    assert_eq!(hash_file(&file_path).unwrap(), hash_bytes(b"hello world"));
  }

  #[test]
  fn from_hex_normalizes_and_validates() {
    let upper = "AB".repeat(32);
    assert_eq!(ContentHash::from_hex(&upper).unwrap().0, "ab".repeat(32));
    assert!(ContentHash::from_hex("abc").is_none());
    assert!(ContentHash::from_hex(&"zz".repeat(32)).is_none());
  }
}
