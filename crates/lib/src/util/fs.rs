//! Filesystem hygiene helpers used around workspaces and packaging.

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

/// Remove every empty directory below `root`, children before parents.
///
/// `root` itself is kept. Returns how many directories were removed.
pub fn remove_empty_dirs(root: &Path) -> io::Result<usize> {
  let mut removed = 0;
  for entry in WalkDir::new(root).min_depth(1).contents_first(true) {
    let entry = entry.map_err(io::Error::other)?;
    if !entry.file_type().is_dir() {
      continue;
    }
    if fs::read_dir(entry.path())?.next().is_none() {
      fs::remove_dir(entry.path())?;
      debug!(path = %entry.path().display(), "removed empty directory");
      removed += 1;
    }
  }
  Ok(removed)
}

/// Remove `dir` only if it exists and has no entries.
///
/// Returns whether the directory was removed.
pub fn remove_dir_if_empty(dir: &Path) -> io::Result<bool> {
  match fs::read_dir(dir) {
    Ok(mut entries) => {
      if entries.next().is_some() {
        return Ok(false);
      }
    }
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
    Err(e) => return Err(e),
  }
  match fs::remove_dir(dir) {
    Ok(()) => Ok(true),
    // A sibling wrote into it after we looked.
    Err(e) if e.kind() == io::ErrorKind::DirectoryNotEmpty => Ok(false),
    Err(e) => Err(e),
  }
}

/// Copy a directory tree, preserving relative layout and symlinks.
pub fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
  for entry in WalkDir::new(src) {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
    let target = dest.join(rel);
    let file_type = entry.file_type();
    if file_type.is_dir() {
      fs::create_dir_all(&target)?;
    } else if file_type.is_symlink() {
      copy_symlink(entry.path(), &target)?;
    } else {
      fs::copy(entry.path(), &target)?;
    }
  }
  Ok(())
}

#[cfg(unix)]
pub(crate) fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
  let target = fs::read_link(src)?;
  std::os::unix::fs::symlink(target, dest)
}

#[cfg(not(unix))]
pub(crate) fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
  fs::copy(src, dest).map(|_| ())
}
