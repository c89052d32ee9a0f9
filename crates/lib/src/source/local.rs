//! Local directory sources, archived into the downloads cache.

use std::fs;
use std::path::Path;

use tracing::info;

use super::{ResolvedSource, SourceDigest, SourceError};
use crate::util::archive::write_tarball;

/// Archive `path` deterministically and store it as `<hash>-<dirname>.tar.gz`.
///
/// Embedding the hash keeps two different directories that share a name from
/// overwriting each other's archive.
pub fn archive_dir(path: &Path, downloads: &Path) -> Result<ResolvedSource, SourceError> {
  let canonical = dunce::canonicalize(path).map_err(|_| SourceError::PathNotFound(path.to_path_buf()))?;
  if !canonical.is_dir() {
    return Err(SourceError::PathNotFound(path.to_path_buf()));
  }
  let name = canonical
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| "source".to_string());

  let io_err = |source| SourceError::Io {
    path: downloads.to_path_buf(),
    source,
  };
  fs::create_dir_all(downloads).map_err(io_err)?;
  let staging = tempfile::Builder::new()
    .prefix(".archive-")
    .suffix(".tar.gz")
    .tempfile_in(downloads)
    .map_err(io_err)?;

  let hash = write_tarball(&canonical, staging.path())?;
  let dest = downloads.join(format!("{}-{}.tar.gz", hash, name));
  staging.persist(&dest).map_err(|e| io_err(e.error))?;

  info!(dir = %canonical.display(), archive = %dest.display(), "archived local source");
  Ok(ResolvedSource {
    path: dest,
    digest: SourceDigest::Sha256(hash),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::hash::hash_file;
  use tempfile::TempDir;

  #[test]
  fn archive_name_embeds_content_hash() {
    let src = TempDir::new().unwrap();
    let project = src.path().join("project");
    fs::create_dir_all(&project).unwrap();
    fs::write(project.join("main.c"), "int main(){return 0;}").unwrap();
    let downloads = TempDir::new().unwrap();

    let resolved = archive_dir(&project, downloads.path()).unwrap();

    let SourceDigest::Sha256(hash) = &resolved.digest else {
      panic!("local sources carry a content hash");
    };
    assert_eq!(hash_file(&resolved.path).unwrap(), *hash);
    assert_eq!(
      resolved.path.file_name().unwrap().to_string_lossy(),
      format!("{}-project.tar.gz", hash)
    );
  }

  #[test]
  fn same_named_dirs_do_not_collide() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    fs::create_dir_all(a.path().join("src")).unwrap();
    fs::create_dir_all(b.path().join("src")).unwrap();
    fs::write(a.path().join("src/file"), "a").unwrap();
    fs::write(b.path().join("src/file"), "b").unwrap();
    let downloads = TempDir::new().unwrap();

    let ra = archive_dir(&a.path().join("src"), downloads.path()).unwrap();
    let rb = archive_dir(&b.path().join("src"), downloads.path()).unwrap();

    assert_ne!(ra.path, rb.path);
    assert!(ra.path.exists() && rb.path.exists());
  }

  #[test]
  fn archiving_twice_is_stable() {
    let src = TempDir::new().unwrap();
    fs::write(src.path().join("file"), "same").unwrap();
    let downloads = TempDir::new().unwrap();

    let first = archive_dir(src.path(), downloads.path()).unwrap();
    let second = archive_dir(src.path(), downloads.path()).unwrap();

    assert_eq!(first, second);
  }

  #[test]
  fn missing_dir_is_rejected() {
    let downloads = TempDir::new().unwrap();
    let result = archive_dir(&downloads.path().join("nope"), downloads.path());
    assert!(matches!(result, Err(SourceError::PathNotFound(_))));
  }
}
