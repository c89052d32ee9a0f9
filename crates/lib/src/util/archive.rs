//! Deterministic tarball creation and source archive extraction.
//!
//! Tarballs are written with sorted entries, zeroed ownership, a fixed mtime
//! and normalized permissions, so the same tree always produces the same bytes.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::consts::SOURCE_DATE_EPOCH;
use crate::util::hash::{ContentHash, is_executable};

#[derive(Debug, Error)]
pub enum ArchiveError {
  #[error("io error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to walk {path}: {message}")]
  Walk { path: PathBuf, message: String },

  #[error("failed to extract zip archive {path}: {message}")]
  Zip { path: PathBuf, message: String },

  #[error("unsupported archive format: {0}")]
  Unsupported(PathBuf),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + '_ {
  move |source| ArchiveError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// Writer adapter that hashes everything passing through it.
struct HashingWriter<W> {
  inner: W,
  hasher: Sha256,
}

impl<W: Write> Write for HashingWriter<W> {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    let n = self.inner.write(buf)?;
    self.hasher.update(&buf[..n]);
    Ok(n)
  }

  fn flush(&mut self) -> io::Result<()> {
    self.inner.flush()
  }
}

/// Archive `src` into a gzip-compressed tarball at `dest`.
///
/// Returns the SHA-256 of the written bytes. An existing file at `dest` is replaced.
pub fn write_tarball(src: &Path, dest: &Path) -> Result<ContentHash, ArchiveError> {
  if let Some(parent) = dest.parent() {
    fs::create_dir_all(parent).map_err(io_err(parent))?;
  }
  let file = File::create(dest).map_err(io_err(dest))?;
  let writer = HashingWriter {
    inner: BufWriter::new(file),
    hasher: Sha256::new(),
  };
  let mut builder = tar::Builder::new(GzEncoder::new(writer, Compression::default()));
  builder.follow_symlinks(false);

  for entry in WalkDir::new(src).sort_by_file_name() {
    let entry = entry.map_err(|e| ArchiveError::Walk {
      path: src.to_path_buf(),
      message: e.to_string(),
    })?;
    let path = entry.path();
    let rel = match path.strip_prefix(src) {
      Ok(rel) if !rel.as_os_str().is_empty() => rel,
      _ => continue,
    };

    let mut header = tar::Header::new_gnu();
    header.set_mtime(SOURCE_DATE_EPOCH);
    header.set_uid(0);
    header.set_gid(0);

    let file_type = entry.file_type();
    if file_type.is_dir() {
      header.set_entry_type(tar::EntryType::Directory);
      header.set_mode(0o755);
      header.set_size(0);
      builder.append_data(&mut header, rel, io::empty()).map_err(io_err(path))?;
    } else if file_type.is_symlink() {
      let target = fs::read_link(path).map_err(io_err(path))?;
      header.set_entry_type(tar::EntryType::Symlink);
      header.set_mode(0o777);
      header.set_size(0);
      builder.append_link(&mut header, rel, &target).map_err(io_err(path))?;
    } else if file_type.is_file() {
      let file = File::open(path).map_err(io_err(path))?;
      let len = file.metadata().map_err(io_err(path))?.len();
      header.set_entry_type(tar::EntryType::Regular);
      header.set_mode(if is_executable(path) { 0o755 } else { 0o644 });
      header.set_size(len);
      builder.append_data(&mut header, rel, file).map_err(io_err(path))?;
    }
  }

  let encoder = builder.into_inner().map_err(io_err(dest))?;
  let mut writer = encoder.finish().map_err(io_err(dest))?;
  writer.flush().map_err(io_err(dest))?;

  debug!(src = %src.display(), dest = %dest.display(), "wrote tarball");
  Ok(ContentHash::from_hasher(writer.hasher))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
  TarGz,
  Tar,
  Zip,
}

fn archive_kind(path: &Path) -> Option<ArchiveKind> {
  let name = path.file_name()?.to_str()?.to_ascii_lowercase();
  if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
    Some(ArchiveKind::TarGz)
  } else if name.ends_with(".tar") {
    Some(ArchiveKind::Tar)
  } else if name.ends_with(".zip") {
    Some(ArchiveKind::Zip)
  } else {
    None
  }
}

/// Returns true if [`unpack`] knows how to extract `path`.
pub fn is_archive(path: &Path) -> bool {
  archive_kind(path).is_some()
}

/// Extract an archive into `dest`, creating it if needed.
pub fn unpack(archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
  let kind = archive_kind(archive).ok_or_else(|| ArchiveError::Unsupported(archive.to_path_buf()))?;
  fs::create_dir_all(dest).map_err(io_err(dest))?;
  let file = BufReader::new(File::open(archive).map_err(io_err(archive))?);

  debug!(archive = %archive.display(), dest = %dest.display(), "unpacking");
  match kind {
    ArchiveKind::TarGz => tar::Archive::new(GzDecoder::new(file))
      .unpack(dest)
      .map_err(io_err(archive)),
    ArchiveKind::Tar => tar::Archive::new(file).unpack(dest).map_err(io_err(archive)),
    ArchiveKind::Zip => {
      let mut zip = zip::ZipArchive::new(file).map_err(|e| ArchiveError::Zip {
        path: archive.to_path_buf(),
        message: e.to_string(),
      })?;
      zip.extract(dest).map_err(|e| ArchiveError::Zip {
        path: archive.to_path_buf(),
        message: e.to_string(),
      })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::hash::hash_file;
  use tempfile::TempDir;

  fn sample_tree() -> TempDir {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("lib")).unwrap();
    fs::create_dir_all(temp.path().join("share/empty")).unwrap();
    fs::write(temp.path().join("lib/libfoo.so"), b"\x7fELF fake").unwrap();
    fs::write(temp.path().join("README"), "hello").unwrap();
    temp
  }

  #[test]
  fn same_tree_same_bytes() {
    let tree = sample_tree();
    let out = TempDir::new().unwrap();

    let a = write_tarball(tree.path(), &out.path().join("a.tar.gz")).unwrap();
    let b = write_tarball(tree.path(), &out.path().join("b.tar.gz")).unwrap();

    assert_eq!(a, b);
    assert_eq!(a, hash_file(&out.path().join("a.tar.gz")).unwrap());
  }

  #[test]
  fn unpack_restores_tree() {
    let tree = sample_tree();
    let out = TempDir::new().unwrap();
    let tarball = out.path().join("tree.tar.gz");
    write_tarball(tree.path(), &tarball).unwrap();

    let dest = out.path().join("unpacked");
    unpack(&tarball, &dest).unwrap();

    assert_eq!(fs::read_to_string(dest.join("README")).unwrap(), "hello");
    assert!(dest.join("share/empty").is_dir());
  }

  #[test]
  fn unknown_extension_is_unsupported() {
    let out = TempDir::new().unwrap();
    let file = out.path().join("source.rar");
    fs::write(&file, "x").unwrap();

    assert!(!is_archive(&file));
    assert!(matches!(unpack(&file, out.path()), Err(ArchiveError::Unsupported(_))));
  }
}
