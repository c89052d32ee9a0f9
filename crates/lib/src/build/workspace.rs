//! Per-platform build workspaces.
//!
//! ```text
//! <build_root>/<triplet>/<random>/
//! ├── srcdir/    unpacked sources, the script's working directory
//! ├── destdir/   install prefix, packaged afterwards
//! └── metadir/   logs, saved environment, failure snapshots
//! ```
//!
//! Several invocations may build the same triplet under one build root, so
//! the `<triplet>` parent is only removed once it is empty.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::platform::Platform;
use crate::util::fs::remove_dir_if_empty;

#[derive(Debug)]
pub struct Workspace {
  dir: TempDir,
  parent: PathBuf,
  srcdir: PathBuf,
  destdir: PathBuf,
  metadir: PathBuf,
}

impl Workspace {
  pub fn create(build_root: &Path, platform: &Platform) -> io::Result<Self> {
    let parent = build_root.join(platform.triplet());
    fs::create_dir_all(&parent)?;
    let dir = tempfile::Builder::new().prefix("ws-").rand_bytes(10).tempdir_in(&parent)?;

    let root = dir.path();
    let srcdir = root.join("srcdir");
    let destdir = root.join("destdir");
    let metadir = root.join("metadir");
    for d in [&srcdir, &destdir, &metadir] {
      fs::create_dir_all(d)?;
    }
    debug!(workspace = %root.display(), %platform, "created workspace");

    Ok(Self {
      dir,
      parent,
      srcdir,
      destdir,
      metadir,
    })
  }

  pub fn root(&self) -> &Path {
    self.dir.path()
  }

  pub fn srcdir(&self) -> &Path {
    &self.srcdir
  }

  /// The install prefix.
  pub fn destdir(&self) -> &Path {
    &self.destdir
  }

  pub fn metadir(&self) -> &Path {
    &self.metadir
  }

  pub fn logdir(&self) -> PathBuf {
    self.metadir.join("logs")
  }

  /// Remove the workspace, then its `<triplet>` parent if nothing else lives there.
  ///
  /// Returns whether the parent was removed.
  pub fn destroy(self) -> io::Result<bool> {
    let Workspace { dir, parent, .. } = self;
    dir.close()?;
    let removed = remove_dir_if_empty(&parent)?;
    debug!(parent = %parent.display(), removed, "destroyed workspace");
    Ok(removed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::platform::{Arch, Libc};
  use tempfile::TempDir;

  fn platform() -> Platform {
    Platform::linux(Arch::X86_64, Libc::Glibc)
  }

  #[test]
  fn layout_is_created() {
    let root = TempDir::new().unwrap();
    let ws = Workspace::create(root.path(), &platform()).unwrap();

    assert!(ws.srcdir().is_dir());
    assert!(ws.destdir().is_dir());
    assert!(ws.metadir().is_dir());
    assert_eq!(ws.root().parent().unwrap(), root.path().join("x86_64-linux-gnu"));
  }

  #[test]
  fn destroy_removes_empty_parent() {
    let root = TempDir::new().unwrap();
    let ws = Workspace::create(root.path(), &platform()).unwrap();
    fs::write(ws.destdir().join("file"), "x").unwrap();

    assert!(ws.destroy().unwrap());
    assert!(!root.path().join("x86_64-linux-gnu").exists());
  }

  #[test]
  fn destroy_keeps_parent_with_sibling() {
    let root = TempDir::new().unwrap();
    let ours = Workspace::create(root.path(), &platform()).unwrap();
    let sibling = Workspace::create(root.path(), &platform()).unwrap();
    fs::write(sibling.destdir().join("artifact"), "x").unwrap();
    let ours_root = ours.root().to_path_buf();

    assert!(!ours.destroy().unwrap());

    assert!(!ours_root.exists());
    assert!(root.path().join("x86_64-linux-gnu").is_dir());
    assert!(sibling.destdir().join("artifact").exists());
  }
}
