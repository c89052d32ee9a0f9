//! Prebuilt dependencies made visible to the build.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use super::types::{Dependency, DependencyError};
use super::workspace::Workspace;
use crate::platform::Platform;
use crate::util::fs::copy_symlink;

/// Files a dependency added to the prefix, so they can be taken out again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedDependency {
  pub name: String,
  pub files: Vec<PathBuf>,
}

/// Makes dependencies available during the build and removes them before packaging.
pub trait DependencyMaterializer {
  fn attach(
    &self,
    workspace: &Workspace,
    deps: &[Dependency],
    platform: &Platform,
  ) -> Result<Vec<AttachedDependency>, DependencyError>;

  fn detach(&self, handles: Vec<AttachedDependency>) -> Result<(), DependencyError>;
}

/// Copies each dependency's prefix tree into the workspace prefix.
///
/// A dependency directory may hold one subdirectory per triplet; the one
/// matching the platform is used when present. Files already in the prefix
/// are left alone and not recorded.
#[derive(Debug, Clone, Default)]
pub struct CopyMaterializer;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> DependencyError + '_ {
  move |source| DependencyError::Io {
    path: path.to_path_buf(),
    source,
  }
}

fn dependency_root(dep: &Dependency, platform: &Platform) -> Option<PathBuf> {
  let per_platform = dep.path.join(platform.triplet());
  if per_platform.is_dir() {
    return Some(per_platform);
  }
  let per_base = dep.path.join(platform.base().triplet());
  if per_base.is_dir() {
    return Some(per_base);
  }
  dep.path.is_dir().then(|| dep.path.clone())
}

impl DependencyMaterializer for CopyMaterializer {
  fn attach(
    &self,
    workspace: &Workspace,
    deps: &[Dependency],
    platform: &Platform,
  ) -> Result<Vec<AttachedDependency>, DependencyError> {
    let prefix = workspace.destdir();
    let mut handles = Vec::with_capacity(deps.len());

    for dep in deps {
      let root = dependency_root(dep, platform).ok_or_else(|| DependencyError::NotFound {
        name: dep.name.clone(),
        path: dep.path.clone(),
      })?;

      let mut files = Vec::new();
      for entry in WalkDir::new(&root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| DependencyError::Io {
          path: root.clone(),
          source: e.into(),
        })?;
        let rel = entry.path().strip_prefix(&root).unwrap_or(entry.path());
        let dest = prefix.join(rel);

        if entry.file_type().is_dir() {
          fs::create_dir_all(&dest).map_err(io_err(&dest))?;
          continue;
        }
        if dest.symlink_metadata().is_ok() {
          debug!(dependency = %dep.name, file = %rel.display(), "already present, not attaching");
          continue;
        }
        if entry.file_type().is_symlink() {
          copy_symlink(entry.path(), &dest).map_err(io_err(&dest))?;
        } else {
          fs::copy(entry.path(), &dest).map_err(io_err(&dest))?;
        }
        files.push(dest);
      }

      info!(dependency = %dep.name, files = files.len(), %platform, "attached dependency");
      handles.push(AttachedDependency {
        name: dep.name.clone(),
        files,
      });
    }
    Ok(handles)
  }

  fn detach(&self, handles: Vec<AttachedDependency>) -> Result<(), DependencyError> {
    for handle in handles {
      for file in &handle.files {
        match fs::remove_file(file) {
          Ok(()) => {}
          Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
          Err(source) => {
            return Err(DependencyError::Io {
              path: file.clone(),
              source,
            });
          }
        }
      }
      debug!(dependency = %handle.name, files = handle.files.len(), "detached dependency");
    }
    Ok(())
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

  fn dep_tree(root: &Path, files: &[&str]) {
    for rel in files {
      let path = root.join(rel);
      fs::create_dir_all(path.parent().unwrap()).unwrap();
      fs::write(path, rel).unwrap();
    }
  }

  #[test]
  fn attach_then_detach_leaves_only_build_output() {
    let build_root = TempDir::new().unwrap();
    let ws = Workspace::create(build_root.path(), &platform()).unwrap();
    let dep_dir = TempDir::new().unwrap();
    dep_tree(dep_dir.path(), &["include/zlib.h", "lib/libz.so"]);
    let deps = vec![Dependency {
      name: "Zlib".to_string(),
      path: dep_dir.path().to_path_buf(),
    }];

    let handles = CopyMaterializer.attach(&ws, &deps, &platform()).unwrap();
    assert!(ws.destdir().join("include/zlib.h").exists());
    fs::write(ws.destdir().join("lib/libpng.so"), "png").unwrap();

    CopyMaterializer.detach(handles).unwrap();

    assert!(!ws.destdir().join("include/zlib.h").exists());
    assert!(!ws.destdir().join("lib/libz.so").exists());
    assert!(ws.destdir().join("lib/libpng.so").exists());
  }

  #[test]
  fn per_triplet_directory_is_preferred() {
    let build_root = TempDir::new().unwrap();
    let ws = Workspace::create(build_root.path(), &platform()).unwrap();
    let dep_dir = TempDir::new().unwrap();
    dep_tree(
      dep_dir.path(),
      &["x86_64-linux-gnu/lib/libz.so", "aarch64-linux-gnu/lib/libz-arm.so"],
    );
    let deps = vec![Dependency {
      name: "Zlib".to_string(),
      path: dep_dir.path().to_path_buf(),
    }];

    let handles = CopyMaterializer.attach(&ws, &deps, &platform()).unwrap();

    assert_eq!(handles[0].files, vec![ws.destdir().join("lib/libz.so")]);
  }

  #[test]
  fn missing_dependency_is_an_error() {
    let build_root = TempDir::new().unwrap();
    let ws = Workspace::create(build_root.path(), &platform()).unwrap();
    let deps = vec![Dependency {
      name: "Ghost".to_string(),
      path: build_root.path().join("nope"),
    }];

    let err = CopyMaterializer.attach(&ws, &deps, &platform()).unwrap_err();
    assert!(matches!(err, DependencyError::NotFound { .. }));
  }
}
