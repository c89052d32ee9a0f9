//! Shared fixtures for integration tests.

use std::fs;
use std::path::{Path, PathBuf};

use semver::Version;
use tempfile::TempDir;

use binforge_lib::build::{BuildFlags, BuildRequest, CompilerConfig, Dependency};
use binforge_lib::platform::{Arch, Libc, Platform};
use binforge_lib::product::Product;
use binforge_lib::source::{SourceCache, SourceResolver};

pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  pub fn path(&self) -> &Path {
    self.temp.path()
  }

  pub fn output_dir(&self) -> PathBuf {
    self.path().join("products")
  }

  pub fn resolver(&self) -> SourceResolver {
    SourceResolver::new(SourceCache::new(self.path().join("cache"))).unwrap()
  }

  /// Write `files` (relative path, content) under `dir` and return its path.
  pub fn tree(&self, dir: &str, files: &[(&str, &str)]) -> PathBuf {
    let root = self.path().join(dir);
    for (rel, content) in files {
      let path = root.join(rel);
      fs::create_dir_all(path.parent().unwrap()).unwrap();
      fs::write(path, content).unwrap();
    }
    fs::create_dir_all(&root).unwrap();
    root
  }

  pub fn request(&self, script: &str, products: Vec<Product>) -> BuildRequest {
    BuildRequest {
      name: "Demo".to_string(),
      version: Version::new(2, 1, 0),
      script: script.to_string(),
      platforms: vec![linux()],
      products,
      dependencies: Vec::<Dependency>::new(),
      compilers: CompilerConfig::default(),
      flags: BuildFlags::default(),
      build_root: self.path().join("build"),
      output_dir: self.output_dir(),
      heartbeat: None,
    }
  }
}

pub fn linux() -> Platform {
  Platform::linux(Arch::X86_64, Libc::Glibc)
}
