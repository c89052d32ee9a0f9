//! The per-platform build loop.
//!
//! Platforms are built one after another. For each one:
//!
//! 1. create a workspace and unpack every resolved source into `srcdir`
//! 2. attach dependencies
//! 3. run the build script with the standard hooks
//! 4. on failure, optionally open a debug shell, then fail
//! 5. audit the prefix
//! 6. verify every declared product exists
//! 7. record product paths and sonames
//! 8. detach dependencies
//! 9. drop empty directories
//! 10. package the prefix
//! 11. destroy the workspace
//! 12. record the artifact
//!
//! Nothing in here is retried. The first failing platform ends the run.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info, warn};

use super::audit::{AuditOptions, Auditor};
use super::deps::DependencyMaterializer;
use super::heartbeat::Heartbeat;
use super::package::Packager;
use super::runner::{BuildHooks, BuildRunner, LogSink, RunRequest};
use super::types::{ArtifactMeta, BuildError, BuildOutputMeta, BuildRequest, ProductInfo};
use super::workspace::Workspace;
use crate::platform::Platform;
use crate::product::Product;
use crate::source::{ResolvedSource, unpack_into};
use crate::util::fs::{copy_tree, remove_empty_dirs};

/// The collaborators a build loop drives.
pub struct BuildTools<'a, R> {
  pub runner: &'a R,
  pub auditor: &'a dyn Auditor,
  pub materializer: &'a dyn DependencyMaterializer,
  pub packager: &'a dyn Packager,
}

/// A configured build loop, ready to run.
pub struct PlatformBuildLoop<'a, R> {
  pub request: &'a BuildRequest,
  pub sources: &'a [ResolvedSource],
  pub tools: BuildTools<'a, R>,
}

impl<R: BuildRunner> PlatformBuildLoop<'_, R> {
  pub async fn run(&self) -> Result<BuildOutputMeta, BuildError> {
    build_platforms(self.request, self.sources, &self.tools).await
  }
}

/// Build every platform in `request` and collect their artifacts.
pub async fn build_platforms<R: BuildRunner>(
  request: &BuildRequest,
  sources: &[ResolvedSource],
  tools: &BuildTools<'_, R>,
) -> Result<BuildOutputMeta, BuildError> {
  let heartbeat = request
    .heartbeat
    .map(|interval| Heartbeat::start(interval, request.name.clone()));

  let mut meta = BuildOutputMeta::new();
  let mut result = Ok(());
  for platform in &request.platforms {
    match build_platform(request, sources, tools, platform).await {
      Ok(artifact) => {
        if let Err(e) = meta.record(*platform, artifact) {
          result = Err(e);
          break;
        }
      }
      Err(e) => {
        result = Err(e);
        break;
      }
    }
  }

  if let Some(heartbeat) = heartbeat {
    heartbeat.stop().await;
  }
  result?;

  info!(package = %request.name, platforms = meta.len(), "all platforms built");
  Ok(meta)
}

async fn build_platform<R: BuildRunner>(
  request: &BuildRequest,
  sources: &[ResolvedSource],
  tools: &BuildTools<'_, R>,
  platform: &Platform,
) -> Result<ArtifactMeta, BuildError> {
  info!(package = %request.name, %platform, "building");
  let workspace = Workspace::create(&request.build_root, platform).map_err(|source| BuildError::Io {
    path: request.build_root.clone(),
    source,
  })?;

  let result = build_in_workspace(request, sources, tools, platform, &workspace).await;

  preserve_logs(&workspace, &request.output_dir, platform);
  let root = workspace.root().to_path_buf();
  if let Err(e) = workspace.destroy() {
    warn!(workspace = %root.display(), error = %e, "failed to remove workspace");
  }

  let artifact = result?;
  info!(package = %request.name, %platform, tarball = %artifact.tarball_name, "platform done");
  Ok(artifact)
}

async fn build_in_workspace<R: BuildRunner>(
  request: &BuildRequest,
  sources: &[ResolvedSource],
  tools: &BuildTools<'_, R>,
  platform: &Platform,
  workspace: &Workspace,
) -> Result<ArtifactMeta, BuildError> {
  let package = request.name.as_str();
  let flags = request.flags;
  let prefix = workspace.destdir();

  for source in sources {
    unpack_into(source, workspace.srcdir())?;
  }

  let attached = tools.materializer.attach(workspace, &request.dependencies, platform)?;

  let log = LogSink::for_build(workspace, package, flags.verbose);
  let hooks = BuildHooks::standard();
  let status = tools
    .runner
    .run(RunRequest {
      package,
      workspace,
      platform,
      compilers: &request.compilers,
      script: &request.script,
      log: &log,
      hooks: &hooks,
    })
    .await
    .map_err(|e| BuildError::Runner {
      package: package.to_string(),
      platform: *platform,
      message: e.to_string(),
    })?;

  if !status.success() {
    if flags.debug
      && let Err(e) = tools
        .runner
        .run_interactive(workspace, platform, &request.compilers)
        .await
    {
      warn!(error = %e, "debug shell failed");
    }
    return Err(BuildError::ScriptFailed {
      package: package.to_string(),
      platform: *platform,
      code: status.code,
    });
  }

  if !flags.skip_audit {
    let options = AuditOptions {
      autofix: flags.autofix,
      require_license: flags.require_license,
    };
    let report = tools
      .auditor
      .audit(prefix, package, platform, options)
      .map_err(|source| BuildError::Io {
        path: prefix.to_path_buf(),
        source,
      })?;
    if !report.passed() {
      if !flags.ignore_audit_errors {
        return Err(BuildError::AuditFailed {
          package: package.to_string(),
          platform: *platform,
          issues: report.issues,
        });
      }
      for issue in &report.issues {
        warn!(%platform, issue = %issue, "audit issue ignored");
      }
    }
  }

  let products = locate_products(request, tools.auditor, platform, prefix)?;

  tools.materializer.detach(attached)?;

  if !flags.skip_audit {
    let removed = remove_empty_dirs(prefix).map_err(|source| BuildError::Io {
      path: prefix.to_path_buf(),
      source,
    })?;
    debug!(removed, "removed empty directories");
  }

  let packaged = tools.packager.package(prefix, package, &request.version, platform)?;
  let tarball_name = packaged
    .tarball
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();

  Ok(ArtifactMeta {
    tarball_name,
    tarball_hash: packaged.content_hash,
    tree_hash: packaged.tree_hash,
    products,
  })
}

fn locate_products(
  request: &BuildRequest,
  auditor: &dyn Auditor,
  platform: &Platform,
  prefix: &Path,
) -> Result<BTreeMap<Product, ProductInfo>, BuildError> {
  let mut found = BTreeMap::new();
  let mut missing = Vec::new();

  for product in &request.products {
    match product.locate(prefix, platform, false) {
      Some(path) => {
        let soname = match product {
          Product::Library { .. } => auditor
            .soname(&prefix.join(&path))
            .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned())),
          _ => None,
        };
        found.insert(product.clone(), ProductInfo { path, soname });
      }
      None => missing.push(product),
    }
  }

  if missing.is_empty() {
    return Ok(found);
  }

  for product in &missing {
    warn!(%platform, product = %product, "declared product not found");
    product.locate(prefix, platform, true);
  }
  Err(BuildError::MissingProducts {
    package: request.name.clone(),
    platform: *platform,
    products: missing.iter().map(|p| p.describe()).collect(),
  })
}

/// Copy `metadir/logs` to `<output_dir>/logs/<triplet>` so logs outlive the workspace.
fn preserve_logs(workspace: &Workspace, output_dir: &Path, platform: &Platform) {
  let logdir = workspace.logdir();
  if !logdir.is_dir() {
    return;
  }
  let dest = output_dir.join("logs").join(platform.triplet());
  if let Err(e) = copy_tree(&logdir, &dest) {
    warn!(dest = %dest.display(), error = %e, "failed to preserve build logs");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::build::audit::{AuditReport, BasicAuditor};
  use crate::build::deps::CopyMaterializer;
  use crate::build::package::TarballPackager;
  use crate::build::runner::RunStatus;
  use crate::build::types::{BuildFlags, CompilerConfig, Dependency};
  use crate::platform::{Arch, Libc};
  use semver::Version;
  use std::fs;
  use std::io;
  use std::sync::Mutex;
  use tempfile::TempDir;

  type Script = Box<dyn Fn(&Workspace, &Platform) -> i32>;

  /// Runs a closure instead of a shell script.
  struct FakeRunner {
    script: Script,
    runs: Mutex<Vec<Platform>>,
    interactive: Mutex<usize>,
  }

  impl FakeRunner {
    fn new(script: impl Fn(&Workspace, &Platform) -> i32 + 'static) -> Self {
      Self {
        script: Box::new(script),
        runs: Mutex::new(Vec::new()),
        interactive: Mutex::new(0),
      }
    }
  }

  impl BuildRunner for FakeRunner {
    async fn run(&self, request: RunRequest<'_>) -> io::Result<RunStatus> {
      self.runs.lock().unwrap().push(*request.platform);
      let code = (self.script)(request.workspace, request.platform);
      Ok(RunStatus { code: Some(code) })
    }

    async fn run_interactive(
      &self,
      _workspace: &Workspace,
      _platform: &Platform,
      _compilers: &CompilerConfig,
    ) -> io::Result<()> {
      *self.interactive.lock().unwrap() += 1;
      Ok(())
    }
  }

  struct FailingAuditor;

  impl Auditor for FailingAuditor {
    fn audit(&self, _: &Path, _: &str, _: &Platform, _: AuditOptions) -> io::Result<AuditReport> {
      Ok(AuditReport {
        issues: vec!["bin/tool: contains the build prefix".to_string()],
      })
    }
  }

  struct Fixture {
    _root: TempDir,
    request: BuildRequest,
  }

  fn fixture(platforms: Vec<Platform>, products: Vec<Product>) -> Fixture {
    let root = TempDir::new().unwrap();
    let request = BuildRequest {
      name: "Demo".to_string(),
      version: Version::parse("1.0.0").unwrap(),
      script: "make install".to_string(),
      platforms,
      products,
      dependencies: Vec::new(),
      compilers: CompilerConfig::default(),
      flags: BuildFlags::default(),
      build_root: root.path().join("build"),
      output_dir: root.path().join("products"),
      heartbeat: None,
    };
    Fixture { _root: root, request }
  }

  fn linux() -> Platform {
    Platform::linux(Arch::X86_64, Libc::Glibc)
  }

  fn install(ws: &Workspace, rel: &str) {
    let path = ws.destdir().join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "payload").unwrap();
    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
  }

  async fn run_loop(request: &BuildRequest, runner: &FakeRunner, auditor: &dyn Auditor) -> Result<BuildOutputMeta, BuildError> {
    let packager = TarballPackager::new(&request.output_dir);
    let tools = BuildTools {
      runner,
      auditor,
      materializer: &CopyMaterializer,
      packager: &packager,
    };
    build_platforms(request, &[], &tools).await
  }

  #[tokio::test]
  async fn builds_every_platform_in_order() {
    let aarch64 = Platform::linux(Arch::Aarch64, Libc::Glibc);
    let fx = fixture(
      vec![linux(), aarch64],
      vec![Product::executable("tool"), Product::library("libdemo")],
    );
    let runner = FakeRunner::new(|ws, _| {
      install(ws, "bin/tool");
      install(ws, "lib/libdemo.so.1");
      0
    });

    let meta = run_loop(&fx.request, &runner, &BasicAuditor).await.unwrap();

    assert_eq!(*runner.runs.lock().unwrap(), vec![linux(), aarch64]);
    assert_eq!(meta.len(), 2);
    let artifact = meta.get(&linux()).unwrap();
    assert_eq!(artifact.tarball_name, "Demo.v1.0.0.x86_64-linux-gnu.tar.gz");
    assert!(fx.request.output_dir.join(&artifact.tarball_name).exists());
    let lib = &artifact.products[&Product::library("libdemo")];
    assert_eq!(lib.path, Path::new("lib/libdemo.so.1"));
    assert_eq!(lib.soname.as_deref(), Some("libdemo.so.1"));
    assert_eq!(artifact.products[&Product::executable("tool")].soname, None);
  }

  #[tokio::test]
  async fn library_metadata_follows_soname() {
    let fx = fixture(vec![linux()], vec![Product::library("libdemo")]);
    let runner = FakeRunner::new(|ws, _| {
      let elf = crate::util::soname::elf_with_soname("libdemo.so.1");
      for name in ["libdemo.so", "libdemo.so.1", "libdemo.so.1.4.0"] {
        install(ws, &format!("lib/{}", name));
        fs::write(ws.destdir().join("lib").join(name), &elf).unwrap();
      }
      0
    });

    let meta = run_loop(&fx.request, &runner, &BasicAuditor).await.unwrap();

    let lib = &meta.get(&linux()).unwrap().products[&Product::library("libdemo")];
    assert_eq!(lib.path, Path::new("lib/libdemo.so.1"));
    assert_eq!(lib.soname.as_deref(), Some("libdemo.so.1"));
  }

  #[tokio::test]
  async fn missing_product_fails_despite_clean_exit() {
    let fx = fixture(vec![linux()], vec![Product::executable("tool")]);
    let runner = FakeRunner::new(|ws, _| {
      install(ws, "share/doc/README");
      0
    });

    let err = run_loop(&fx.request, &runner, &BasicAuditor).await.unwrap_err();

    match err {
      BuildError::MissingProducts { package, platform, products } => {
        assert_eq!(package, "Demo");
        assert_eq!(platform, linux());
        assert_eq!(products, vec!["executable:tool".to_string()]);
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[tokio::test]
  async fn script_failure_stops_remaining_platforms() {
    let fx = fixture(vec![linux(), Platform::linux(Arch::Aarch64, Libc::Glibc)], vec![]);
    let runner = FakeRunner::new(|_, _| 2);

    let err = run_loop(&fx.request, &runner, &BasicAuditor).await.unwrap_err();

    assert!(matches!(err, BuildError::ScriptFailed { code: Some(2), .. }));
    assert_eq!(runner.runs.lock().unwrap().len(), 1);
    assert_eq!(*runner.interactive.lock().unwrap(), 0);
  }

  #[tokio::test]
  async fn debug_opens_shell_then_still_fails() {
    let mut fx = fixture(vec![linux()], vec![]);
    fx.request.flags.debug = true;
    let runner = FakeRunner::new(|_, _| 1);

    let err = run_loop(&fx.request, &runner, &BasicAuditor).await.unwrap_err();

    assert!(matches!(err, BuildError::ScriptFailed { .. }));
    assert_eq!(*runner.interactive.lock().unwrap(), 1);
  }

  #[tokio::test]
  async fn audit_failure_aborts_unless_ignored() {
    let mut fx = fixture(vec![linux()], vec![]);
    let runner = FakeRunner::new(|ws, _| {
      install(ws, "bin/tool");
      0
    });

    let err = run_loop(&fx.request, &runner, &FailingAuditor).await.unwrap_err();
    assert!(matches!(err, BuildError::AuditFailed { .. }));

    fx.request.flags.ignore_audit_errors = true;
    let meta = run_loop(&fx.request, &runner, &FailingAuditor).await.unwrap();
    assert_eq!(meta.len(), 1);
  }

  #[tokio::test]
  async fn skip_audit_never_calls_auditor() {
    let mut fx = fixture(vec![linux()], vec![]);
    fx.request.flags.skip_audit = true;
    let runner = FakeRunner::new(|ws, _| {
      install(ws, "bin/tool");
      0
    });

    let meta = run_loop(&fx.request, &runner, &FailingAuditor).await.unwrap();
    assert_eq!(meta.len(), 1);
  }

  #[tokio::test]
  async fn dependencies_are_not_packaged() {
    let dep = TempDir::new().unwrap();
    fs::create_dir_all(dep.path().join("include")).unwrap();
    fs::write(dep.path().join("include/zlib.h"), "header").unwrap();
    let mut fx = fixture(vec![linux()], vec![Product::file("include/demo.h")]);
    fx.request.dependencies = vec![Dependency {
      name: "Zlib".to_string(),
      path: dep.path().to_path_buf(),
    }];
    let runner = FakeRunner::new(|ws, _| {
      assert!(ws.destdir().join("include/zlib.h").exists(), "dependency visible during build");
      install(ws, "include/demo.h");
      0
    });

    let meta = run_loop(&fx.request, &runner, &BasicAuditor).await.unwrap();

    let tarball = fx.request.output_dir.join(&meta.get(&linux()).unwrap().tarball_name);
    let unpacked = TempDir::new().unwrap();
    crate::util::archive::unpack(&tarball, unpacked.path()).unwrap();
    assert!(unpacked.path().join("include/demo.h").exists());
    assert!(!unpacked.path().join("include/zlib.h").exists());
  }

  #[tokio::test]
  async fn empty_directories_are_pruned() {
    let fx = fixture(vec![linux()], vec![]);
    let runner = FakeRunner::new(|ws, _| {
      fs::create_dir_all(ws.destdir().join("share/man/man1")).unwrap();
      install(ws, "bin/tool");
      0
    });

    let meta = run_loop(&fx.request, &runner, &BasicAuditor).await.unwrap();

    let tarball = fx.request.output_dir.join(&meta.get(&linux()).unwrap().tarball_name);
    let unpacked = TempDir::new().unwrap();
    crate::util::archive::unpack(&tarball, unpacked.path()).unwrap();
    assert!(unpacked.path().join("bin/tool").exists());
    assert!(!unpacked.path().join("share").exists());
  }

  #[tokio::test]
  async fn workspaces_are_cleaned_up() {
    let fx = fixture(vec![linux()], vec![]);
    let runner = FakeRunner::new(|ws, _| {
      install(ws, "bin/tool");
      0
    });

    run_loop(&fx.request, &runner, &BasicAuditor).await.unwrap();

    assert!(!fx.request.build_root.join("x86_64-linux-gnu").exists());
  }

  #[tokio::test]
  async fn failed_workspace_is_cleaned_and_sibling_parent_kept() {
    let fx = fixture(vec![linux()], vec![]);
    let sibling = Workspace::create(&fx.request.build_root, &linux()).unwrap();
    fs::write(sibling.destdir().join("artifact"), "x").unwrap();
    let runner = FakeRunner::new(|_, _| 1);

    run_loop(&fx.request, &runner, &BasicAuditor).await.unwrap_err();

    let parent = fx.request.build_root.join("x86_64-linux-gnu");
    let remaining: Vec<_> = fs::read_dir(&parent).unwrap().collect();
    assert_eq!(remaining.len(), 1);
    assert!(sibling.destdir().join("artifact").exists());
  }
}
