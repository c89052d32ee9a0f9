//! Running build scripts.
//!
//! The loop hands a [`RunRequest`] to a [`BuildRunner`] and only looks at the
//! exit status. Lifecycle work that has to happen around the script (saving
//! state when it fails, installing licenses when it succeeds) travels with the
//! request as [`BuildHooks`] and is invoked by the runner.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, warn};

use super::types::CompilerConfig;
use super::workspace::Workspace;
use crate::consts::SOURCE_DATE_EPOCH;
use crate::platform::Platform;
use crate::util::fs::copy_tree;

/// Where script output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
  /// Inherit the terminal.
  Stream,
  /// Append stdout and stderr to this file.
  Buffer(PathBuf),
}

impl LogSink {
  /// `Stream` when verbose, otherwise `<metadir>/logs/<package>.log`.
  pub fn for_build(workspace: &Workspace, package: &str, verbose: bool) -> Self {
    if verbose {
      LogSink::Stream
    } else {
      LogSink::Buffer(workspace.logdir().join(format!("{}.log", package)))
    }
  }
}

/// What a hook gets to see.
pub struct HookContext<'a> {
  pub workspace: &'a Workspace,
  pub package: &'a str,
  pub script: &'a str,
  pub env: &'a BTreeMap<String, String>,
}

pub type Hook = Box<dyn Fn(&HookContext<'_>) -> io::Result<()> + Send + Sync>;

/// Callbacks run after the script exits.
pub struct BuildHooks {
  /// Runs after a non-zero exit.
  pub on_error: Hook,
  /// Runs after a clean exit.
  pub on_exit: Hook,
}

impl BuildHooks {
  /// No-op hooks.
  pub fn none() -> Self {
    Self {
      on_error: Box::new(|_| Ok(())),
      on_exit: Box::new(|_| Ok(())),
    }
  }

  /// The hooks every build gets.
  ///
  /// On error: save the script history, snapshot `srcdir`, save the
  /// environment. On exit: install license files, save the environment.
  pub fn standard() -> Self {
    Self {
      on_error: Box::new(|ctx| {
        save_history(ctx)?;
        snapshot_srcdir(ctx)?;
        save_env(ctx)
      }),
      on_exit: Box::new(|ctx| {
        install_licenses(ctx)?;
        save_env(ctx)
      }),
    }
  }
}

impl std::fmt::Debug for BuildHooks {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BuildHooks").finish_non_exhaustive()
  }
}

/// Write the script that ran to `metadir/history.sh`.
pub fn save_history(ctx: &HookContext<'_>) -> io::Result<()> {
  fs::write(ctx.workspace.metadir().join("history.sh"), ctx.script)
}

/// Copy the source tree as it was at failure to `metadir/srcdir`.
pub fn snapshot_srcdir(ctx: &HookContext<'_>) -> io::Result<()> {
  copy_tree(ctx.workspace.srcdir(), &ctx.workspace.metadir().join("srcdir"))
}

/// Write the build environment to `metadir/env`, one `KEY=value` per line.
pub fn save_env(ctx: &HookContext<'_>) -> io::Result<()> {
  let mut out = String::new();
  for (key, value) in ctx.env {
    out.push_str(key);
    out.push('=');
    out.push_str(value);
    out.push('\n');
  }
  fs::write(ctx.workspace.metadir().join("env"), out)
}

const LICENSE_STEMS: &[&str] = &["LICENSE", "LICENCE", "COPYING", "COPYRIGHT", "NOTICE", "UNLICENSE"];

fn is_license_file(name: &str) -> bool {
  let upper = name.to_ascii_uppercase();
  LICENSE_STEMS.iter().any(|stem| upper.starts_with(stem))
}

/// Copy license files found in `srcdir` (top level and one level down) into
/// `destdir/share/licenses/<package>`, unless the script installed some itself.
pub fn install_licenses(ctx: &HookContext<'_>) -> io::Result<()> {
  let dest = ctx
    .workspace
    .destdir()
    .join("share")
    .join("licenses")
    .join(ctx.package);
  if dest.is_dir() && fs::read_dir(&dest)?.next().is_some() {
    return Ok(());
  }

  let mut found = Vec::new();
  let srcdir = ctx.workspace.srcdir();
  for entry in fs::read_dir(srcdir)? {
    let entry = entry?;
    let path = entry.path();
    if path.is_dir() {
      for inner in fs::read_dir(&path)? {
        let inner = inner?.path();
        if inner.is_file() && is_license_file(&inner.file_name().unwrap_or_default().to_string_lossy()) {
          found.push(inner);
        }
      }
    } else if path.is_file() && is_license_file(&entry.file_name().to_string_lossy()) {
      found.push(path);
    }
  }

  if found.is_empty() {
    debug!(package = ctx.package, "no license files found");
    return Ok(());
  }
  fs::create_dir_all(&dest)?;
  for path in found {
    if let Some(name) = path.file_name() {
      fs::copy(&path, dest.join(name))?;
    }
  }
  Ok(())
}

/// One build script invocation.
pub struct RunRequest<'a> {
  pub package: &'a str,
  pub workspace: &'a Workspace,
  pub platform: &'a Platform,
  pub compilers: &'a CompilerConfig,
  pub script: &'a str,
  pub log: &'a LogSink,
  pub hooks: &'a BuildHooks,
}

/// How the script exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStatus {
  /// `None` when killed by a signal.
  pub code: Option<i32>,
}

impl RunStatus {
  pub const SUCCESS: RunStatus = RunStatus { code: Some(0) };

  pub fn success(&self) -> bool {
    self.code == Some(0)
  }
}

/// Executes build scripts for a platform.
pub trait BuildRunner {
  /// Run the script to completion. An `Err` means the script could not be
  /// started; a failing script is an `Ok` with a non-zero status.
  fn run(&self, request: RunRequest<'_>) -> impl Future<Output = io::Result<RunStatus>>;

  /// Open an interactive shell in the workspace for postmortem debugging,
  /// with the same environment the failed script had.
  fn run_interactive(
    &self,
    workspace: &Workspace,
    platform: &Platform,
    compilers: &CompilerConfig,
  ) -> impl Future<Output = io::Result<()>>;
}

/// Runs scripts with `/bin/sh -e` on the host, in an isolated environment.
///
/// The environment is cleared and rebuilt from scratch:
/// - `PATH` is carried over from the host so toolchains can be found
/// - `HOME` points at the metadir and `TMPDIR` below it
/// - `prefix`, `WORKSPACE`, `srcdir`, `target` and friends describe the build
/// - the compiler configuration adds `CC`, `CXX`, `FC` and so on
#[derive(Debug, Clone)]
pub struct ShellRunner {
  shell: PathBuf,
}

impl Default for ShellRunner {
  fn default() -> Self {
    Self {
      shell: PathBuf::from("/bin/sh"),
    }
  }
}

impl ShellRunner {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_shell(shell: impl Into<PathBuf>) -> Self {
    Self { shell: shell.into() }
  }

  /// The environment a build sees.
  pub fn environment(
    workspace: &Workspace,
    platform: &Platform,
    compilers: &CompilerConfig,
  ) -> io::Result<BTreeMap<String, String>> {
    let tmp = workspace.metadir().join("tmp");
    fs::create_dir_all(&tmp)?;

    let path = std::env::var("PATH").unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".to_string());
    let nproc = std::thread::available_parallelism().map_or(1, |n| n.get());
    let prefix = workspace.destdir();
    let lossy = |p: &Path| p.to_string_lossy().into_owned();

    let mut env = BTreeMap::from([
      ("PATH".to_string(), path),
      ("HOME".to_string(), lossy(workspace.metadir())),
      ("TMPDIR".to_string(), lossy(&tmp)),
      ("LANG".to_string(), "C".to_string()),
      ("LC_ALL".to_string(), "C".to_string()),
      ("SOURCE_DATE_EPOCH".to_string(), SOURCE_DATE_EPOCH.to_string()),
      ("WORKSPACE".to_string(), lossy(workspace.root())),
      ("srcdir".to_string(), lossy(workspace.srcdir())),
      ("prefix".to_string(), lossy(prefix)),
      ("bindir".to_string(), lossy(&prefix.join("bin"))),
      ("libdir".to_string(), lossy(&prefix.join(platform.os.libdirs()[0]))),
      ("includedir".to_string(), lossy(&prefix.join("include"))),
      ("target".to_string(), platform.triplet()),
      ("bb_full_target".to_string(), platform.triplet()),
      ("nproc".to_string(), nproc.to_string()),
      ("dlext".to_string(), platform.os.dlext().to_string()),
      ("exeext".to_string(), platform.os.exeext().to_string()),
    ]);
    if let Some(host) = Platform::current() {
      env.insert("MACHTYPE".to_string(), host.triplet());
    }
    env.extend(compilers.env(platform));
    Ok(env)
  }
}

impl BuildRunner for ShellRunner {
  async fn run(&self, request: RunRequest<'_>) -> io::Result<RunStatus> {
    let env = Self::environment(request.workspace, request.platform, request.compilers)?;

    let mut command = Command::new(&self.shell);
    command
      .arg("-e")
      .arg("-c")
      .arg(request.script)
      .current_dir(request.workspace.srcdir())
      .env_clear()
      .envs(&env)
      .stdin(Stdio::null());

    match request.log {
      LogSink::Stream => {
        command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
      }
      LogSink::Buffer(path) => {
        if let Some(parent) = path.parent() {
          fs::create_dir_all(parent)?;
        }
        let file = File::options().create(true).append(true).open(path)?;
        command.stdout(Stdio::from(file.try_clone()?)).stderr(Stdio::from(file));
      }
    }

    info!(package = request.package, platform = %request.platform, "running build script");
    let status = command.status().await?;
    let status = RunStatus { code: status.code() };
    debug!(code = ?status.code, "build script exited");

    let ctx = HookContext {
      workspace: request.workspace,
      package: request.package,
      script: request.script,
      env: &env,
    };
    let (hook, stage) = if status.success() {
      (&request.hooks.on_exit, "exit")
    } else {
      (&request.hooks.on_error, "error")
    };
    if let Err(e) = hook(&ctx) {
      warn!(stage, error = %e, "build hook failed");
    }

    Ok(status)
  }

  async fn run_interactive(
    &self,
    workspace: &Workspace,
    platform: &Platform,
    compilers: &CompilerConfig,
  ) -> io::Result<()> {
    let env = Self::environment(workspace, platform, compilers)?;
    eprintln!(
      "Build failed, opening a shell in {} (exit to continue)",
      workspace.root().display()
    );
    Command::new(&self.shell)
      .current_dir(workspace.srcdir())
      .env_clear()
      .envs(&env)
      .stdin(Stdio::inherit())
      .stdout(Stdio::inherit())
      .stderr(Stdio::inherit())
      .status()
      .await?;
    Ok(())
  }
}
