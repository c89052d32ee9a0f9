//! Implementation of the `binforge build` command.
//!
//! Builds every platform of a recipe into `--output-dir`. With `--deploy`, the
//! build runs inside the deployment pipeline: the version is negotiated
//! against `--registry-dir`, the wrapper is pushed to the deploy repository,
//! an optional registry pull request is opened with `--register`, and the
//! tarballs are uploaded as release assets.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Args;

use binforge_lib::build::{
  BasicAuditor, BuildFlags, BuildOutputMeta, BuildTools, CopyMaterializer, ShellRunner, TarballPackager,
};
use binforge_lib::consts::{DEFAULT_BRANCH, RECIPE_FILE, TOKEN_ENV};
use binforge_lib::deploy::{
  ArtifactsTomlGenerator, DeployOutcome, DeployRequest, DeployTools, GitHubApi, GitHubForge, GitHubRegistryStaging,
  PushCredentials, RegistrationStatus, RepoId,
};
use binforge_lib::pipeline::{build_and_deploy, build_only, meta_path};
use binforge_lib::platform::Platform;
use binforge_lib::recipe::Recipe;
use binforge_lib::registry::DirRegistry;
use binforge_lib::source::{SourceCache, SourceResolver};

use crate::output::{
  OutputFormat, format_duration, parse_interval, print_info, print_json, print_stat, print_success, print_warning,
  truncate_hash,
};

#[derive(Args, Debug)]
pub struct BuildArgs {
  /// Path to the recipe
  #[arg(default_value = RECIPE_FILE)]
  pub recipe: PathBuf,

  /// Only build this platform (repeatable)
  #[arg(short, long = "platform", value_name = "TRIPLET")]
  pub platforms: Vec<Platform>,

  /// Open a shell in the workspace when the build script fails
  #[arg(long)]
  pub debug: bool,

  /// Skip the relocatability audit
  #[arg(long)]
  pub skip_audit: bool,

  /// Report audit failures as warnings
  #[arg(long)]
  pub ignore_audit_errors: bool,

  /// Let the audit fix what it can (libtool archives, pkg-config prefixes)
  #[arg(long)]
  pub autofix: bool,

  /// Fail when no license was installed
  #[arg(long)]
  pub require_license: bool,

  /// Where tarballs, logs and build-meta.json are written
  #[arg(long, default_value = "products")]
  pub output_dir: PathBuf,

  /// Parent directory of the per-platform workspaces
  #[arg(long, default_value = "build")]
  pub build_dir: PathBuf,

  /// Print a liveness line at this interval (seconds, or e.g. `5m`)
  #[arg(long, value_parser = parse_interval)]
  pub heartbeat: Option<Duration>,

  /// Deploy to this repository after building
  #[arg(long, value_name = "OWNER/REPO")]
  pub deploy: Option<RepoId>,

  /// Open a registration pull request against this registry repository
  #[arg(long, value_name = "OWNER/REPO", requires = "deploy")]
  pub register: Option<RepoId>,

  /// Local checkout of the registry, used to pick the build number
  #[arg(long, requires = "deploy")]
  pub registry_dir: Option<PathBuf>,

  /// Local checkout of the deploy repository (default: <build-dir>/<repo>)
  #[arg(long, requires = "deploy")]
  pub checkout: Option<PathBuf>,

  /// Branch the wrapper is pushed to
  #[arg(long, default_value = DEFAULT_BRANCH)]
  pub branch: String,
}

pub fn cmd_build(args: BuildArgs, verbose: bool, output: OutputFormat) -> Result<()> {
  let start = Instant::now();

  let mut recipe =
    Recipe::load(&args.recipe).with_context(|| format!("Failed to load recipe {}", args.recipe.display()))?;
  if !args.platforms.is_empty() {
    recipe.restrict_platforms(&args.platforms);
    if recipe.platforms.is_empty() {
      bail!("None of the requested platforms are built by {}", recipe.name);
    }
  }

  let flags = BuildFlags {
    verbose,
    debug: args.debug,
    skip_audit: args.skip_audit,
    ignore_audit_errors: args.ignore_audit_errors,
    autofix: args.autofix,
    require_license: args.require_license,
  };
  let output_dir = absolute(&args.output_dir)?;
  let build_root = absolute(&args.build_dir)?;
  let request = recipe.build_request(flags, &build_root, &output_dir, args.heartbeat);

  let resolver = SourceResolver::new(SourceCache::default_location()).context("Failed to set up the source cache")?;
  let runner = ShellRunner::new();
  let packager = TarballPackager::new(&output_dir);
  let tools = BuildTools {
    runner: &runner,
    auditor: &BasicAuditor,
    materializer: &CopyMaterializer,
    packager: &packager,
  };

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;

  let Some(repo) = args.deploy else {
    let meta = rt
      .block_on(build_only(&request, &recipe.sources, &resolver, tools))
      .context("Build failed")?;
    if output.is_json() {
      return print_json(&meta);
    }
    println!();
    print_success(&format!(
      "Built {} for {} platform(s) in {}",
      recipe.name,
      meta.len(),
      format_duration(start.elapsed())
    ));
    print_artifacts(&meta);
    print_stat("Metadata", &meta_path(&request).display().to_string());
    return Ok(());
  };

  let registry_dir = args
    .registry_dir
    .context("--registry-dir is required with --deploy")?;
  let token = std::env::var(TOKEN_ENV)
    .ok()
    .filter(|t| !t.is_empty())
    .with_context(|| format!("{} must be set to deploy", TOKEN_ENV))?;

  let api = GitHubApi::new(Some(token.clone())).context("Failed to create GitHub client")?;
  let forge = GitHubForge::new(api.clone());
  let staging = args.register.map(|registry| GitHubRegistryStaging::new(api, registry));
  let registry = DirRegistry::new(registry_dir);
  let generator = ArtifactsTomlGenerator::new(repo.clone());

  let mut deploy_request = DeployRequest {
    package: recipe.name.clone(),
    version: recipe.version.clone(),
    checkout: args.checkout.unwrap_or_else(|| build_root.join(&repo.name)),
    repo,
    branch: args.branch,
    dependencies: recipe.dependencies.clone(),
    output_dir: output_dir.clone(),
    credentials: PushCredentials::new(token),
  };
  let deploy_tools = DeployTools {
    forge: &forge,
    staging: staging.as_ref(),
    registry: &registry,
    generator: &generator,
  };

  let outcome = rt
    .block_on(build_and_deploy(
      &request,
      &recipe.sources,
      &resolver,
      tools,
      &mut deploy_request,
      deploy_tools,
    ))
    .context("Deploy failed")?;

  if output.is_json() {
    return print_json(&outcome_json(&outcome));
  }
  println!();
  print_success(&format!(
    "Deployed {} {} in {}",
    recipe.name,
    outcome.version,
    format_duration(start.elapsed())
  ));
  print_stat("Release", &outcome.tag);
  print_stat("Tree", truncate_hash(&outcome.tree_hash));
  match &outcome.registration {
    RegistrationStatus::NotRequested => print_info("Registration not requested"),
    RegistrationStatus::Submitted { url } => print_stat("Registration", url),
    RegistrationStatus::Failed { message } => print_warning(&format!("Registration failed: {}", message)),
  }
  print_artifacts(&outcome.meta);
  Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf> {
  std::path::absolute(path).with_context(|| format!("Failed to resolve {}", path.display()))
}

fn print_artifacts(meta: &BuildOutputMeta) {
  for (platform, artifact) in meta.iter() {
    print_stat(
      &platform.triplet(),
      &format!(
        "{} ({})",
        artifact.tarball_name,
        truncate_hash(&artifact.tarball_hash.to_string())
      ),
    );
  }
}

fn outcome_json(outcome: &DeployOutcome) -> serde_json::Value {
  let registration = match &outcome.registration {
    RegistrationStatus::NotRequested => serde_json::json!({ "status": "not_requested" }),
    RegistrationStatus::Submitted { url } => serde_json::json!({ "status": "submitted", "url": url }),
    RegistrationStatus::Failed { message } => serde_json::json!({ "status": "failed", "message": message }),
  };
  serde_json::json!({
    "version": outcome.version.to_string(),
    "tag": outcome.tag,
    "tree_hash": outcome.tree_hash,
    "registration": registration,
    "artifacts": outcome.meta,
  })
}
