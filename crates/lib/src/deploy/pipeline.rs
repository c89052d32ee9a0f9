use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use semver::Version;
use thiserror::Error;
use tracing::{info, warn};

use super::codegen::WrapperGenerator;
use super::credentials::PushCredentials;
use super::forge::{Forge, ForgeError, Registration, RegistryStaging, RepoId, release_tag};
use super::retry::retry;
use crate::build::{BuildError, BuildOutputMeta, BuildRunner, Dependency, PlatformBuildLoop};
use crate::consts::UPLOAD_ATTEMPTS;
use crate::registry::{Registry, RegistryError, registered_name};
use crate::version::{BuildVersion, negotiate_version};

/// Produces the build output once the version is settled.
pub trait MetaProducer {
  fn produce(&self) -> impl Future<Output = Result<BuildOutputMeta, BuildError>>;
}

impl<R: BuildRunner> MetaProducer for PlatformBuildLoop<'_, R> {
  async fn produce(&self) -> Result<BuildOutputMeta, BuildError> {
    self.run().await
  }
}

#[derive(Debug)]
pub struct DeployRequest {
  pub package: String,
  pub version: Version,
  /// Repository the wrapper is committed to and released from.
  pub repo: RepoId,
  /// Local checkout of `repo`; cloned when missing.
  pub checkout: PathBuf,
  pub branch: String,
  pub dependencies: Vec<Dependency>,
  /// Directory holding the packaged tarballs.
  pub output_dir: PathBuf,
  /// Used for the push only, then invalidated.
  pub credentials: PushCredentials,
}

pub struct DeployTools<'a, F, S> {
  pub forge: &'a F,
  /// Registration is requested when set.
  pub staging: Option<&'a S>,
  pub registry: &'a dyn Registry,
  pub generator: &'a dyn WrapperGenerator,
}

/// Outcome of the registration step. Never fails the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationStatus {
  NotRequested,
  Submitted { url: String },
  Failed { message: String },
}

#[derive(Debug)]
pub struct DeployOutcome {
  pub version: BuildVersion,
  pub tag: String,
  /// Tree id of the pushed wrapper commit.
  pub tree_hash: String,
  pub meta: BuildOutputMeta,
  pub registration: RegistrationStatus,
}

#[derive(Debug, Error)]
pub enum DeployError {
  #[error("{stage} failed: {source}")]
  Forge {
    stage: &'static str,
    #[source]
    source: ForgeError,
  },

  #[error("version negotiation failed: {0}")]
  Registry(#[from] RegistryError),

  #[error(transparent)]
  Build(#[from] BuildError),

  #[error("wrapper generation failed: {0}")]
  Codegen(#[source] io::Error),

  #[error("release upload failed after {attempts} attempts: {source}")]
  Upload {
    attempts: u32,
    #[source]
    source: ForgeError,
  },

  #[error("io error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

fn stage(stage: &'static str) -> impl FnOnce(ForgeError) -> DeployError {
  move |source| DeployError::Forge { stage, source }
}

/// Commit message for a build.
pub fn commit_message(package: &str, version: &BuildVersion) -> String {
  format!("{} build {}", registered_name(package), version)
}

/// Build, commit, push, register and release one package version.
///
/// Stages run strictly in order. Only the release upload is retried, and a
/// failed registration is reported in the outcome instead of failing the run.
/// The push credentials in `request` are invalidated once the push returns,
/// whatever its result.
pub async fn deploy<F, S, P>(
  request: &mut DeployRequest,
  tools: DeployTools<'_, F, S>,
  producer: &P,
) -> Result<DeployOutcome, DeployError>
where
  F: Forge,
  S: RegistryStaging,
  P: MetaProducer,
{
  let result = run_stages(request, &tools, producer).await;
  request.credentials.invalidate();
  result
}

async fn run_stages<F, S, P>(
  request: &mut DeployRequest,
  tools: &DeployTools<'_, F, S>,
  producer: &P,
) -> Result<DeployOutcome, DeployError>
where
  F: Forge,
  S: RegistryStaging,
  P: MetaProducer,
{
  let forge = tools.forge;
  let repo = &request.repo;
  let checkout = request.checkout.as_path();

  if !forge.repo_exists(repo).await.map_err(stage("repository lookup"))? {
    info!(%repo, "repository missing, creating");
    forge.create_repo(repo).await.map_err(stage("repository creation"))?;
  }
  if checkout.exists() {
    forge.fetch(checkout, &request.branch).await.map_err(stage("fetch"))?;
  } else {
    forge.clone_repo(repo, checkout).await.map_err(stage("clone"))?;
  }

  let registered = registered_name(&request.package);
  let version = negotiate_version(tools.registry, &registered, &request.version)?;
  let tag = release_tag(&request.package, &version);
  info!(package = %request.package, %version, tag = %tag, "deploying");

  let meta = producer.produce().await?;

  tools
    .generator
    .generate(&request.package, &version, &meta, &request.dependencies, checkout)
    .map_err(DeployError::Codegen)?;

  let message = commit_message(&request.package, &version);
  forge.commit_all(checkout, &message).await.map_err(stage("commit"))?;
  let pushed = forge.push(checkout, &request.branch, &request.credentials).await;
  request.credentials.invalidate();
  pushed.map_err(stage("push"))?;

  let tree_hash = forge.tree_hash(checkout).await.map_err(stage("tree hash"))?;

  let registration = match tools.staging {
    None => RegistrationStatus::NotRequested,
    Some(staging) => {
      let registration = Registration {
        package: registered.clone(),
        repository: repo.clone(),
        tree_hash: tree_hash.clone(),
        version: version.clone(),
      };
      match staging.submit(&registration).await {
        Ok(url) => {
          info!(url = %url, "registration submitted");
          RegistrationStatus::Submitted { url }
        }
        Err(e) => {
          warn!(package = %request.package, %version, error = %e, "registration failed, continuing with upload");
          RegistrationStatus::Failed { message: e.to_string() }
        }
      }
    }
  };

  let assets = stage_assets(&meta, &request.output_dir, &tag)?;
  let assets_dir = assets.as_path();
  let tag_ref = tag.as_str();
  retry(UPLOAD_ATTEMPTS, "release upload", move |_| {
    forge.upload_release(repo, tag_ref, assets_dir)
  })
  .await
  .map_err(|source| DeployError::Upload {
    attempts: UPLOAD_ATTEMPTS,
    source,
  })?;

  info!(package = %request.package, %version, tag = %tag, "deployed");
  Ok(DeployOutcome {
    version,
    tag,
    tree_hash,
    meta,
    registration,
  })
}

/// Gather exactly this build's tarballs into `<output_dir>/release/<tag>`.
fn stage_assets(meta: &BuildOutputMeta, output_dir: &Path, tag: &str) -> Result<PathBuf, DeployError> {
  let dir = output_dir.join("release").join(tag);
  let io_err = |path: &Path| {
    let path = path.to_path_buf();
    move |source| DeployError::Io { path, source }
  };
  if dir.exists() {
    fs::remove_dir_all(&dir).map_err(io_err(&dir))?;
  }
  fs::create_dir_all(&dir).map_err(io_err(&dir))?;

  for (_, artifact) in meta.iter() {
    let src = output_dir.join(&artifact.tarball_name);
    let dest = dir.join(&artifact.tarball_name);
    if fs::hard_link(&src, &dest).is_err() {
      fs::copy(&src, &dest).map_err(io_err(&src))?;
    }
  }
  Ok(dir)
}
