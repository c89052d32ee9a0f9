//! Entry points tying resolution, building and deployment together.
//!
//! Every source is resolved before the first platform starts building, so a
//! bad hash or a missing directory never leaves a half-built output directory
//! behind. A successful run always leaves `build-meta.json` next to the
//! tarballs.

use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

use crate::build::{BuildError, BuildOutputMeta, BuildRequest, BuildRunner, BuildTools, PlatformBuildLoop};
use crate::consts::BUILD_META_FILE;
use crate::deploy::{DeployError, DeployOutcome, DeployRequest, DeployTools, Forge, RegistryStaging, deploy};
use crate::recipe::RecipeError;
use crate::registry::{Registry, RegistryError, registered_name};
use crate::source::{SourceError, SourceResolver, SourceSpec};
use crate::version::{BuildVersion, negotiate_version};

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error(transparent)]
  Recipe(#[from] RecipeError),

  #[error("source resolution failed: {0}")]
  Source(#[from] SourceError),

  #[error(transparent)]
  Build(#[from] BuildError),

  #[error(transparent)]
  Deploy(#[from] DeployError),

  #[error(transparent)]
  Registry(#[from] RegistryError),
}

/// Path of the metadata file for `request`.
pub fn meta_path(request: &BuildRequest) -> PathBuf {
  request.output_dir.join(BUILD_META_FILE)
}

/// Resolve `sources`, build every platform and write the build metadata.
pub async fn build_only<R: BuildRunner>(
  request: &BuildRequest,
  sources: &[SourceSpec],
  resolver: &SourceResolver,
  tools: BuildTools<'_, R>,
) -> Result<BuildOutputMeta, PipelineError> {
  let resolved = resolver.resolve_all(sources).await?;
  let build = PlatformBuildLoop {
    request,
    sources: &resolved,
    tools,
  };
  let meta = build.run().await?;
  meta.write_json(&meta_path(request))?;
  info!(package = %request.name, platforms = meta.len(), "build finished");
  Ok(meta)
}

/// Resolve `sources`, then build and deploy through the deployment pipeline.
pub async fn build_and_deploy<R, F, S>(
  request: &BuildRequest,
  sources: &[SourceSpec],
  resolver: &SourceResolver,
  tools: BuildTools<'_, R>,
  deploy_request: &mut DeployRequest,
  deploy_tools: DeployTools<'_, F, S>,
) -> Result<DeployOutcome, PipelineError>
where
  R: BuildRunner,
  F: Forge,
  S: RegistryStaging,
{
  let resolved = resolver.resolve_all(sources).await?;
  let build = PlatformBuildLoop {
    request,
    sources: &resolved,
    tools,
  };
  let outcome = deploy(deploy_request, deploy_tools, &build).await?;
  outcome.meta.write_json(&meta_path(request))?;
  Ok(outcome)
}

/// The version a deploy of `package` at `requested` would get right now.
///
/// Looks up the registered name of `package`, the same entry a deploy registers.
pub fn next_version(
  registry: &dyn Registry,
  package: &str,
  requested: &semver::Version,
) -> Result<BuildVersion, PipelineError> {
  Ok(negotiate_version(registry, &registered_name(package), requested)?)
}
