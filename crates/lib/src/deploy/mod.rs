//! Publishing a build.
//!
//! A deployment negotiates the build version, runs the platform loop,
//! commits generated wrapper files to the package repository, pushes them,
//! optionally opens a registry pull request and uploads the tarballs to the
//! release for the version's tag.
//!
//! # Submodules
//!
//! - [`pipeline`] - stage ordering and failure policy
//! - [`forge`] - hosted repository and registry staging traits
//! - [`github`] - GitHub implementation of both
//! - [`codegen`] - wrapper file generation
//! - [`credentials`] - push credentials that zero themselves
//! - [`retry`] - bounded retry for uploads

pub mod codegen;
pub mod credentials;
pub mod forge;
pub mod github;
pub mod pipeline;
pub mod retry;

pub use codegen::{ArtifactsTomlGenerator, WrapperGenerator};
pub use credentials::PushCredentials;
pub use forge::{Forge, ForgeError, Registration, RegistryStaging, RepoId, release_tag};
pub use github::{GitHubApi, GitHubForge, GitHubRegistryStaging};
pub use pipeline::{
  DeployError, DeployOutcome, DeployRequest, DeployTools, MetaProducer, RegistrationStatus, deploy,
};
