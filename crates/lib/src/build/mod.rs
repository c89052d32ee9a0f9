//! Per-platform builds.
//!
//! Each platform gets its own throwaway workspace, runs the build script once,
//! is audited and checked for its declared products, and ends up as one
//! deterministic tarball described by an [`ArtifactMeta`].
//!
//! # Submodules
//!
//! - [`execute`] - the platform loop
//! - [`runner`] - build script execution and lifecycle hooks
//! - [`workspace`] - workspace layout and cleanup
//! - [`audit`] - relocatability checks
//! - [`deps`] - dependency attach/detach
//! - [`package`] - tarball creation
//! - [`heartbeat`] - liveness output during long builds

pub mod audit;
pub mod deps;
pub mod execute;
pub mod heartbeat;
pub mod package;
pub mod runner;
pub mod workspace;
mod types;

pub use audit::{Auditor, BasicAuditor};
pub use deps::{CopyMaterializer, DependencyMaterializer};
pub use execute::{BuildTools, PlatformBuildLoop, build_platforms};
pub use package::{Packager, TarballPackager};
pub use runner::{BuildRunner, ShellRunner};
pub use workspace::Workspace;
pub use types::*;
