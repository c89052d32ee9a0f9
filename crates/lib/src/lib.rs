//! binforge-lib: cross-compile build orchestration and deployment
//!
//! This crate provides the pieces behind the `binforge` binary:
//! - `source`: turns source descriptors into verified, cached local content
//! - `version` / `registry`: negotiate the next free build number
//! - `build`: the per-platform build, audit, verify and package loop
//! - `deploy`: commit, push, register and upload a finished build
//! - `pipeline`: resolve-then-build and resolve-then-deploy entry points
//! - `recipe`: the `binforge.toml` recipe format

pub mod build;
pub mod consts;
pub mod deploy;
pub mod pipeline;
pub mod platform;
pub mod product;
pub mod recipe;
pub mod registry;
pub mod source;
pub mod util;
pub mod version;
