mod build;
mod platforms;
mod resolve;
mod version;

pub use build::{BuildArgs, cmd_build};
pub use platforms::cmd_platforms;
pub use resolve::cmd_resolve;
pub use version::cmd_version;
