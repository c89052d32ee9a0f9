//! Crate-wide constants.

pub const APP_NAME: &str = "binforge";

/// Environment variable overriding the cache root.
pub const CACHE_ENV: &str = "BINFORGE_CACHE";

/// Subdirectory of the cache holding downloaded and locally archived sources.
pub const DOWNLOADS_DIR: &str = "downloads";

/// Subdirectory of the cache holding bare git mirrors.
pub const CLONES_DIR: &str = "clones";

/// Total attempts for a release upload, including the first one.
pub const UPLOAD_ATTEMPTS: u32 = 3;

/// January 1, 1980 00:00:00 UTC (ZIP epoch). Every archive entry carries this mtime.
pub const SOURCE_DATE_EPOCH: u64 = 315532800;

/// Name of the default branch pushed to on deploy.
pub const DEFAULT_BRANCH: &str = "main";

/// Environment variable holding the token used for pushes and API calls.
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Recipe file looked up in the working directory.
pub const RECIPE_FILE: &str = "binforge.toml";

/// Build metadata written next to the tarballs.
pub const BUILD_META_FILE: &str = "build-meta.json";
