use std::path::PathBuf;

use crate::consts::{APP_NAME, CACHE_ENV};

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var("USERPROFILE")
    .map(PathBuf::from)
    .unwrap_or_else(|_| std::env::temp_dir())
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| std::env::temp_dir())
}

/// Returns the root of the shared source cache.
///
/// `BINFORGE_CACHE` wins over the platform default.
#[cfg(windows)]
pub fn cache_dir() -> PathBuf {
  if let Ok(dir) = std::env::var(CACHE_ENV) {
    return PathBuf::from(dir);
  }
  std::env::var("LOCALAPPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join("AppData").join("Local"))
    .join(APP_NAME)
    .join("Cache")
}

/// Returns the root of the shared source cache.
///
/// `BINFORGE_CACHE` wins over `XDG_CACHE_HOME`.
#[cfg(not(windows))]
pub fn cache_dir() -> PathBuf {
  if let Ok(dir) = std::env::var(CACHE_ENV) {
    return PathBuf::from(dir);
  }
  let cache_home = std::env::var("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}

#[cfg(test)]
#[cfg(not(windows))]
mod tests {
  use super::*;
  use crate::source::SourceCache;
  use serial_test::serial;

  #[test]
  #[serial]
  fn cache_env_takes_precedence() {
    temp_env::with_vars(
      [
        (CACHE_ENV, Some("/custom/cache")),
        ("XDG_CACHE_HOME", Some("/xdg/cache")),
      ],
      || {
        assert_eq!(cache_dir(), PathBuf::from("/custom/cache"));
        assert_eq!(
          SourceCache::default_location().downloads(),
          PathBuf::from("/custom/cache/downloads")
        );
      },
    );
  }

  #[test]
  #[serial]
  fn xdg_fallback_to_home_directories() {
    temp_env::with_vars(
      [
        (CACHE_ENV, None::<&str>),
        ("XDG_CACHE_HOME", None::<&str>),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(cache_dir(), PathBuf::from("/home/user/.cache").join(APP_NAME));
        assert_eq!(
          SourceCache::default_location().clones(),
          PathBuf::from("/home/user/.cache").join(APP_NAME).join("clones")
        );
      },
    );
  }
}
