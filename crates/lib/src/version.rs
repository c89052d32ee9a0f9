//! Build version negotiation.
//!
//! A [`BuildVersion`] is a semantic version plus a build number carried as
//! semver build metadata (`1.2.3+4`). Rebuilding the same semantic version
//! bumps the build number so a new release never collides with a published one.
//!
//! Negotiation reads registry state and does not reserve anything. Two
//! deployments of the same package and version running at once can pick the
//! same build number; the second registration then conflicts upstream.

use std::fmt;
use std::str::FromStr;

use semver::{BuildMetadata, Version};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use crate::registry::{Registry, RegistryError};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuildVersion {
  base: Version,
  build: u64,
}

impl BuildVersion {
  /// Combine a semantic version with a build number. Any build metadata on
  /// `base` is discarded.
  pub fn new(base: &Version, build: u64) -> Self {
    Self {
      base: strip_build(base),
      build,
    }
  }

  pub fn base(&self) -> &Version {
    &self.base
  }

  pub fn build_number(&self) -> u64 {
    self.build
  }

  /// The full semver form, build number included.
  pub fn to_semver(&self) -> Version {
    let mut v = self.base.clone();
    // Digits are always valid build metadata.
    v.build = BuildMetadata::new(&self.build.to_string()).unwrap_or(BuildMetadata::EMPTY);
    v
  }

  /// Read the build number off a registry entry, if it has a numeric one.
  pub fn from_semver(version: &Version) -> Option<Self> {
    let build = version.build.as_str().parse::<u64>().ok()?;
    Some(Self::new(version, build))
  }

  /// Whether `other` describes the same semantic version, prerelease included.
  pub fn same_release(&self, other: &Version) -> bool {
    self.base.major == other.major
      && self.base.minor == other.minor
      && self.base.patch == other.patch
      && self.base.pre == other.pre
  }
}

impl fmt::Display for BuildVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}+{}", self.base, self.build)
  }
}

impl FromStr for BuildVersion {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let version = Version::parse(s).map_err(|e| format!("invalid version '{}': {}", s, e))?;
    Self::from_semver(&version).ok_or_else(|| format!("version '{}' has no numeric build number", s))
  }
}

impl Serialize for BuildVersion {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for BuildVersion {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
  }
}

fn strip_build(version: &Version) -> Version {
  let mut v = version.clone();
  v.build = BuildMetadata::EMPTY;
  v
}

/// Pick the smallest build number above every registered build of `requested`.
pub fn next_build_number(known: &[Version], requested: &Version) -> u64 {
  let base = BuildVersion::new(requested, 0);
  known
    .iter()
    .filter(|v| base.same_release(v))
    .filter_map(BuildVersion::from_semver)
    .map(|v| v.build)
    .max()
    .map_or(0, |max| max + 1)
}

/// Negotiate the build version for `package` at `requested`.
///
/// An unknown package is not an error; it negotiates build number 0.
pub fn negotiate_version(
  registry: &dyn Registry,
  package: &str,
  requested: &Version,
) -> Result<BuildVersion, RegistryError> {
  let known = registry.list_versions(package)?;
  let build = next_build_number(&known, requested);
  let version = BuildVersion::new(requested, build);
  debug!(package, known = known.len(), version = %version, "negotiated build version");
  Ok(version)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  struct StaticRegistry(HashMap<String, Vec<Version>>);

  impl Registry for StaticRegistry {
    fn list_versions(&self, package: &str) -> Result<Vec<Version>, RegistryError> {
      Ok(self.0.get(package).cloned().unwrap_or_default())
    }
  }

  fn registry(package: &str, versions: &[&str]) -> StaticRegistry {
    let parsed = versions.iter().map(|v| Version::parse(v).unwrap()).collect();
    StaticRegistry(HashMap::from([(package.to_string(), parsed)]))
  }

  fn v(s: &str) -> Version {
    Version::parse(s).unwrap()
  }

  #[test]
  fn next_after_existing_builds() {
    let reg = registry("Zlib", &["1.2.3+0", "1.2.3+1"]);
    let version = negotiate_version(&reg, "Zlib", &v("1.2.3")).unwrap();
    assert_eq!(version.to_string(), "1.2.3+2");
  }

  #[test]
  fn no_matching_entries_starts_at_zero() {
    let reg = registry("Zlib", &[]);
    let version = negotiate_version(&reg, "Zlib", &v("1.2.3")).unwrap();
    assert_eq!(version.to_string(), "1.2.3+0");
  }

  #[test]
  fn other_versions_do_not_count() {
    let reg = registry("Zlib", &["1.2.4+0", "1.2.4+7"]);
    let version = negotiate_version(&reg, "Zlib", &v("1.2.3")).unwrap();
    assert_eq!(version.to_string(), "1.2.3+0");
  }

  #[test]
  fn unknown_package_starts_at_zero() {
    let reg = registry("Zlib", &["1.2.3+5"]);
    let version = negotiate_version(&reg, "Bzip2", &v("1.2.3")).unwrap();
    assert_eq!(version.build_number(), 0);
  }

  #[test]
  fn entries_without_build_number_are_ignored() {
    let known = vec![v("1.2.3"), v("1.2.3+abc"), v("1.2.3+3")];
    assert_eq!(next_build_number(&known, &v("1.2.3")), 4);
  }

  #[test]
  fn prerelease_must_match() {
    let known = vec![v("1.2.3-rc1+4"), v("1.2.3+1")];
    assert_eq!(next_build_number(&known, &v("1.2.3-rc1")), 5);
    assert_eq!(next_build_number(&known, &v("1.2.3")), 2);
  }

  #[test]
  fn gaps_do_not_get_filled() {
    let known = vec![v("1.2.3+0"), v("1.2.3+9")];
    assert_eq!(next_build_number(&known, &v("1.2.3")), 10);
  }

  #[test]
  fn requested_build_metadata_is_dropped() {
    let version = BuildVersion::new(&v("2.0.0+17"), 3);
    assert_eq!(version.to_string(), "2.0.0+3");
    assert_eq!(version.to_semver(), v("2.0.0+3"));
  }

  #[test]
  fn parse_round_trips_display() {
    let version: BuildVersion = "1.2.3-beta.1+12".parse().unwrap();
    assert_eq!(version.base(), &v("1.2.3-beta.1"));
    assert_eq!(version.build_number(), 12);
    assert_eq!(version.to_string(), "1.2.3-beta.1+12");
    assert!("1.2.3".parse::<BuildVersion>().is_err());
  }
}
