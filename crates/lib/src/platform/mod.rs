pub mod abi;
pub mod arch;
pub mod os;
pub mod paths;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub use abi::{CompilerAbi, CxxStringAbi, Libc};
pub use arch::Arch;
pub use os::Os;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlatformError {
  #[error("unrecognized platform triplet '{0}'")]
  Unrecognized(String),
}

/// Target triplet a build is produced for (e.g. `x86_64-linux-gnu-cxx11`).
///
/// The canonical string form is used for workspace directories, tarball
/// names and log fields, and parses back to the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Platform {
  pub arch: Arch,
  pub os: Os,
  /// Only set for Linux.
  pub libc: Option<Libc>,
  pub compiler: CompilerAbi,
}

impl Platform {
  pub fn linux(arch: Arch, libc: Libc) -> Self {
    Self {
      arch,
      os: Os::Linux,
      libc: Some(libc),
      compiler: CompilerAbi::default(),
    }
  }

  /// A non-Linux platform. Passing `Os::Linux` yields a glibc target.
  pub fn new(arch: Arch, os: Os) -> Self {
    let libc = (os == Os::Linux).then_some(Libc::Glibc);
    Self {
      arch,
      os,
      libc,
      compiler: CompilerAbi::default(),
    }
  }

  pub fn with_compiler(mut self, compiler: CompilerAbi) -> Self {
    self.compiler = compiler;
    self
  }

  /// Detect the host platform.
  ///
  /// Returns `None` if the OS or architecture is not supported
  pub fn current() -> Option<Self> {
    let os = Os::current()?;
    let arch = Arch::current()?;
    if os == Os::Linux {
      let libc = if cfg!(target_env = "musl") { Libc::Musl } else { Libc::Glibc };
      return Some(Self::linux(arch, libc));
    }
    Some(Self::new(arch, os))
  }

  /// Returns the canonical triplet string
  pub fn triplet(&self) -> String {
    let mut out = format!("{}-{}", self.arch, self.os.vendor_os());
    if let Some(libc) = self.libc {
      out.push('-');
      out.push_str(libc.as_str());
      if self.arch == Arch::Armv7l {
        out.push_str("eabihf");
      }
    }
    out.push_str(&self.compiler.to_string());
    out
  }

  /// Same platform with the compiler epoch stripped.
  pub fn base(&self) -> Self {
    Self {
      compiler: CompilerAbi::default(),
      ..*self
    }
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.triplet())
  }
}

impl FromStr for Platform {
  type Err = PlatformError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let unrecognized = || PlatformError::Unrecognized(s.to_string());

    let mut parts: Vec<&str> = s.split('-').collect();
    let mut compiler = CompilerAbi::default();
    while parts.len() > 2 {
      let Some(last) = parts.last() else { break };
      if !compiler.absorb(last) {
        break;
      }
      parts.pop();
    }

    let (arch, rest) = parts.split_first().ok_or_else(unrecognized)?;
    let arch = Arch::parse(arch).ok_or_else(unrecognized)?;
    let armhf = arch == Arch::Armv7l;

    let platform = match rest.join("-").as_str() {
      "linux-gnu" if !armhf => Platform::linux(arch, Libc::Glibc),
      "linux-musl" if !armhf => Platform::linux(arch, Libc::Musl),
      "linux-gnueabihf" if armhf => Platform::linux(arch, Libc::Glibc),
      "linux-musleabihf" if armhf => Platform::linux(arch, Libc::Musl),
      "apple-darwin" => Platform::new(arch, Os::MacOs),
      "unknown-freebsd" => Platform::new(arch, Os::FreeBsd),
      "w64-mingw32" => Platform::new(arch, Os::Windows),
      _ => return Err(unrecognized()),
    };

    Ok(platform.with_compiler(compiler))
  }
}

impl Serialize for Platform {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.triplet())
  }
}

impl<'de> Deserialize<'de> for Platform {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
  }
}

/// The default set of platforms a recipe builds for when it names none.
pub fn supported_platforms() -> Vec<Platform> {
  vec![
    Platform::linux(Arch::I686, Libc::Glibc),
    Platform::linux(Arch::X86_64, Libc::Glibc),
    Platform::linux(Arch::Aarch64, Libc::Glibc),
    Platform::linux(Arch::Armv7l, Libc::Glibc),
    Platform::linux(Arch::Powerpc64le, Libc::Glibc),
    Platform::linux(Arch::I686, Libc::Musl),
    Platform::linux(Arch::X86_64, Libc::Musl),
    Platform::linux(Arch::Aarch64, Libc::Musl),
    Platform::linux(Arch::Armv7l, Libc::Musl),
    Platform::new(Arch::X86_64, Os::MacOs),
    Platform::new(Arch::Aarch64, Os::MacOs),
    Platform::new(Arch::X86_64, Os::FreeBsd),
    Platform::new(Arch::I686, Os::Windows),
    Platform::new(Arch::X86_64, Os::Windows),
  ]
}
