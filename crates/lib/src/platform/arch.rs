use std::fmt;

/// CPU architectures a build can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Arch {
  X86_64,
  I686,
  Aarch64,
  Armv7l,
  Powerpc64le,
}

impl Arch {
  /// Detect the host CPU architecture at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::ARCH {
      "x86_64" => Some(Self::X86_64),
      "x86" => Some(Self::I686),
      "aarch64" => Some(Self::Aarch64),
      "arm" => Some(Self::Armv7l),
      "powerpc64" => Some(Self::Powerpc64le),
      _ => None,
    }
  }

  /// Returns the identifier used in triplets
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::X86_64 => "x86_64",
      Self::I686 => "i686",
      Self::Aarch64 => "aarch64",
      Self::Armv7l => "armv7l",
      Self::Powerpc64le => "powerpc64le",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "x86_64" => Some(Self::X86_64),
      "i686" => Some(Self::I686),
      "aarch64" => Some(Self::Aarch64),
      "armv7l" => Some(Self::Armv7l),
      "powerpc64le" => Some(Self::Powerpc64le),
      _ => None,
    }
  }
}

impl fmt::Display for Arch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_is_inverse_of_as_str() {
    for arch in [Arch::X86_64, Arch::I686, Arch::Aarch64, Arch::Armv7l, Arch::Powerpc64le] {
      assert_eq!(Arch::parse(arch.as_str()), Some(arch));
    }
  }

  #[test]
  fn unknown_arch_is_rejected() {
    assert_eq!(Arch::parse("sparc"), None);
  }
}
