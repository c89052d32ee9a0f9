//! C library and compiler-epoch components of a triplet.

use std::fmt;

/// C library a Linux target links against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Libc {
  Glibc,
  Musl,
}

impl Libc {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Glibc => "gnu",
      Self::Musl => "musl",
    }
  }
}

impl fmt::Display for Libc {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// C++ `std::string` ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CxxStringAbi {
  Cxx03,
  Cxx11,
}

impl CxxStringAbi {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Cxx03 => "cxx03",
      Self::Cxx11 => "cxx11",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "cxx03" => Some(Self::Cxx03),
      "cxx11" => Some(Self::Cxx11),
      _ => None,
    }
  }
}

/// Compiler epoch: the runtime ABIs that make two builds for the same
/// arch/OS/libc incompatible with each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompilerAbi {
  /// Major version of `libgfortran` (3, 4 or 5).
  pub libgfortran: Option<u8>,
  pub cxxstring: Option<CxxStringAbi>,
}

impl CompilerAbi {
  pub fn is_empty(&self) -> bool {
    self.libgfortran.is_none() && self.cxxstring.is_none()
  }

  /// Consume one trailing triplet component if it is a compiler tag.
  ///
  /// Returns `false` when `tag` is not a compiler tag or would overwrite one
  /// already set.
  pub(crate) fn absorb(&mut self, tag: &str) -> bool {
    if let Some(version) = tag.strip_prefix("libgfortran") {
      if self.libgfortran.is_some() {
        return false;
      }
      match version.parse::<u8>() {
        Ok(v @ 3..=5) => {
          self.libgfortran = Some(v);
          true
        }
        _ => false,
      }
    } else if let Some(abi) = CxxStringAbi::parse(tag) {
      if self.cxxstring.is_some() {
        return false;
      }
      self.cxxstring = Some(abi);
      true
    } else {
      false
    }
  }
}

impl fmt::Display for CompilerAbi {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(v) = self.libgfortran {
      write!(f, "-libgfortran{}", v)?;
    }
    if let Some(abi) = self.cxxstring {
      write!(f, "-{}", abi.as_str())?;
    }
    Ok(())
  }
}
