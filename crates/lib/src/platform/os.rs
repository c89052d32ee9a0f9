use std::fmt;

/// Operating systems a build can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Os {
  Linux,
  MacOs,
  FreeBsd,
  Windows,
}

impl Os {
  /// Detect the host operating system at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::OS {
      "linux" => Some(Self::Linux),
      "macos" => Some(Self::MacOs),
      "freebsd" => Some(Self::FreeBsd),
      "windows" => Some(Self::Windows),
      _ => None,
    }
  }

  /// The vendor and OS part of a triplet, e.g. `apple-darwin`.
  ///
  /// Linux is special-cased by [`super::Platform`] because the libc follows it.
  pub fn vendor_os(&self) -> &'static str {
    match self {
      Self::Linux => "linux",
      Self::MacOs => "apple-darwin",
      Self::FreeBsd => "unknown-freebsd",
      Self::Windows => "w64-mingw32",
    }
  }

  /// Shared library extension, without the dot.
  pub fn dlext(&self) -> &'static str {
    match self {
      Self::Linux | Self::FreeBsd => "so",
      Self::MacOs => "dylib",
      Self::Windows => "dll",
    }
  }

  /// Executable suffix, empty everywhere but Windows.
  pub fn exeext(&self) -> &'static str {
    match self {
      Self::Windows => ".exe",
      _ => "",
    }
  }

  /// Directories shared libraries are installed into, in search order.
  pub fn libdirs(&self) -> &'static [&'static str] {
    match self {
      Self::Windows => &["bin"],
      _ => &["lib", "lib64"],
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.vendor_os())
  }
}
