//! Relocatability audit of an installed prefix.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::platform::Platform;
use crate::util::soname::read_soname;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditOptions {
  /// Repair what can be repaired instead of only reporting it.
  pub autofix: bool,
  pub require_license: bool,
}

/// Problems found in a prefix. Empty means it passed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
  pub issues: Vec<String>,
}

impl AuditReport {
  pub fn passed(&self) -> bool {
    self.issues.is_empty()
  }
}

/// Checks a prefix before it is packaged. May modify the prefix when fixing.
pub trait Auditor {
  fn audit(&self, prefix: &Path, package: &str, platform: &Platform, options: AuditOptions) -> io::Result<AuditReport>;

  /// The runtime name of a shared library, if it can be read.
  fn soname(&self, _path: &Path) -> Option<String> {
    None
  }
}

/// Looks for the absolute prefix path baked into installed files.
///
/// With autofix, libtool `.la` archives are deleted and pkg-config files are
/// rewritten relative to `${pcfiledir}`. Binaries are only reported. Sonames
/// come from the ELF dynamic section or the Mach-O install name.
#[derive(Debug, Clone, Default)]
pub struct BasicAuditor;

impl BasicAuditor {
  pub fn new() -> Self {
    Self
  }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
  !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Rewrite a pkg-config file so it no longer names `prefix`.
fn relocate_pc(content: &str, prefix: &str) -> String {
  let relocated = content.replace(prefix, "${pcfiledir}/../..");
  // `prefix=` lines are resolved relative to the .pc file itself
  relocated
    .lines()
    .map(|line| {
      if line.starts_with("prefix=") {
        "prefix=${pcfiledir}/../..".to_string()
      } else {
        line.to_string()
      }
    })
    .collect::<Vec<_>>()
    .join("\n")
    + if content.ends_with('\n') { "\n" } else { "" }
}

impl Auditor for BasicAuditor {
  fn audit(&self, prefix: &Path, package: &str, platform: &Platform, options: AuditOptions) -> io::Result<AuditReport> {
    let mut report = AuditReport::default();
    let prefix_str = prefix.to_string_lossy().into_owned();

    for entry in WalkDir::new(prefix).follow_links(false) {
      let entry = entry.map_err(io::Error::other)?;
      if !entry.file_type().is_file() {
        continue;
      }
      let path = entry.path();
      let rel = path.strip_prefix(prefix).unwrap_or(path).to_path_buf();
      let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

      if ext == "la" {
        if options.autofix {
          fs::remove_file(path)?;
          info!(file = %rel.display(), "removed libtool archive");
        } else {
          report.issues.push(format!("{}: libtool archive", rel.display()));
        }
        continue;
      }

      let bytes = fs::read(path)?;
      if !contains(&bytes, prefix_str.as_bytes()) {
        continue;
      }
      if ext == "pc" && options.autofix {
        let fixed = relocate_pc(&String::from_utf8_lossy(&bytes), &prefix_str);
        fs::write(path, fixed)?;
        info!(file = %rel.display(), "relocated pkg-config file");
      } else {
        report
          .issues
          .push(format!("{}: contains the build prefix {}", rel.display(), prefix_str));
      }
    }

    if options.require_license {
      let licenses = prefix.join("share").join("licenses").join(package);
      let has_license = fs::read_dir(&licenses).is_ok_and(|mut d| d.next().is_some());
      if !has_license {
        report
          .issues
          .push(format!("no license installed in share/licenses/{}", package));
      }
    }

    debug!(%platform, issues = report.issues.len(), "audit finished");
    Ok(report)
  }

  fn soname(&self, path: &Path) -> Option<String> {
    read_soname(path)
  }
}
