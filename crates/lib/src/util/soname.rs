//! Runtime names of shared libraries.

use std::fs;
use std::path::Path;

use goblin::Object;
use goblin::mach::Mach;
use tracing::debug;

/// The name a shared library is loaded by at runtime.
///
/// ELF libraries report their `DT_SONAME`, Mach-O dylibs the last component
/// of their install name. Anything else yields `None`, as does a file that
/// cannot be read or parsed.
pub fn read_soname(path: &Path) -> Option<String> {
  let bytes = match fs::read(path) {
    Ok(bytes) => bytes,
    Err(e) => {
      debug!(path = %path.display(), error = %e, "cannot read library");
      return None;
    }
  };
  match Object::parse(&bytes) {
    Ok(Object::Elf(elf)) => elf.soname.map(str::to_string),
    Ok(Object::Mach(Mach::Binary(macho))) => macho.name.and_then(install_name_file),
    Ok(_) => None,
    Err(e) => {
      debug!(path = %path.display(), error = %e, "not a parseable binary");
      None
    }
  }
}

/// `@rpath/libz.1.dylib` -> `libz.1.dylib`
fn install_name_file(install_name: &str) -> Option<String> {
  install_name
    .rsplit('/')
    .next()
    .filter(|s| !s.is_empty())
    .map(str::to_string)
}

/// A minimal little-endian ELF64 shared object whose dynamic section carries `soname`.
#[cfg(test)]
pub(crate) fn elf_with_soname(soname: &str) -> Vec<u8> {
  const EHDR: usize = 64;
  const PHDR: usize = 56;
  let mut strtab = vec![0u8];
  strtab.extend_from_slice(soname.as_bytes());
  strtab.push(0);
  let strtab_off = EHDR + 2 * PHDR;
  let dynamic_off = (strtab_off + strtab.len() + 7) & !7;
  let dynamic = [(5u64, strtab_off as u64), (10, strtab.len() as u64), (14, 1), (0, 0)];
  let dynamic_len = dynamic.len() * 16;
  let total = dynamic_off + dynamic_len;

  let mut out = Vec::with_capacity(total);
  out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
  out.extend_from_slice(&3u16.to_le_bytes()); // ET_DYN
  out.extend_from_slice(&62u16.to_le_bytes()); // x86_64
  out.extend_from_slice(&1u32.to_le_bytes());
  out.extend_from_slice(&0u64.to_le_bytes());
  out.extend_from_slice(&(EHDR as u64).to_le_bytes());
  out.extend_from_slice(&0u64.to_le_bytes());
  out.extend_from_slice(&0u32.to_le_bytes());
  for half in [EHDR as u16, PHDR as u16, 2, 64, 0, 0] {
    out.extend_from_slice(&half.to_le_bytes());
  }

  let mut program_header = |p_type: u32, flags: u32, offset: usize, size: usize, align: u64| {
    out.extend_from_slice(&p_type.to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());
    for word in [offset, offset, offset, size, size] {
      out.extend_from_slice(&(word as u64).to_le_bytes());
    }
    out.extend_from_slice(&align.to_le_bytes());
  };
  program_header(1, 4, 0, total, 0x1000); // PT_LOAD
  program_header(2, 6, dynamic_off, dynamic_len, 8); // PT_DYNAMIC

  out.extend_from_slice(&strtab);
  out.resize(dynamic_off, 0);
  for (tag, value) in dynamic {
    out.extend_from_slice(&tag.to_le_bytes());
    out.extend_from_slice(&value.to_le_bytes());
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn reads_elf_soname() {
    let temp = TempDir::new().unwrap();
    let lib = temp.path().join("libz.so");
    fs::write(&lib, elf_with_soname("libz.so.1")).unwrap();

    assert_eq!(read_soname(&lib).as_deref(), Some("libz.so.1"));
  }

  #[test]
  fn non_binaries_have_no_soname() {
    let temp = TempDir::new().unwrap();
    let script = temp.path().join("libz.so");
    fs::write(&script, "INPUT(libz.so.1)\n").unwrap();

    assert_eq!(read_soname(&script), None);
    assert_eq!(read_soname(&temp.path().join("missing.so")), None);
  }

  #[test]
  fn install_name_keeps_file_component() {
    assert_eq!(install_name_file("@rpath/libz.1.dylib").as_deref(), Some("libz.1.dylib"));
    assert_eq!(install_name_file("libz.1.dylib").as_deref(), Some("libz.1.dylib"));
    assert_eq!(install_name_file("/usr/lib/"), None);
  }
}
