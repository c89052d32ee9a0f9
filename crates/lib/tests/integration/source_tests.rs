use std::fs;

use binforge_lib::source::{SourceDigest, SourceError, SourceSpec};
use binforge_lib::util::hash::hash_file;

use super::common::TestEnv;

#[tokio::test]
async fn resolves_in_declaration_order() {
  let env = TestEnv::new();
  let dir = env.tree("project", &[("main.c", "int main(){return 0;}")]);
  let patch = env.path().join("fix.patch");
  fs::write(&patch, "--- a\n+++ b\n").unwrap();
  let patch_hash = hash_file(&patch).unwrap();

  let specs = vec![
    SourceSpec::from_descriptor(patch.to_str().unwrap(), Some(&patch_hash.0)).unwrap(),
    SourceSpec::from_descriptor(dir.to_str().unwrap(), None).unwrap(),
  ];
  let resolved = env.resolver().resolve_all(&specs).await.unwrap();

  assert_eq!(resolved.len(), 2);
  assert_eq!(resolved[0].path, fs::canonicalize(&patch).unwrap());
  assert_eq!(resolved[0].digest, SourceDigest::Sha256(patch_hash));
  let name = resolved[1].path.file_name().unwrap().to_string_lossy().into_owned();
  assert!(name.ends_with("-project.tar.gz"), "unexpected archive name {}", name);
  let SourceDigest::Sha256(hash) = &resolved[1].digest else {
    panic!("local directory should be content hashed");
  };
  assert!(name.starts_with(&hash.0));
}

#[tokio::test]
async fn archiving_the_same_directory_twice_is_stable() {
  let env = TestEnv::new();
  let dir = env.tree("project", &[("a.txt", "a"), ("sub/b.txt", "b")]);
  let spec = SourceSpec::LocalDir { path: dir };
  let resolver = env.resolver();

  let first = resolver.resolve(&spec).await.unwrap();
  let second = resolver.resolve(&spec).await.unwrap();

  assert_eq!(first.path, second.path);
  assert_eq!(first.digest, second.digest);
}

#[tokio::test]
async fn one_bad_source_fails_the_whole_list() {
  let env = TestEnv::new();
  let dir = env.tree("project", &[("a.txt", "a")]);
  let archive = env.path().join("src.tar.gz");
  fs::write(&archive, "bytes").unwrap();

  let specs = vec![
    SourceSpec::LocalDir { path: dir },
    SourceSpec::from_descriptor(archive.to_str().unwrap(), Some(&"f".repeat(64))).unwrap(),
  ];
  let err = env.resolver().resolve_all(&specs).await.unwrap_err();

  assert!(matches!(err, SourceError::Integrity { .. }));
}
