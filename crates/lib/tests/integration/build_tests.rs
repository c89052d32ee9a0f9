//! Full platform loop runs through the shell runner.

#![cfg(unix)]

use std::fs;
use std::path::Path;

use binforge_lib::build::{
  BasicAuditor, BuildError, BuildOutputMeta, BuildRequest, BuildTools, CopyMaterializer, Dependency, ShellRunner,
  TarballPackager,
};
use binforge_lib::pipeline::{PipelineError, build_only, meta_path};
use binforge_lib::product::Product;
use binforge_lib::source::SourceSpec;
use binforge_lib::util::archive;

use super::common::{TestEnv, linux};

const INSTALL: &str = r#"
mkdir -p "$bindir" "$libdir"
cp tool.sh "$bindir/tool"
chmod +x "$bindir/tool"
cp libdemo.so "$libdir/libdemo.so.2"
"#;

async fn build(env: &TestEnv, request: &BuildRequest, src: &Path) -> Result<BuildOutputMeta, PipelineError> {
  let runner = ShellRunner::new();
  let packager = TarballPackager::new(&request.output_dir);
  let tools = BuildTools {
    runner: &runner,
    auditor: &BasicAuditor,
    materializer: &CopyMaterializer,
    packager: &packager,
  };
  let sources = [SourceSpec::LocalDir { path: src.to_path_buf() }];
  build_only(request, &sources, &env.resolver(), tools).await
}

fn sources(env: &TestEnv) -> std::path::PathBuf {
  env.tree(
    "src",
    &[("tool.sh", "#!/bin/sh\necho demo\n"), ("libdemo.so", "ELF-ish payload")],
  )
}

#[tokio::test]
async fn builds_packages_and_records_products() {
  let env = TestEnv::new();
  let src = sources(&env);
  let request = env.request(INSTALL, vec![Product::executable("tool"), Product::library("libdemo")]);

  let meta = build(&env, &request, &src).await.unwrap();

  let artifact = meta.get(&linux()).unwrap();
  assert_eq!(artifact.tarball_name, "Demo.v2.1.0.x86_64-linux-gnu.tar.gz");
  assert_eq!(
    artifact.products[&Product::library("libdemo")].path,
    Path::new("lib/libdemo.so.2")
  );
  assert!(meta_path(&request).exists());
  assert!(env.output_dir().join("logs/x86_64-linux-gnu").is_dir());

  let unpacked = env.path().join("unpacked");
  archive::unpack(&env.output_dir().join(&artifact.tarball_name), &unpacked).unwrap();
  assert!(unpacked.join("bin/tool").is_file());
  assert!(unpacked.join("lib/libdemo.so.2").is_file());
  assert!(!env.path().join("build/x86_64-linux-gnu").exists());
}

#[tokio::test]
async fn rebuilding_unchanged_sources_is_reproducible() {
  let env = TestEnv::new();
  let src = sources(&env);
  let request = env.request(INSTALL, vec![Product::executable("tool")]);

  let first = build(&env, &request, &src).await.unwrap();
  let second = build(&env, &request, &src).await.unwrap();

  let (a, b) = (first.get(&linux()).unwrap(), second.get(&linux()).unwrap());
  assert_eq!(a.tree_hash, b.tree_hash);
  assert_eq!(a.tarball_hash, b.tarball_hash);
}

#[tokio::test]
async fn failing_script_reports_package_and_platform() {
  let env = TestEnv::new();
  let src = sources(&env);
  let request = env.request("exit 3", vec![Product::executable("tool")]);

  let err = build(&env, &request, &src).await.unwrap_err();

  match err {
    PipelineError::Build(BuildError::ScriptFailed { package, platform, code }) => {
      assert_eq!(package, "Demo");
      assert_eq!(platform, linux());
      assert_eq!(code, Some(3));
    }
    other => panic!("unexpected error: {}", other),
  }
  assert!(!meta_path(&request).exists());
  assert!(env.output_dir().join("logs/x86_64-linux-gnu").is_dir());
}

#[tokio::test]
async fn embedded_prefix_fails_audit() {
  let env = TestEnv::new();
  let src = sources(&env);
  let script = r#"mkdir -p "$bindir" && printf '#!/bin/sh\nexec %s/bin/real\n' "$prefix" > "$bindir/tool" && chmod +x "$bindir/tool""#;
  let request = env.request(script, vec![Product::executable("tool")]);

  let err = build(&env, &request, &src).await.unwrap_err();

  assert!(matches!(err, PipelineError::Build(BuildError::AuditFailed { .. })));
}

#[tokio::test]
async fn dependencies_are_visible_but_not_packaged() {
  let env = TestEnv::new();
  let src = sources(&env);
  let dep = env.tree("deps/zlib", &[("include/zlib.h", "#define ZLIB 1\n")]);
  let mut request = env.request(
    r#"test -f "$includedir/zlib.h" && mkdir -p "$bindir" && cp tool.sh "$bindir/tool" && chmod +x "$bindir/tool""#,
    vec![Product::executable("tool")],
  );
  request.dependencies.push(Dependency {
    name: "Zlib".to_string(),
    path: dep,
  });

  let meta = build(&env, &request, &src).await.unwrap();

  let artifact = meta.get(&linux()).unwrap();
  let unpacked = env.path().join("unpacked");
  archive::unpack(&env.output_dir().join(&artifact.tarball_name), &unpacked).unwrap();
  assert!(unpacked.join("bin/tool").is_file());
  assert!(!unpacked.join("include/zlib.h").exists());
  let _ = fs::remove_dir_all(&unpacked);
}
