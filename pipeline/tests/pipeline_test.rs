use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use pretty_assertions::assert_eq;
use protoplex::{
    config::{self, Backend, Config},
    digest::sha256_hex,
    BuiltinCompiler, CompileRequest, Pipeline, PipelineError, SchemaCompiler, Stage,
};
use protoplex_compiler::decode_descriptor_set;
use walkdir::WalkDir;

const API_PROTO: &str = r#"syntax = "proto3";

package org.couchers.api;

import "google/api/annotations.proto";

message PingReq {}

message PingRes {
  string message = 1;
}

service API {
  rpc Ping(PingReq) returns (PingRes) {
    option (google.api.http) = { get: "/ping" };
  }
}
"#;

const ANNOTATIONS_PROTO: &str = r#"syntax = "proto3";

package google.api;

import "google/api/http.proto";

message HttpAnnotation {
  HttpRule rule = 1;
}
"#;

const HTTP_PROTO: &str = r#"syntax = "proto3";

package google.api;

message HttpRule {
  string get = 1;
  string post = 2;
}
"#;

const JOBS_PROTO: &str = r#"syntax = "proto3";

package org.couchers.internal.jobs;

import "google/api/http.proto";
import "api.proto";

message Job {
  string name = 1;
  google.api.HttpRule rule = 2;
  org.couchers.api.PingRes last = 3;
}
"#;

fn write(root: &Path, name: &str, text: &str) {
    let path = root.join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

fn schema_tree() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let schemas = dir.path().join("app/proto");
    write(&schemas, "api.proto", API_PROTO);
    write(&schemas, "google/api/annotations.proto", ANNOTATIONS_PROTO);
    write(&schemas, "google/api/http.proto", HTTP_PROTO);
    write(&schemas, "internal/jobs.proto", JOBS_PROTO);
    dir
}

/// Every file under `dir`, keyed by its path relative to `dir`.
fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(dir)
        .into_iter()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let relative = entry.path().strip_prefix(dir).unwrap().to_path_buf();
            (relative, fs::read(entry.path()).unwrap())
        })
        .collect()
}

fn read(root: &Path, path: &str) -> String {
    fs::read_to_string(root.join(path)).unwrap()
}

#[test]
fn test_happy_path() {
    let dir = schema_tree();
    let root = dir.path();

    let report = Pipeline::new(root, Config::default()).unwrap().run().unwrap();
    assert_eq!(report.compiler, "builtin");
    assert_eq!(report.targets.len(), 7);
    assert_eq!(report.sources, 4);
    assert_eq!(report.skipped, 0);

    let expected: &[(&str, &[&str])] = &[
        ("app/core/src/couchers_core/proto", &["api_pb2.py", "api_pb2_grpc.py", "google/api/http_pb2.py"]),
        ("app/backend/src/couchers/proto", &["api_pb2.py", "api_pb2_grpc.py", "descriptors.pb"]),
        ("app/backend/src/couchers/internal/proto", &["jobs_pb2.py"]),
        ("app/media/src/media/proto", &["api_pb2.py", "api_pb2_grpc.py", "descriptors.pb"]),
        ("app/web/proto", &["api_pb.js", "api_pb.d.ts", "api_grpc_web_pb.js", "api_grpc_web_pb.d.ts", "google/api/http_pb.js"]),
        ("app/browser/src/proto", &["api_pb.js", "api_pb.d.ts", "api_grpc_web_pb.js", "api_grpc_web_pb.d.ts"]),
        ("app/proto/gen", &["api_pb2.py", "api_pb2_grpc.py", "google/api/annotations_pb2.py", "descriptors.pb"]),
    ];
    for (target_dir, files) in expected {
        for file in *files {
            let path = root.join(target_dir).join(file);
            let len = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            assert!(len > 0, "{} is missing or empty", path.display());
        }
    }
    assert!(!root.join("app/backend/src/couchers/internal/proto/jobs_pb2_grpc.py").exists());
    assert!(!root.join("app/core/src/couchers_core/proto/descriptors.pb").exists());

    // One descriptor, byte-identical everywhere.
    let digest = report.descriptor_digest.clone().unwrap();
    assert_eq!(report.descriptor_copies.len(), 4);
    assert!(report.descriptor_copies.contains(&root.join("app/proxy/descriptors.pb")));
    for copy in &report.descriptor_copies {
        assert_eq!(sha256_hex(&fs::read(copy).unwrap()), digest);
    }
    let set = decode_descriptor_set(&fs::read(root.join("app/proxy/descriptors.pb")).unwrap()).unwrap();
    let names: Vec<&str> = set.files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["google/api/http.proto", "google/api/annotations.proto", "api.proto"]);

    // Two archives extracting to the trees they were made from.
    assert_eq!(
        report.archives,
        vec![root.join("archives/python.tar.gz"), root.join("archives/web.tar.gz")]
    );
    for (archive, target_dir) in [("archives/python.tar.gz", "app/proto/gen"), ("archives/web.tar.gz", "app/web/proto")] {
        let out = tempfile::tempdir().unwrap();
        tar::Archive::new(GzDecoder::new(File::open(root.join(archive)).unwrap()))
            .unpack(out.path())
            .unwrap();
        assert_eq!(snapshot(out.path()), snapshot(&root.join(target_dir)), "{}", archive);
    }
}

#[test]
fn test_imports_follow_each_layout() {
    let dir = schema_tree();
    let root = dir.path();
    Pipeline::new(root, Config::default()).unwrap().run().unwrap();

    let annotations = "import annotations_pb2 as google_dot_api_dot_annotations__pb2";

    let backend = read(root, "app/backend/src/couchers/proto/api_pb2.py");
    assert!(backend.contains(&format!("from couchers.proto.google.api {}", annotations)), "{}", backend);

    let core = read(root, "app/core/src/couchers_core/proto/api_pb2.py");
    assert!(core.contains(&format!("from couchers_core.proto.google.api {}", annotations)), "{}", core);

    let dist = read(root, "app/proto/gen/api_pb2.py");
    assert!(dist.contains(&format!("from .google.api {}", annotations)), "{}", dist);

    let nested = read(root, "app/proto/gen/google/api/annotations_pb2.py");
    assert!(nested.contains("from ...google.api import http_pb2 as google_dot_api_dot_http__pb2"), "{}", nested);

    let grpc = read(root, "app/media/src/media/proto/api_pb2_grpc.py");
    assert!(grpc.contains("from . import api_pb2 as api__pb2"), "{}", grpc);

    let internal = read(root, "app/backend/src/couchers/internal/proto/jobs_pb2.py");
    assert!(
        internal.contains("from couchers.proto.google.api import http_pb2 as google_dot_api_dot_http__pb2"),
        "{}",
        internal
    );
    // The root module lives in the backend package, not beside the internal one.
    assert!(internal.contains("from couchers.proto import api_pb2 as api__pb2"), "{}", internal);
    assert!(!internal.contains("from . import api_pb2"), "{}", internal);
    assert!(root.join("app/backend/src/couchers/proto/api_pb2.py").is_file());

    // Browser output keeps its relative requires.
    let web = read(root, "app/web/proto/google/api/annotations_pb.js");
    assert!(web.contains("require('./http_pb.js')"), "{}", web);
    for line in backend.lines().chain(dist.lines()) {
        assert!(!line.starts_with("from google.api "), "{}", line);
        assert!(!line.starts_with("import api_pb2"), "{}", line);
    }
}

#[test]
fn test_rerun_is_idempotent() {
    let dir = schema_tree();
    let root = dir.path();

    Pipeline::new(root, Config::default()).unwrap().run().unwrap();
    let first = snapshot(root);
    let report = Pipeline::new(root, Config::default()).unwrap().run().unwrap();
    let second = snapshot(root);

    assert_eq!(first.keys().collect::<Vec<_>>(), second.keys().collect::<Vec<_>>());
    assert!(first == second, "a second run changed the tree");
    assert!(report.rewritten > 0);
}

#[test]
fn test_missing_schema_root_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();

    let err = Pipeline::new(dir.path(), Config::default()).unwrap().run().unwrap_err();
    assert!(matches!(err, PipelineError::SchemaDiscovery { .. }), "{:?}", err);
    assert_eq!(err.stage(), Stage::Discovery);
    assert_eq!(WalkDir::new(dir.path()).min_depth(1).into_iter().count(), 0);
}

#[test]
fn test_single_schema_without_internal_sources() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(
        &root.join("app/proto"),
        "api.proto",
        "syntax = \"proto3\";\npackage org.couchers.api;\nmessage Ping {}\nservice API {\n  rpc Ping(Ping) returns (Ping);\n}\n",
    );

    let report = Pipeline::new(root, Config::default()).unwrap().run().unwrap();
    assert_eq!(report.sources, 1);
    assert_eq!(report.descriptor_copies.len(), 4);
    assert_eq!(report.archives.len(), 2);

    for populated in [
        "app/core/src/couchers_core/proto/api_pb2_grpc.py",
        "app/backend/src/couchers/proto/api_pb2.py",
        "app/media/src/media/proto/descriptors.pb",
        "app/web/proto/api_grpc_web_pb.js",
        "app/browser/src/proto/api_pb.js",
        "app/proto/gen/api_pb2.py",
    ] {
        assert!(root.join(populated).is_file(), "{}", populated);
    }
    let internal = root.join("app/backend/src/couchers/internal/proto");
    assert!(internal.is_dir());
    assert!(snapshot(&internal).is_empty());
}

/// Delegates to the built-in compiler but fails for one target.
struct FailingOn(&'static str);

impl SchemaCompiler for FailingOn {
    fn name(&self) -> &str {
        "failing"
    }

    fn compile(&self, request: &CompileRequest) -> Result<Vec<PathBuf>, PipelineError> {
        if request.target == self.0 {
            return Err(PipelineError::Generation {
                target:  request.target.to_string(),
                message: "plugin crashed".to_string(),
            });
        }
        BuiltinCompiler.compile(request)
    }
}

#[test]
fn test_generation_failure_produces_no_archive() {
    let dir = schema_tree();
    let root = dir.path();

    let pipeline = Pipeline::with_compiler(root, Config::default(), Box::new(FailingOn("browser")));
    let err = pipeline.run().unwrap_err();
    match &err {
        PipelineError::Generation { target, .. } => assert_eq!(target, "browser"),
        other => panic!("expected a generation error, got {:?}", other),
    }
    assert_eq!(err.stage(), Stage::Generation);
    assert!(!root.join("archives").exists());
    assert!(!root.join("app/proxy/descriptors.pb").exists());
}

#[cfg(unix)]
#[test]
fn test_protoc_failure_produces_no_archive() {
    use std::os::unix::fs::PermissionsExt;

    let dir = schema_tree();
    let root = dir.path();
    let tools = tempfile::tempdir().unwrap();
    let protoc = tools.path().join("protoc");
    fs::write(&protoc, "#!/bin/sh\necho 'api.proto: File not found.' >&2\nexit 1\n").unwrap();
    fs::set_permissions(&protoc, fs::Permissions::from_mode(0o755)).unwrap();

    let mut config = Config::default();
    config.compiler.backend = Backend::Protoc;
    config.compiler.protoc = Some(protoc);

    let err = Pipeline::new(root, config).unwrap().run().unwrap_err();
    match &err {
        PipelineError::Generation { target, message } => {
            assert_eq!(target, "core");
            assert!(message.contains("api.proto: File not found."), "{}", message);
        }
        other => panic!("expected a generation error, got {:?}", other),
    }
    assert!(!root.join("archives").exists());
    assert!(!root.join("app/proxy/descriptors.pb").exists());
}

#[test]
fn test_schema_error_aborts_the_run() {
    let dir = schema_tree();
    let root = dir.path();
    write(&root.join("app/proto"), "broken.proto", "syntax = \"proto3\";\nmessage Broken { int32 x = 1; int32 y = 1; }\n");

    let err = Pipeline::new(root, Config::default()).unwrap().run().unwrap_err();
    match err {
        PipelineError::Generation { target, message } => {
            assert_eq!(target, "core");
            assert!(message.contains("broken.proto"), "{}", message);
        }
        other => panic!("expected a generation error, got {:?}", other),
    }
    assert!(!root.join("archives").exists());
}

/// Delegates to the built-in compiler, then strips the generator header from
/// one file as a hand edit would.
struct HandEdited;

impl SchemaCompiler for HandEdited {
    fn name(&self) -> &str {
        "hand-edited"
    }

    fn compile(&self, request: &CompileRequest) -> Result<Vec<PathBuf>, PipelineError> {
        let written = BuiltinCompiler.compile(request)?;
        if request.target == "core" {
            fs::write(request.out_dir.join("api_pb2.py"), "import api_pb2 as api__pb2\n").unwrap();
        }
        Ok(written)
    }
}

#[test]
fn test_files_without_header_are_skipped() {
    let dir = schema_tree();
    let root = dir.path();

    let report = Pipeline::with_compiler(root, Config::default(), Box::new(HandEdited)).run().unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(read(root, "app/core/src/couchers_core/proto/api_pb2.py"), "import api_pb2 as api__pb2\n");
}

#[test]
fn test_config_file_replaces_the_registry() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(&root.join("schemas"), "google/api/http.proto", HTTP_PROTO);
    write(
        root,
        config::CONFIG_FILE_NAME,
        r#"
        [schema]
        root = "schemas"

        [descriptor]
        consumers = []

        [archives]
        bundles = []

        [[targets]]
        name = "api"
        directory = "out/api"
        kinds = ["native"]
        mode = "full"
        layout = { kind = "library_root" }
        "#,
    );

    let config = config::load_or_default(root).unwrap();
    let report = Pipeline::new(root, config).unwrap().run().unwrap();
    assert_eq!(report.targets, vec!["api"]);
    assert_eq!(report.descriptor_digest, None);
    assert!(report.archives.is_empty());
    assert!(root.join("out/api/google/api/http_pb2.py").is_file());
}

#[test]
fn test_invalid_registry_is_rejected_before_discovery() {
    let dir = tempfile::tempdir().unwrap();
    let config = config::parse_config(
        r#"
        [[targets]]
        name = "a"
        directory = "out"
        kinds = ["native"]
        mode = "full"
        layout = { kind = "flat" }

        [[targets]]
        name = "b"
        directory = "out/b"
        kinds = ["native"]
        mode = "full"
        layout = { kind = "flat" }
        "#,
    )
    .unwrap();

    let err = Pipeline::new(dir.path(), config).unwrap().run().unwrap_err();
    assert_eq!(err.stage(), Stage::Config);
}
