use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use protoplex_compiler::{compile_files, encode_descriptor_set, Emitter};
use tracing::debug;

use crate::{
    config::{Backend, CompilerConfig},
    error::{PipelineError, Result, Stage},
};

/// One compiler invocation: every text emitter of a target at once, plus the
/// descriptor when `descriptor_out` is set.
#[derive(Debug, Clone)]
pub struct CompileRequest<'a> {
    pub target:         &'a str,
    /// First match wins.
    pub include_paths:  &'a [PathBuf],
    /// Import-style names relative to the first include path.
    pub inputs:         &'a [String],
    pub emitters:       &'a [Emitter],
    pub out_dir:        &'a Path,
    pub descriptor_out: Option<&'a Path>,
}

impl CompileRequest<'_> {
    fn failed(&self, message: impl Into<String>) -> PipelineError {
        PipelineError::Generation {
            target:  self.target.to_string(),
            message: message.into(),
        }
    }
}

/// A schema compiler able to serve a [`CompileRequest`].
pub trait SchemaCompiler {
    fn name(&self) -> &str;

    /// Runs the request and returns the written text files relative to
    /// `out_dir`, sorted.
    fn compile(&self, request: &CompileRequest) -> Result<Vec<PathBuf>>;
}

/// The in-process compiler from `protoplex-compiler`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinCompiler;

impl SchemaCompiler for BuiltinCompiler {
    fn name(&self) -> &str {
        "builtin"
    }

    fn compile(&self, request: &CompileRequest) -> Result<Vec<PathBuf>> {
        let set = compile_files(request.include_paths, request.inputs).map_err(|e| request.failed(e.to_string()))?;

        let mut written = Vec::new();
        for file in set.files.iter().filter(|f| request.inputs.contains(&f.name)) {
            for emitter in request.emitters {
                for emitted in emitter.emit(&set, file) {
                    let path = request.out_dir.join(&emitted.path);
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent).map_err(PipelineError::io(Stage::Generation, parent))?;
                    }
                    fs::write(&path, emitted.content).map_err(PipelineError::io(Stage::Generation, &path))?;
                    written.push(PathBuf::from(emitted.path));
                }
            }
        }

        if let Some(descriptor_out) = request.descriptor_out {
            let bytes = encode_descriptor_set(&set).map_err(|e| request.failed(e.to_string()))?;
            fs::write(descriptor_out, bytes).map_err(PipelineError::io(Stage::Generation, descriptor_out))?;
        }

        written.sort();
        Ok(written)
    }
}

/// Shells out to `protoc` with the stock Python, gRPC Python, JS and
/// gRPC-Web plugins.
#[derive(Debug, Clone)]
pub struct ProtocCompiler {
    pub protoc:             PathBuf,
    pub grpc_python_plugin: Option<PathBuf>,
    pub grpc_web_plugin:    Option<PathBuf>,
}

impl ProtocCompiler {
    /// Uses the configured binary, or finds `protoc` on `PATH`.
    pub fn locate(config: &CompilerConfig) -> Result<Self> {
        let protoc = match &config.protoc {
            Some(path) => path.clone(),
            None => which::which("protoc")
                .map_err(|e| PipelineError::Config(format!("protoc not found on PATH: {}", e)))?,
        };
        Ok(ProtocCompiler {
            protoc,
            grpc_python_plugin: config.grpc_python_plugin.clone(),
            grpc_web_plugin: config.grpc_web_plugin.clone(),
        })
    }

    pub fn arguments(&self, request: &CompileRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        let out = request.out_dir.display();

        for include in request.include_paths {
            let mut arg = OsString::from("--proto_path=");
            arg.push(include);
            args.push(arg);
        }

        for emitter in request.emitters {
            match emitter {
                Emitter::PythonMessages => args.push(format!("--python_out={}", out).into()),
                Emitter::PythonGrpc => {
                    if let Some(plugin) = &self.grpc_python_plugin {
                        args.push(format!("--plugin=protoc-gen-grpc_python={}", plugin.display()).into());
                    }
                    args.push(format!("--grpc_python_out={}", out).into());
                }
                Emitter::BrowserTransport => {
                    if let Some(plugin) = &self.grpc_web_plugin {
                        args.push(format!("--plugin=protoc-gen-grpc-web={}", plugin.display()).into());
                    }
                    args.push(format!("--js_out=import_style=commonjs,binary:{}", out).into());
                    args.push(format!("--grpc-web_out=import_style=commonjs+dts,mode=grpcwebtext:{}", out).into());
                }
            }
        }

        if let Some(descriptor_out) = request.descriptor_out {
            args.push(format!("--descriptor_set_out={}", descriptor_out.display()).into());
            args.push("--include_imports".into());
            args.push("--include_source_info".into());
        }

        args.extend(request.inputs.iter().map(OsString::from));
        args
    }
}

impl SchemaCompiler for ProtocCompiler {
    fn name(&self) -> &str {
        "protoc"
    }

    fn compile(&self, request: &CompileRequest) -> Result<Vec<PathBuf>> {
        let args = self.arguments(request);
        debug!("invoking {} for target {} with {:?}", self.protoc.display(), request.target, args);

        let output = Command::new(&self.protoc)
            .args(&args)
            .output()
            .map_err(|e| request.failed(format!("failed to run {}: {}", self.protoc.display(), e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(request.failed(format!("protoc exited with {}: {}", output.status, stderr.trim())));
        }

        // protoc does not report what it wrote; keep the predicted names
        // that exist now.
        let mut written: Vec<PathBuf> = request
            .inputs
            .iter()
            .flat_map(|input| {
                let stem = input.strip_suffix(".proto").unwrap_or(input);
                request.emitters.iter().flat_map(move |emitter| emitter.output_names(stem, true))
            })
            .map(PathBuf::from)
            .filter(|path| request.out_dir.join(path).is_file())
            .collect();
        written.sort();
        Ok(written)
    }
}

/// The compiler selected by configuration.
pub fn from_config(config: &CompilerConfig) -> Result<Box<dyn SchemaCompiler>> {
    match config.backend {
        Backend::Builtin => Ok(Box::new(BuiltinCompiler)),
        Backend::Protoc => Ok(Box::new(ProtocCompiler::locate(config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protoc_arguments() {
        let protoc = ProtocCompiler {
            protoc:             PathBuf::from("protoc"),
            grpc_python_plugin: Some(PathBuf::from("/usr/bin/grpc_python_plugin")),
            grpc_web_plugin:    None,
        };
        let include_paths = vec![PathBuf::from("app/proto/internal"), PathBuf::from("app/proto")];
        let inputs = vec!["jobs.proto".to_string()];
        let emitters = [Emitter::PythonMessages, Emitter::PythonGrpc, Emitter::BrowserTransport];
        let request = CompileRequest {
            target:         "backend",
            include_paths:  &include_paths,
            inputs:         &inputs,
            emitters:       &emitters,
            out_dir:        Path::new("out"),
            descriptor_out: Some(Path::new("stage/descriptors.pb")),
        };

        let args: Vec<String> = protoc
            .arguments(&request)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "--proto_path=app/proto/internal",
                "--proto_path=app/proto",
                "--python_out=out",
                "--plugin=protoc-gen-grpc_python=/usr/bin/grpc_python_plugin",
                "--grpc_python_out=out",
                "--js_out=import_style=commonjs,binary:out",
                "--grpc-web_out=import_style=commonjs+dts,mode=grpcwebtext:out",
                "--descriptor_set_out=stage/descriptors.pb",
                "--include_imports",
                "--include_source_info",
                "jobs.proto",
            ]
        );
    }

    /// An executable shell script standing in for `protoc`.
    #[cfg(unix)]
    fn fake_protoc(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("protoc");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    fn protoc_at(path: PathBuf) -> ProtocCompiler {
        ProtocCompiler::locate(&CompilerConfig {
            backend: Backend::Protoc,
            protoc: Some(path),
            ..CompilerConfig::default()
        })
        .unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_protoc_failure_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let protoc = protoc_at(fake_protoc(dir.path(), "echo 'api.proto:3:1: Expected \"{\".' >&2\nexit 1"));
        let include_paths = vec![dir.path().to_path_buf()];
        let inputs = vec!["api.proto".to_string()];
        let request = CompileRequest {
            target:         "core",
            include_paths:  &include_paths,
            inputs:         &inputs,
            emitters:       &[Emitter::PythonMessages],
            out_dir:        dir.path(),
            descriptor_out: None,
        };

        match protoc.compile(&request) {
            Err(PipelineError::Generation { target, message }) => {
                assert_eq!(target, "core");
                assert!(message.contains("api.proto:3:1: Expected"), "{}", message);
            }
            other => panic!("expected a generation error, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_protoc_reports_files_that_exist() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        // Writes the message module only, never the gRPC one.
        let protoc = protoc_at(fake_protoc(
            dir.path(),
            "for arg in \"$@\"; do\n  case \"$arg\" in\n    --python_out=*) out=\"${arg#--python_out=}\" ;;\n  esac\ndone\n\
             mkdir -p \"$out/google/api\"\n\
             echo '# Generated.  DO NOT EDIT!' > \"$out/api_pb2.py\"\n\
             echo '# Generated.  DO NOT EDIT!' > \"$out/google/api/http_pb2.py\"",
        ));
        let include_paths = vec![dir.path().to_path_buf()];
        let inputs = vec!["api.proto".to_string(), "google/api/http.proto".to_string()];
        let request = CompileRequest {
            target:         "backend",
            include_paths:  &include_paths,
            inputs:         &inputs,
            emitters:       &[Emitter::PythonMessages, Emitter::PythonGrpc],
            out_dir:        &out,
            descriptor_out: None,
        };

        let written = protoc.compile(&request).unwrap();
        assert_eq!(written, vec![PathBuf::from("api_pb2.py"), PathBuf::from("google/api/http_pb2.py")]);
    }

    #[test]
    fn test_builtin_reports_generation_errors() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.proto"), "syntax = \"proto3\";\nmessage {").unwrap();
        let include_paths = vec![dir.path().to_path_buf()];
        let inputs = vec!["bad.proto".to_string()];
        let request = CompileRequest {
            target:         "core",
            include_paths:  &include_paths,
            inputs:         &inputs,
            emitters:       &[Emitter::PythonMessages],
            out_dir:        dir.path(),
            descriptor_out: None,
        };

        match BuiltinCompiler.compile(&request) {
            Err(PipelineError::Generation { target, message }) => {
                assert_eq!(target, "core");
                assert!(message.contains("bad.proto"), "{}", message);
            }
            other => panic!("expected a generation error, got {:?}", other),
        }
    }
}
