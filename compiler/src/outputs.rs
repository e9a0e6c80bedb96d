use serde::Serialize;

use crate::{
    gen_python::{generate_python_grpc, generate_python_messages},
    gen_web::{generate_grpc_web, generate_grpc_web_dts, generate_js_messages, generate_js_messages_dts},
    types::{DescriptorSet, FileDescriptor},
};

/// A family of generated text outputs. The file names follow the protoc
/// plugin conventions so the built-in compiler and `protoc` produce the same
/// tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Emitter {
    /// `x_pb2.py`
    PythonMessages,
    /// `x_pb2_grpc.py`
    PythonGrpc,
    /// `x_pb.js` + `x_pb.d.ts`, plus `x_grpc_web_pb.js` + `.d.ts` for files
    /// declaring services.
    BrowserTransport,
}

/// One emitted file, path relative to the output directory.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedFile {
    pub path:    String,
    pub content: String,
}

impl Emitter {
    /// Output paths for the schema file with the given stem
    /// (e.g. `google/api/http`).
    pub fn output_names(self, stem: &str, has_services: bool) -> Vec<String> {
        match self {
            Emitter::PythonMessages => vec![format!("{}_pb2.py", stem)],
            Emitter::PythonGrpc => vec![format!("{}_pb2_grpc.py", stem)],
            Emitter::BrowserTransport => {
                let mut names = vec![format!("{}_pb.js", stem), format!("{}_pb.d.ts", stem)];
                if has_services {
                    names.push(format!("{}_grpc_web_pb.js", stem));
                    names.push(format!("{}_grpc_web_pb.d.ts", stem));
                }
                names
            }
        }
    }

    /// Render this emitter's outputs for `file`, which must be part of `set`.
    pub fn emit(self, set: &DescriptorSet, file: &FileDescriptor) -> Vec<EmittedFile> {
        let names = self.output_names(file.stem(), !file.services.is_empty());
        let contents = match self {
            Emitter::PythonMessages => vec![generate_python_messages(set, file)],
            Emitter::PythonGrpc => vec![generate_python_grpc(set, file)],
            Emitter::BrowserTransport => {
                let mut contents = vec![generate_js_messages(set, file), generate_js_messages_dts(set, file)];
                if !file.services.is_empty() {
                    contents.push(generate_grpc_web(set, file));
                    contents.push(generate_grpc_web_dts(set, file));
                }
                contents
            }
        };

        names
            .into_iter()
            .zip(contents)
            .map(|(path, content)| EmittedFile { path, content })
            .collect()
    }
}
