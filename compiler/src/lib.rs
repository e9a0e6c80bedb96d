//! protoplex-compiler
//!
//! The built-in schema compiler used by protoplex when `protoc` is not
//! wanted. It implements:
//!  1) A tokenizer + parser for the proto2/proto3 subset used by flat
//!     schema trees (top-level messages, enums and services),
//!  2) An import loader walking ordered include paths,
//!  3) A verifier (duplicate symbols, field numbers, type resolution),
//!  4) `encode_descriptor_set` / `decode_descriptor_set`, a self-contained
//!     binary descriptor keeping every file, definition and location,
//!  5) Emitters for Python messages, Python gRPC stubs and browser
//!     (CommonJS + gRPC-Web) bindings,
//!  6) Error types (`CompileError`).

pub mod error;
pub mod types;
pub mod utils;
pub mod tokenizer;
pub mod parser;
pub mod loader;
pub mod verifier;
pub mod descriptor;
pub mod outputs;
pub mod gen_python;
pub mod gen_web;

use std::path::Path;

pub use descriptor::{decode_descriptor_set, encode_descriptor_set};
pub use error::CompileError;
pub use loader::{import_name, Loader};
pub use outputs::{EmittedFile, Emitter};
pub use types::DescriptorSet;

use crate::{parser::parse_schema, tokenizer::tokenize_schema, verifier::verify_descriptor_set};

/// Load `inputs` (import-style names) and everything they import from
/// `include_paths`, then verify and resolve the whole set.
pub fn compile_files<P: AsRef<Path>>(include_paths: &[P], inputs: &[String]) -> Result<DescriptorSet, CompileError> {
    let mut set = Loader::new(include_paths).load(inputs)?;
    verify_descriptor_set(&mut set)?;
    Ok(set)
}

/// Compile a single self-contained schema text into `(DescriptorSet, Vec<u8>)`.
/// Returns `Err(CompileError)` if tokenization/parsing/verification fails.
pub fn compile_schema(name: &str, text: &str) -> Result<(DescriptorSet, Vec<u8>), CompileError> {
    let tokens = tokenize_schema(text).map_err(|e| e.in_file(name))?;
    let file = parse_schema(name, &tokens)?;
    let mut set = DescriptorSet { files: vec![file] };
    verify_descriptor_set(&mut set)?;
    let bin = encode_descriptor_set(&set)?;
    Ok((set, bin))
}

/// Decode a binary descriptor into a pretty-printed JSON string.
pub fn decode_to_json(buffer: &[u8]) -> Result<String, CompileError> {
    let set = decode_descriptor_set(buffer)?;
    serde_json::to_string_pretty(&set).map_err(|e| CompileError::DecodeError(e.to_string()))
}
