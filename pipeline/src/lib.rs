//! protoplex
//!
//! Compiles one tree of `.proto` schemas into bindings for every consumer of
//! the wire contract:
//!  1) Schema discovery under the schema root,
//!  2) Generation per entry of the Output Target Registry, through a
//!     [`SchemaCompiler`] (built-in or `protoc`), producing the shared binary
//!     descriptor exactly once,
//!  3) Import rewriting of the generated Python so it imports as a package,
//!  4) Descriptor distribution to every target and external consumer,
//!  5) Archive packaging of the distributable trees.
//!
//! ```no_run
//! use std::path::Path;
//! use protoplex::{config, Pipeline};
//!
//! let config = config::load_or_default(Path::new("."))?;
//! let report = Pipeline::new(".", config)?.run()?;
//! println!("{}", report);
//! # Ok::<(), protoplex::PipelineError>(())
//! ```

pub mod backend;
pub mod config;
pub mod digest;
pub mod discovery;
pub mod distribute;
pub mod error;
pub mod generate;
pub mod package;
pub mod pipeline;
pub mod registry;
pub mod rewrite;

pub use backend::{BuiltinCompiler, CompileRequest, ProtocCompiler, SchemaCompiler};
pub use config::Config;
pub use error::{PipelineError, Stage};
pub use pipeline::{Pipeline, RunReport};
pub use registry::{ArtifactKind, GenerationMode, Layout, OutputTarget, Registry};
