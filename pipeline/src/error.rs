use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The pipeline stage an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Discovery,
    Generation,
    Rewrite,
    Distribution,
    Packaging,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Config => "config",
            Stage::Discovery => "discovery",
            Stage::Generation => "generation",
            Stage::Rewrite => "rewrite",
            Stage::Distribution => "distribution",
            Stage::Packaging => "packaging",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("No schema sources found under {}", root.display())]
    SchemaDiscovery { root: PathBuf },

    #[error("Code generation failed for target {target}: {message}")]
    Generation { target: String, message: String },

    #[error("Rule {rule} produced a malformed line at {}:{line}: {text}", path.display())]
    RewriteMismatch {
        path: PathBuf,
        rule: String,
        line: usize,
        text: String,
    },

    #[error("Descriptor distribution failed: {0}")]
    Distribution(String),

    #[error("Failed to package {}: {source}", archive.display())]
    Packaging {
        archive: PathBuf,
        #[source]
        source:  std::io::Error,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        stage:  Stage,
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Config(_) => Stage::Config,
            PipelineError::SchemaDiscovery { .. } => Stage::Discovery,
            PipelineError::Generation { .. } => Stage::Generation,
            PipelineError::RewriteMismatch { .. } => Stage::Rewrite,
            PipelineError::Distribution(_) => Stage::Distribution,
            PipelineError::Packaging { .. } => Stage::Packaging,
            PipelineError::Io { stage, .. } => *stage,
        }
    }

    pub(crate) fn io(stage: Stage, path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> PipelineError {
        let path = path.into();
        move |source| PipelineError::Io { stage, path, source }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
