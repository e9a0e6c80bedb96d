use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::{
    backend::{CompileRequest, SchemaCompiler},
    digest::sha256_hex,
    discovery::{SchemaSources, Selection},
    error::{PipelineError, Result, Stage},
    registry::{GenerationMode, OutputTarget, Registry},
};

/// A text file freshly written by the compiler, not yet rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub target:  String,
    /// The target directory, absolute or relative to the working directory.
    pub root:    PathBuf,
    /// Relative to `root`.
    pub path:    PathBuf,
    pub content: String,
}

impl GeneratedFile {
    pub fn full_path(&self) -> PathBuf {
        self.root.join(&self.path)
    }
}

/// The shared binary descriptor, produced once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorArtifact {
    pub bytes:  Vec<u8>,
    /// Hex SHA-256 of `bytes`.
    pub digest: String,
}

impl DescriptorArtifact {
    pub fn new(bytes: Vec<u8>) -> Self {
        let digest = sha256_hex(&bytes);
        DescriptorArtifact { bytes, digest }
    }

    pub fn matches(&self, bytes: &[u8]) -> bool {
        sha256_hex(bytes) == self.digest
    }
}

/// Output of the generation stage.
#[derive(Debug)]
pub struct Generation {
    pub files:      Vec<GeneratedFile>,
    pub descriptor: Option<DescriptorArtifact>,
}

struct Plan<'r> {
    target:    &'r OutputTarget,
    selection: Selection,
    out_dir:   PathBuf,
}

/// Runs `compiler` once per target in registry order. A target whose mode
/// selects no sources gets an empty directory and no compiler call. The
/// descriptor comes from the first `full` target with sources.
pub fn generate(
    compiler: &dyn SchemaCompiler,
    sources: &SchemaSources,
    registry: &Registry,
    out_root: &Path,
    internal_dir: &str,
) -> Result<Generation> {
    let plans: Vec<Plan> = registry
        .targets
        .iter()
        .map(|target| Plan {
            target,
            selection: sources.select(target.mode, internal_dir),
            out_dir: out_root.join(&target.directory),
        })
        .collect();

    let descriptor_source = registry
        .descriptor_source()
        .and_then(|_| {
            plans
                .iter()
                .find(|p| p.target.mode == GenerationMode::Full && !p.selection.inputs.is_empty())
        })
        .map(|p| p.target.name.as_str());
    let staging = tempfile::tempdir().map_err(PipelineError::io(Stage::Generation, std::env::temp_dir()))?;
    let staged_descriptor = staging.path().join(&registry.descriptor_file_name);

    let mut files = Vec::new();
    let mut descriptor = None;

    for plan in &plans {
        let target = plan.target;
        fs::create_dir_all(&plan.out_dir).map_err(PipelineError::io(Stage::Generation, &plan.out_dir))?;

        if plan.selection.inputs.is_empty() {
            info!("target {} has no {} sources, nothing to generate", target.name, target.mode);
            continue;
        }

        let emitters = target.emitters();
        let wants_descriptor = descriptor_source == Some(target.name.as_str());
        if emitters.is_empty() && !wants_descriptor {
            debug!("target {} has no text artifacts", target.name);
            continue;
        }

        let request = CompileRequest {
            target:         &target.name,
            include_paths:  &plan.selection.include_paths,
            inputs:         &plan.selection.inputs,
            emitters:       &emitters,
            out_dir:        &plan.out_dir,
            descriptor_out: wants_descriptor.then_some(staged_descriptor.as_path()),
        };
        let written = compiler.compile(&request)?;
        info!(
            "generated {} files for target {} ({} inputs, {} mode)",
            written.len(),
            target.name,
            plan.selection.inputs.len(),
            target.mode
        );

        for path in written {
            let full_path = plan.out_dir.join(&path);
            let content = fs::read_to_string(&full_path).map_err(PipelineError::io(Stage::Generation, &full_path))?;
            debug!("generated {}", full_path.display());
            files.push(GeneratedFile {
                target: target.name.clone(),
                root: plan.out_dir.clone(),
                path,
                content,
            });
        }

        if wants_descriptor {
            let bytes = fs::read(&staged_descriptor).map_err(|e| PipelineError::Generation {
                target:  target.name.clone(),
                message: format!("descriptor was not produced: {}", e),
            })?;
            let artifact = DescriptorArtifact::new(bytes);
            info!("descriptor produced by target {} ({} bytes, sha256 {})", target.name, artifact.bytes.len(), artifact.digest);
            descriptor = Some(artifact);
        }
    }

    Ok(Generation { files, descriptor })
}
