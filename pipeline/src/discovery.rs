use std::path::{Path, PathBuf};

use protoplex_compiler::import_name;
use tracing::debug;
use walkdir::WalkDir;

use crate::{
    error::{PipelineError, Result, Stage},
    registry::GenerationMode,
};

/// The schema files of one run, discovered fresh at run start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSources {
    pub root:  PathBuf,
    /// Import-style paths relative to `root`, sorted.
    pub files: Vec<String>,
}

/// What a generation mode compiles: include paths (first wins) and inputs
/// named relative to the first include path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub include_paths: Vec<PathBuf>,
    pub inputs:        Vec<String>,
}

impl SchemaSources {
    pub fn select(&self, mode: GenerationMode, internal_dir: &str) -> Selection {
        let prefix = format!("{}/", internal_dir.trim_end_matches('/'));
        match mode {
            GenerationMode::Full => Selection {
                include_paths: vec![self.root.clone()],
                inputs:        self.files.iter().filter(|f| !f.starts_with(&prefix)).cloned().collect(),
            },
            GenerationMode::InternalOnly => Selection {
                include_paths: vec![self.root.join(internal_dir), self.root.clone()],
                inputs:        self
                    .files
                    .iter()
                    .filter_map(|f| f.strip_prefix(&prefix))
                    .map(str::to_string)
                    .collect(),
            },
        }
    }
}

/// Walk `root` for `.proto` files. A missing root or an empty result is a
/// `SchemaDiscovery` error; nothing is created or written here.
pub fn discover(root: &Path, exclude: &[PathBuf]) -> Result<SchemaSources> {
    if !root.is_dir() {
        return Err(PipelineError::SchemaDiscovery { root: root.to_path_buf() });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            PipelineError::Io { stage: Stage::Discovery, path, source: e.into() }
        })?;
        if !entry.file_type().is_file() || entry.path().extension().map_or(true, |ext| ext != "proto") {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if exclude.iter().any(|prefix| relative.starts_with(prefix)) {
            debug!("excluding {}", relative.display());
            continue;
        }
        if let Some(name) = import_name(root, entry.path()) {
            files.push(name);
        }
    }

    if files.is_empty() {
        return Err(PipelineError::SchemaDiscovery { root: root.to_path_buf() });
    }
    files.sort();

    Ok(SchemaSources { root: root.to_path_buf(), files })
}
