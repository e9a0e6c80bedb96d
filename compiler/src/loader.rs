use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{
    error::CompileError,
    parser::parse_schema,
    tokenizer::tokenize_schema,
    types::{DescriptorSet, FileDescriptor},
};

#[derive(Clone, Copy, PartialEq)]
enum Visit {
    InProgress,
    Done,
}

/// Loads schema files and everything they import from an ordered list of
/// include paths. The first include path containing an import wins.
pub struct Loader {
    include_paths: Vec<PathBuf>,
}

impl Loader {
    pub fn new<P: AsRef<Path>>(include_paths: &[P]) -> Self {
        Loader {
            include_paths: include_paths.iter().map(|p| p.as_ref().to_path_buf()).collect(),
        }
    }

    /// Loads `inputs` (import-style names such as `google/api/http.proto`)
    /// and their transitive imports. Files come back in dependency order:
    /// every file appears after all of the files it imports.
    pub fn load(&self, inputs: &[String]) -> Result<DescriptorSet, CompileError> {
        let mut state: HashMap<String, Visit> = HashMap::new();
        let mut files = Vec::new();
        let mut stack = Vec::new();

        for input in inputs {
            self.visit(input, None, &mut state, &mut stack, &mut files)?;
        }

        Ok(DescriptorSet { files })
    }

    fn visit(
        &self,
        name: &str,
        importer: Option<&str>,
        state: &mut HashMap<String, Visit>,
        stack: &mut Vec<String>,
        files: &mut Vec<FileDescriptor>,
    ) -> Result<(), CompileError> {
        match state.get(name) {
            Some(Visit::Done) => return Ok(()),
            Some(Visit::InProgress) => {
                let mut cycle: Vec<&str> = stack
                    .iter()
                    .skip_while(|f| f.as_str() != name)
                    .map(|f| f.as_str())
                    .collect();
                cycle.push(name);
                return Err(CompileError::ImportError {
                    file:   importer.unwrap_or(name).to_string(),
                    import: name.to_string(),
                    msg:    format!("import cycle: {}", cycle.join(" -> ")),
                });
            }
            None => {}
        }

        let path = self.resolve(name).ok_or_else(|| CompileError::ImportError {
            file:   importer.unwrap_or("<input>").to_string(),
            import: name.to_string(),
            msg:    "file not found in any include path".to_string(),
        })?;

        let text = fs::read_to_string(&path).map_err(|source| CompileError::Io {
            path: path.clone(),
            source,
        })?;
        let tokens = tokenize_schema(&text).map_err(|e| e.in_file(name))?;
        let file = parse_schema(name, &tokens)?;

        state.insert(name.to_string(), Visit::InProgress);
        stack.push(name.to_string());
        for dep in &file.dependencies {
            self.visit(dep, Some(name), state, stack, files)?;
        }
        stack.pop();
        state.insert(name.to_string(), Visit::Done);

        files.push(file);
        Ok(())
    }

    fn resolve(&self, name: &str) -> Option<PathBuf> {
        if Path::new(name).is_absolute() || name.split('/').any(|part| part == "..") {
            return None;
        }
        self.include_paths
            .iter()
            .map(|root| root.join(name))
            .find(|candidate| candidate.is_file())
    }
}

/// Import-style name (`/`-separated) of `path` relative to `root`.
pub fn import_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
