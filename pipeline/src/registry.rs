use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use protoplex_compiler::Emitter;
use serde::Deserialize;

use crate::error::{PipelineError, Result};

/// What a target wants out of a compiler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Python message modules.
    Native,
    /// Python gRPC stubs.
    Rpc,
    /// Browser message bindings and gRPC-Web clients.
    Browser,
    /// A copy of the shared binary descriptor.
    Descriptor,
}

impl ArtifactKind {
    /// The text emitter producing this kind, `None` for the descriptor.
    pub fn emitter(self) -> Option<Emitter> {
        match self {
            ArtifactKind::Native => Some(Emitter::PythonMessages),
            ArtifactKind::Rpc => Some(Emitter::PythonGrpc),
            ArtifactKind::Browser => Some(Emitter::BrowserTransport),
            ArtifactKind::Descriptor => None,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArtifactKind::Native => "native",
            ArtifactKind::Rpc => "rpc",
            ArtifactKind::Browser => "browser",
            ArtifactKind::Descriptor => "descriptor",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// Every source outside the internal directory.
    Full,
    /// Only sources under the internal directory, emitted flat.
    InternalOnly,
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GenerationMode::Full => "full",
            GenerationMode::InternalOnly => "internal_only",
        })
    }
}

/// How generated modules are imported by the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Layout {
    /// A Python sub-package; vendored namespaces live under `vendor_root`.
    Package { vendor_root: String },
    /// A standalone Python library rooted at the target directory.
    LibraryRoot,
    /// JS/TS output whose relative requires are already correct.
    Flat,
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Package { vendor_root } => write!(f, "package {}", vendor_root),
            Layout::LibraryRoot => f.write_str("library root"),
            Layout::Flat => f.write_str("flat"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputTarget {
    pub name:      String,
    /// Relative to the output root.
    pub directory: PathBuf,
    pub kinds:     Vec<ArtifactKind>,
    pub mode:      GenerationMode,
    pub layout:    Layout,
}

impl OutputTarget {
    fn new(name: &str, directory: &str, kinds: &[ArtifactKind], mode: GenerationMode, layout: Layout) -> Self {
        OutputTarget {
            name: name.to_string(),
            directory: PathBuf::from(directory),
            kinds: kinds.to_vec(),
            mode,
            layout,
        }
    }

    pub fn has(&self, kind: ArtifactKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Text emitters to request, in kind order.
    pub fn emitters(&self) -> Vec<Emitter> {
        self.kinds.iter().filter_map(|kind| kind.emitter()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArchiveSpec {
    pub name:      String,
    pub target:    String,
    pub file_name: String,
}

impl ArchiveSpec {
    pub fn new(name: &str, target: &str, file_name: &str) -> Self {
        ArchiveSpec {
            name:      name.to_string(),
            target:    target.to_string(),
            file_name: file_name.to_string(),
        }
    }
}

/// Which consumer gets which artifacts, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    pub targets:              Vec<OutputTarget>,
    pub descriptor_file_name: String,
    /// Extra descriptor copies outside any target, relative to the output root.
    pub descriptor_consumers: Vec<PathBuf>,
    pub archive_dir:          PathBuf,
    pub archives:             Vec<ArchiveSpec>,
}

pub fn default_targets() -> Vec<OutputTarget> {
    use ArtifactKind::*;
    use GenerationMode::*;

    let package = |vendor_root: &str| Layout::Package { vendor_root: vendor_root.to_string() };
    vec![
        OutputTarget::new("core", "app/core/src/couchers_core/proto", &[Native, Rpc], Full, package("couchers_core.proto")),
        OutputTarget::new("backend", "app/backend/src/couchers/proto", &[Native, Rpc, Descriptor], Full, package("couchers.proto")),
        OutputTarget::new("backend-internal", "app/backend/src/couchers/internal/proto", &[Native], InternalOnly, package("couchers.proto")),
        OutputTarget::new("media", "app/media/src/media/proto", &[Native, Rpc, Descriptor], Full, package("media.proto")),
        OutputTarget::new("web", "app/web/proto", &[Browser], Full, Layout::Flat),
        OutputTarget::new("browser", "app/browser/src/proto", &[Browser], Full, Layout::Flat),
        OutputTarget::new("dist", "app/proto/gen", &[Native, Rpc, Descriptor], Full, Layout::LibraryRoot),
    ]
}

pub fn default_archives() -> Vec<ArchiveSpec> {
    vec![
        ArchiveSpec::new("python", "dist", "python.tar.gz"),
        ArchiveSpec::new("web", "web", "web.tar.gz"),
    ]
}

impl Default for Registry {
    fn default() -> Self {
        Registry {
            targets:              default_targets(),
            descriptor_file_name: "descriptors.pb".to_string(),
            descriptor_consumers: vec![PathBuf::from("app/proxy/descriptors.pb")],
            archive_dir:          PathBuf::from("archives"),
            archives:             default_archives(),
        }
    }
}

/// Relative, with no `..` or root components.
fn is_contained(path: &Path) -> bool {
    path.components().next().is_some() && path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// A single plain path component.
fn is_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!((components.next(), components.next()), (Some(Component::Normal(_)), None))
}

impl Registry {
    pub fn target(&self, name: &str) -> Option<&OutputTarget> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn needs_descriptor(&self) -> bool {
        !self.descriptor_consumers.is_empty() || self.targets.iter().any(|t| t.has(ArtifactKind::Descriptor))
    }

    /// The target whose compiler invocation also writes the descriptor: the
    /// first `full` target in table order.
    pub fn descriptor_source(&self) -> Option<&OutputTarget> {
        if !self.needs_descriptor() {
            return None;
        }
        self.targets.iter().find(|t| t.mode == GenerationMode::Full)
    }

    /// Every path receiving a descriptor copy, relative to the output root.
    pub fn descriptor_destinations(&self) -> Vec<PathBuf> {
        self.targets
            .iter()
            .filter(|t| t.has(ArtifactKind::Descriptor))
            .map(|t| t.directory.join(&self.descriptor_file_name))
            .chain(self.descriptor_consumers.iter().cloned())
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(PipelineError::Config(msg));

        if self.targets.is_empty() {
            return invalid("the target registry is empty".to_string());
        }

        let mut names = HashSet::new();
        for target in &self.targets {
            if target.name.is_empty() {
                return invalid("a target has an empty name".to_string());
            }
            if !names.insert(target.name.as_str()) {
                return invalid(format!("target {} is defined twice", target.name));
            }
            if target.kinds.is_empty() {
                return invalid(format!("target {} emits nothing", target.name));
            }
            if !is_contained(&target.directory) {
                return invalid(format!(
                    "directory {} of target {} must be relative to the output root",
                    target.directory.display(),
                    target.name
                ));
            }
        }

        // Each target owns its directory exclusively.
        for (i, a) in self.targets.iter().enumerate() {
            for b in &self.targets[i + 1..] {
                if a.directory.starts_with(&b.directory) || b.directory.starts_with(&a.directory) {
                    return invalid(format!(
                        "targets {} and {} share the directory tree {}",
                        a.name,
                        b.name,
                        a.directory.display()
                    ));
                }
            }
        }

        if self.needs_descriptor() {
            if self.descriptor_source().is_none() {
                return invalid("a descriptor is requested but no target uses full generation".to_string());
            }
            if !is_file_name(&self.descriptor_file_name) {
                return invalid(format!("invalid descriptor file name {:?}", self.descriptor_file_name));
            }
            if let Some(consumer) = self.descriptor_consumers.iter().find(|p| !is_contained(p)) {
                return invalid(format!(
                    "descriptor consumer {} must be relative to the output root",
                    consumer.display()
                ));
            }
        }

        if !self.archives.is_empty() && !is_contained(&self.archive_dir) {
            return invalid(format!(
                "archive directory {} must be relative to the output root",
                self.archive_dir.display()
            ));
        }

        let mut archive_files = HashSet::new();
        for archive in &self.archives {
            if self.target(&archive.target).is_none() {
                return invalid(format!("archive {} names unknown target {}", archive.name, archive.target));
            }
            if !is_file_name(&archive.file_name) {
                return invalid(format!("invalid archive file name {:?} for archive {}", archive.file_name, archive.name));
            }
            if !archive_files.insert(archive.file_name.as_str()) {
                return invalid(format!("archive file {} is produced twice", archive.file_name));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expect_invalid(registry: &Registry, needle: &str) {
        match registry.validate() {
            Err(PipelineError::Config(msg)) => assert!(msg.contains(needle), "{}", msg),
            other => panic!("expected a config error, got {:?}", other),
        }
    }

    #[test]
    fn test_default_registry_is_valid() {
        let registry = Registry::default();
        registry.validate().unwrap();

        assert_eq!(registry.targets.len(), 7);
        assert_eq!(registry.descriptor_source().unwrap().name, "core");
        assert_eq!(
            registry.descriptor_destinations(),
            vec![
                PathBuf::from("app/backend/src/couchers/proto/descriptors.pb"),
                PathBuf::from("app/media/src/media/proto/descriptors.pb"),
                PathBuf::from("app/proto/gen/descriptors.pb"),
                PathBuf::from("app/proxy/descriptors.pb"),
            ]
        );
        assert_eq!(
            registry.target("backend").unwrap().emitters(),
            vec![Emitter::PythonMessages, Emitter::PythonGrpc]
        );
    }

    #[test]
    fn test_duplicate_names() {
        let mut registry = Registry::default();
        registry.targets[1].name = "core".to_string();
        expect_invalid(&registry, "defined twice");
    }

    #[test]
    fn test_nested_directories() {
        let mut registry = Registry::default();
        registry.targets[2].directory = PathBuf::from("app/backend/src/couchers/proto/internal");
        expect_invalid(&registry, "share the directory tree");
    }

    #[test]
    fn test_escaping_directory() {
        let mut registry = Registry::default();
        registry.targets[4].directory = PathBuf::from("../web");
        expect_invalid(&registry, "relative to the output root");
    }

    #[test]
    fn test_descriptor_without_full_target() {
        let mut registry = Registry::default();
        for target in &mut registry.targets {
            target.mode = GenerationMode::InternalOnly;
        }
        expect_invalid(&registry, "no target uses full generation");
    }

    #[test]
    fn test_archive_of_unknown_target() {
        let mut registry = Registry::default();
        registry.archives.push(ArchiveSpec::new("docs", "docs", "docs.tar.gz"));
        expect_invalid(&registry, "unknown target docs");
    }

    #[test]
    fn test_archive_file_name_escapes_output_root() {
        for file_name in ["../../x.tar.gz", "/tmp/x.tar.gz", "nested/x.tar.gz", "..", ""] {
            let mut registry = Registry::default();
            registry.archives[0].file_name = file_name.to_string();
            expect_invalid(&registry, "invalid archive file name");
        }

        let mut registry = Registry::default();
        registry.archive_dir = PathBuf::from("../archives");
        expect_invalid(&registry, "archive directory ../archives");
    }

    #[test]
    fn test_descriptor_file_name_is_a_single_component() {
        let mut registry = Registry::default();
        registry.descriptor_file_name = "../descriptors.pb".to_string();
        expect_invalid(&registry, "invalid descriptor file name");
    }
}
