//! Configuration file loading for protoplex.
//!
//! Discovers and loads `protoplex.toml` from the output root. Every section
//! is optional; a missing file means the built-in registry and defaults.
//! Command line flags are applied on top by the caller.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::{
    error::{PipelineError, Result},
    registry::{default_archives, ArchiveSpec, OutputTarget, Registry},
};

/// The config file name to search for.
pub const CONFIG_FILE_NAME: &str = "protoplex.toml";

/// Top-level configuration from protoplex.toml.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schema:     SchemaConfig,
    pub compiler:   CompilerConfig,
    pub rewrite:    RewriteConfig,
    pub descriptor: DescriptorConfig,
    pub archives:   ArchivesConfig,
    /// Replaces the built-in target table wholesale when non-empty.
    pub targets:    Vec<OutputTarget>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Schema root, relative to the output root.
    pub root:         PathBuf,
    /// Directory under the schema root holding internal-only schemas.
    pub internal_dir: String,
    /// Relative path prefixes dropped from discovery.
    pub exclude:      Vec<PathBuf>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            root:         PathBuf::from("app/proto"),
            internal_dir: "internal".to_string(),
            exclude:      Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Builtin,
    Protoc,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub backend:            Backend,
    /// Explicit `protoc` binary; looked up on `PATH` otherwise.
    pub protoc:             Option<PathBuf>,
    pub grpc_python_plugin: Option<PathBuf>,
    pub grpc_web_plugin:    Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// Text identifying a generated file.
    pub header_marker:       String,
    /// How many leading lines are searched for the marker.
    pub header_lines:        usize,
    /// Python namespaces vendored inside every package target.
    pub vendored_namespaces: Vec<String>,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            header_marker:       "DO NOT EDIT".to_string(),
            header_lines:        5,
            vendored_namespaces: vec!["google.api".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DescriptorConfig {
    pub file_name: String,
    pub consumers: Vec<PathBuf>,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            file_name: "descriptors.pb".to_string(),
            consumers: vec![PathBuf::from("app/proxy/descriptors.pb")],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchivesConfig {
    pub dir:     PathBuf,
    pub bundles: Vec<ArchiveSpec>,
}

impl Default for ArchivesConfig {
    fn default() -> Self {
        Self {
            dir:     PathBuf::from("archives"),
            bundles: default_archives(),
        }
    }
}

impl Config {
    /// The target registry described by this configuration.
    pub fn registry(&self) -> Registry {
        let defaults = Registry::default();
        Registry {
            targets:              if self.targets.is_empty() { defaults.targets } else { self.targets.clone() },
            descriptor_file_name: self.descriptor.file_name.clone(),
            descriptor_consumers: self.descriptor.consumers.clone(),
            archive_dir:          self.archives.dir.clone(),
            archives:             self.archives.bundles.clone(),
        }
    }
}

/// Discover the protoplex.toml config file.
///
/// Returns `None` if no config file is found.
pub fn discover_config(root: &Path) -> Option<PathBuf> {
    let config_path = root.join(CONFIG_FILE_NAME);
    if config_path.exists() {
        debug!("found config file at {}", config_path.display());
        Some(config_path)
    } else {
        debug!("no config file found at {}", config_path.display());
        None
    }
}

/// Load and parse a protoplex.toml config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .map_err(|e| PipelineError::Config(format!("read config file {}: {}", path.display(), e)))?;
    parse_config(&contents).map_err(|e| match e {
        PipelineError::Config(msg) => PipelineError::Config(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

/// Parse a config file from a string.
pub fn parse_config(contents: &str) -> Result<Config> {
    toml::from_str(contents).map_err(|e| PipelineError::Config(format!("invalid TOML: {}", e)))
}

/// Load config from the output root, or return the default if not found.
pub fn load_or_default(root: &Path) -> Result<Config> {
    match discover_config(root) {
        Some(path) => load_config(&path),
        None => Ok(Config::default()),
    }
}
