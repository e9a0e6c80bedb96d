//! Post-generation import rewriting.
//!
//! `protoc`-style Python output imports its siblings as top-level modules
//! (`import api_pb2 as api__pb2`) and vendored namespaces absolutely
//! (`from google.api import http_pb2 as ...`). Neither resolves once the
//! output lives inside a package, so each line is run through an ordered list
//! of declarative rules scoped to the targets whose layout needs them.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::{
    config::RewriteConfig,
    error::{PipelineError, Result, Stage},
    generate::GeneratedFile,
    registry::{GenerationMode, Layout, Registry},
};

lazy_static! {
    static ref SIBLING_MODULE:  Regex = Regex::new(r"^import (\w+_pb2) as (\w+)$").unwrap();
    static ref RELATIVE_IMPORT: Regex = Regex::new(r"^from \.+ import \w+_pb2 as \w+$").unwrap();
    static ref MODULE_IMPORT:   Regex = Regex::new(r"^from (\.+|[A-Za-z_]\w*(\.[A-Za-z_]\w*)*) import \w+_pb2 as \w+$").unwrap();
    static ref ABSOLUTE_FROM:   Regex = Regex::new(r"^from [A-Za-z_]\w*(\.[A-Za-z_]\w*)* import \S.*$").unwrap();
    static ref RELATIVE_FROM:   Regex = Regex::new(r"^from \.+[A-Za-z_]\w*(\.[A-Za-z_]\w*)* import \S.*$").unwrap();
    static ref NAMESPACE:       Regex = Regex::new(r"^[A-Za-z_]\w*(\.[A-Za-z_]\w*)*$").unwrap();
}

/// One `(match, replace, scope)` record.
#[derive(Debug, Clone)]
pub struct RewriteRule {
    pub name:        String,
    pub pattern:     Regex,
    /// Regex replacement. `{relative}` (the file's root-relative dot prefix)
    /// and `{vendor_root}` are expanded per file before substitution.
    pub replacement: String,
    /// Used instead of `replacement` when the module captured as `${1}` was
    /// not generated into the file's own target.
    pub fallback:    Option<String>,
    pub targets:     Vec<String>,
    pub file_suffix: String,
    /// Every rewritten line must match this.
    pub well_formed: Regex,
}

impl RewriteRule {
    pub fn applies_to(&self, file: &GeneratedFile) -> bool {
        self.targets.iter().any(|t| *t == file.target) && file.path.to_string_lossy().ends_with(&self.file_suffix)
    }

    fn apply(&self, line: &str, relative: &str, vendor_root: &str, generated: &HashSet<String>) -> Option<String> {
        let captures = self.pattern.captures(line)?;
        let template = match (&self.fallback, captures.get(1)) {
            (Some(fallback), Some(module)) if !generated.contains(module.as_str()) => fallback,
            _ => &self.replacement,
        };
        let template = template.replace("{relative}", relative).replace("{vendor_root}", vendor_root);

        // Patterns are anchored, so the expansion is the whole line.
        let mut out = String::new();
        captures.expand(&template, &mut out);
        Some(out)
    }
}

/// Dotted module path of a generated Python file relative to its target
/// root: `google/api/http_pb2.py` → `google.api.http_pb2`.
pub fn module_name(path: &Path) -> Option<String> {
    let stem = path.to_str()?.strip_suffix(".py")?;
    Some(stem.replace(['/', '\\'], "."))
}

/// What the rewriter did to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// Some lines changed; the file was written back.
    Rewritten { lines: usize },
    /// No rule applied, or nothing matched.
    Unchanged,
    /// No generator header; left untouched.
    Skipped,
}

/// A generated file after rewriting. Produced once and never mutated again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenFile {
    pub target:  String,
    pub root:    PathBuf,
    pub path:    PathBuf,
    pub content: String,
    pub outcome: RewriteOutcome,
}

/// Output of the rewrite stage.
#[derive(Debug)]
pub struct Rewritten {
    pub files: Vec<RewrittenFile>,
}

impl Rewritten {
    pub fn rewritten(&self) -> usize {
        self.files.iter().filter(|f| matches!(f.outcome, RewriteOutcome::Rewritten { .. })).count()
    }

    pub fn skipped(&self) -> usize {
        self.files.iter().filter(|f| f.outcome == RewriteOutcome::Skipped).count()
    }

    pub fn for_target<'a>(&'a self, target: &'a str) -> impl Iterator<Item = &'a RewrittenFile> + 'a {
        self.files.iter().filter(move |f| f.target == target)
    }
}

/// Ordered rules plus what is needed to expand them per file.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub rules:         Vec<RewriteRule>,
    pub header_marker: String,
    pub header_lines:  usize,
    vendor_roots:      HashMap<String, String>,
}

/// `.` at the target root, one more dot per directory level.
pub fn relative_prefix(path: &Path) -> String {
    let depth = path.parent().map_or(0, |parent| parent.components().count());
    ".".repeat(depth + 1)
}

impl RuleSet {
    /// Rules for every Python target of `registry`: sibling imports become
    /// relative, vendored namespaces move under the package's vendor root (or
    /// become root-relative for a library root). Flat targets get no rules.
    pub fn for_registry(registry: &Registry, config: &RewriteConfig) -> Result<RuleSet> {
        let mut packages = Vec::new();
        let mut internal_packages = Vec::new();
        let mut libraries = Vec::new();
        let mut vendor_roots = HashMap::new();
        for target in &registry.targets {
            match &target.layout {
                Layout::Package { vendor_root } => {
                    packages.push(target.name.clone());
                    if target.mode == GenerationMode::InternalOnly {
                        internal_packages.push(target.name.clone());
                    }
                    vendor_roots.insert(target.name.clone(), vendor_root.clone());
                }
                Layout::LibraryRoot => libraries.push(target.name.clone()),
                Layout::Flat => {}
            }
        }

        let mut rules = Vec::new();
        let siblings: Vec<String> = packages
            .iter()
            .chain(&libraries)
            .filter(|t| !internal_packages.contains(t))
            .cloned()
            .collect();
        if !siblings.is_empty() {
            rules.push(RewriteRule {
                name:        "sibling-module".to_string(),
                pattern:     SIBLING_MODULE.clone(),
                replacement: "from {relative} import ${1} as ${2}".to_string(),
                fallback:    None,
                targets:     siblings,
                file_suffix: ".py".to_string(),
                well_formed: RELATIVE_IMPORT.clone(),
            });
        }

        // Internal schemas may import root schemas, whose modules live in the
        // vendor root package rather than next to the importing file.
        if !internal_packages.is_empty() {
            rules.push(RewriteRule {
                name:        "internal-module".to_string(),
                pattern:     SIBLING_MODULE.clone(),
                replacement: "from {relative} import ${1} as ${2}".to_string(),
                fallback:    Some("from {vendor_root} import ${1} as ${2}".to_string()),
                targets:     internal_packages,
                file_suffix: ".py".to_string(),
                well_formed: MODULE_IMPORT.clone(),
            });
        }

        for namespace in &config.vendored_namespaces {
            if !NAMESPACE.is_match(namespace) {
                return Err(PipelineError::Config(format!("invalid vendored namespace {:?}", namespace)));
            }
            let pattern = Regex::new(&format!(r"^from ({}(?:\.\w+)*) import (.+)$", regex::escape(namespace)))
                .map_err(|e| PipelineError::Config(e.to_string()))?;

            if !packages.is_empty() {
                rules.push(RewriteRule {
                    name:        format!("vendored-namespace({})", namespace),
                    pattern:     pattern.clone(),
                    replacement: "from {vendor_root}.${1} import ${2}".to_string(),
                    fallback:    None,
                    targets:     packages.clone(),
                    file_suffix: ".py".to_string(),
                    well_formed: ABSOLUTE_FROM.clone(),
                });
            }
            if !libraries.is_empty() {
                rules.push(RewriteRule {
                    name:        format!("vendored-namespace-root({})", namespace),
                    pattern,
                    replacement: "from {relative}${1} import ${2}".to_string(),
                    fallback:    None,
                    targets:     libraries.clone(),
                    file_suffix: ".py".to_string(),
                    well_formed: RELATIVE_FROM.clone(),
                });
            }
        }

        Ok(RuleSet {
            rules,
            header_marker: config.header_marker.clone(),
            header_lines: config.header_lines,
            vendor_roots,
        })
    }

    fn has_header(&self, content: &str) -> bool {
        content
            .lines()
            .take(self.header_lines)
            .any(|line| line.contains(&self.header_marker))
    }

    /// Rewrites one file's text without touching the filesystem. `generated`
    /// holds the module names (see [`module_name`]) written into the file's
    /// target.
    pub fn rewrite_file(&self, file: &GeneratedFile, generated: &HashSet<String>) -> Result<(String, RewriteOutcome)> {
        let rules: Vec<&RewriteRule> = self.rules.iter().filter(|r| r.applies_to(file)).collect();
        if rules.is_empty() {
            return Ok((file.content.clone(), RewriteOutcome::Unchanged));
        }
        if !self.has_header(&file.content) {
            return Ok((file.content.clone(), RewriteOutcome::Skipped));
        }

        let relative = relative_prefix(&file.path);
        let vendor_root = self.vendor_roots.get(&file.target).map_or("", String::as_str);

        let mut changed = 0;
        let mut lines = Vec::new();
        for (index, line) in file.content.split('\n').enumerate() {
            let mut current = line.to_string();
            for rule in &rules {
                if let Some(next) = rule.apply(&current, &relative, vendor_root, generated) {
                    if !rule.well_formed.is_match(&next) {
                        return Err(PipelineError::RewriteMismatch {
                            path: file.full_path(),
                            rule: rule.name.clone(),
                            line: index + 1,
                            text: next,
                        });
                    }
                    current = next;
                }
            }
            if current != line {
                changed += 1;
            }
            lines.push(current);
        }

        if changed == 0 {
            Ok((file.content.clone(), RewriteOutcome::Unchanged))
        } else {
            Ok((lines.join("\n"), RewriteOutcome::Rewritten { lines: changed }))
        }
    }
}

/// Rewrites every generated file, writing changed ones back in place.
pub fn rewrite(files: Vec<GeneratedFile>, rules: &RuleSet) -> Result<Rewritten> {
    let mut generated: HashMap<String, HashSet<String>> = HashMap::new();
    for file in &files {
        if let Some(module) = module_name(&file.path) {
            generated.entry(file.target.clone()).or_default().insert(module);
        }
    }

    let none = HashSet::new();
    let mut rewritten = Vec::with_capacity(files.len());
    for file in files {
        let (content, outcome) = rules.rewrite_file(&file, generated.get(&file.target).unwrap_or(&none))?;
        match outcome {
            RewriteOutcome::Rewritten { lines } => {
                let path = file.full_path();
                fs::write(&path, &content).map_err(PipelineError::io(Stage::Rewrite, &path))?;
                debug!("rewrote {} lines in {}", lines, path.display());
            }
            RewriteOutcome::Skipped => {
                warn!(
                    "skipping {}: no {:?} header in the first {} lines",
                    file.full_path().display(),
                    rules.header_marker,
                    rules.header_lines
                );
            }
            RewriteOutcome::Unchanged => {}
        }

        rewritten.push(RewrittenFile {
            target: file.target,
            root: file.root,
            path: file.path,
            content,
            outcome,
        });
    }

    let result = Rewritten { files: rewritten };
    info!(
        "rewrote {} of {} generated files ({} skipped)",
        result.rewritten(),
        result.files.len(),
        result.skipped()
    );
    Ok(result)
}
