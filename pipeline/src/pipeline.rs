use std::fmt;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::{
    backend::{self, SchemaCompiler},
    config::Config,
    discovery::discover,
    distribute::distribute,
    error::Result,
    generate::generate,
    package::package,
    registry::Registry,
    rewrite::{rewrite, RuleSet},
};

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub compiler:          String,
    pub targets:           Vec<String>,
    pub sources:           usize,
    pub generated:         usize,
    pub rewritten:         usize,
    pub skipped:           usize,
    pub descriptor_digest: Option<String>,
    pub descriptor_copies: Vec<PathBuf>,
    pub archives:          Vec<PathBuf>,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "compiler:    {}", self.compiler)?;
        writeln!(f, "targets:     {}", self.targets.join(", "))?;
        writeln!(f, "sources:     {}", self.sources)?;
        writeln!(
            f,
            "files:       {} generated, {} rewritten, {} skipped",
            self.generated, self.rewritten, self.skipped
        )?;
        if let Some(digest) = &self.descriptor_digest {
            writeln!(f, "descriptor:  sha256 {} ({} copies)", digest, self.descriptor_copies.len())?;
        }
        for archive in &self.archives {
            writeln!(f, "archive:     {}", archive.display())?;
        }
        Ok(())
    }
}

/// The whole run: discover, generate, rewrite, distribute, package. Each
/// stage consumes the previous stage's output; the first error stops the run.
pub struct Pipeline {
    root:     PathBuf,
    config:   Config,
    compiler: Box<dyn SchemaCompiler>,
}

impl Pipeline {
    /// A pipeline writing under `root`, using the compiler backend chosen in
    /// `config`.
    pub fn new(root: impl Into<PathBuf>, config: Config) -> Result<Self> {
        let compiler = backend::from_config(&config.compiler)?;
        Ok(Self::with_compiler(root, config, compiler))
    }

    pub fn with_compiler(root: impl Into<PathBuf>, config: Config, compiler: Box<dyn SchemaCompiler>) -> Self {
        Pipeline {
            root: root.into(),
            config,
            compiler,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry(&self) -> Registry {
        self.config.registry()
    }

    pub fn run(&self) -> Result<RunReport> {
        let registry = self.registry();
        registry.validate()?;
        let rules = RuleSet::for_registry(&registry, &self.config.rewrite)?;

        let schema_root = self.root.join(&self.config.schema.root);
        info!("discovering schemas under {}", schema_root.display());
        let sources = discover(&schema_root, &self.config.schema.exclude)?;
        info!("found {} schema files", sources.files.len());

        info!("generating {} targets with the {} compiler", registry.targets.len(), self.compiler.name());
        let generation = generate(
            self.compiler.as_ref(),
            &sources,
            &registry,
            &self.root,
            &self.config.schema.internal_dir,
        )?;
        let generated = generation.files.len();

        info!("rewriting imports");
        let rewritten = rewrite(generation.files, &rules)?;

        info!("distributing descriptor");
        let distribution = distribute(generation.descriptor.as_ref(), &registry, &self.root)?;

        info!("packaging archives");
        let archives = package(&rewritten, &registry, &self.root)?;

        Ok(RunReport {
            compiler: self.compiler.name().to_string(),
            targets: registry.targets.iter().map(|t| t.name.clone()).collect(),
            sources: sources.files.len(),
            generated,
            rewritten: rewritten.rewritten(),
            skipped: rewritten.skipped(),
            descriptor_digest: distribution.digest,
            descriptor_copies: distribution.copies,
            archives: archives.into_iter().map(|a| a.path).collect(),
        })
    }
}
