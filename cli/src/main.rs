use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use protoplex::config::{self, Backend, Config};
use protoplex::{Pipeline, PipelineError};
use protoplex_compiler::decode_to_json;

#[derive(Parser)]
#[command(name = "protoplex", version)]
#[command(about = "Compile one tree of .proto schemas into bindings for every consumer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the whole pipeline: discover, generate, rewrite, distribute, package
    Run {
        /// Output root; target directories are relative to it
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// Schema root (overrides the config file)
        #[arg(short, long)]
        schema_root: Option<PathBuf>,

        /// Config file (defaults to <root>/protoplex.toml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Compiler backend (overrides the config file)
        #[arg(long, value_enum)]
        compiler: Option<CompilerArg>,
    },

    /// List the output targets and archives that a run would produce
    Targets {
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print a binary descriptor as JSON
    Inspect {
        /// Input descriptor file
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CompilerArg {
    Builtin,
    Protoc,
}

impl From<CompilerArg> for Backend {
    fn from(arg: CompilerArg) -> Self {
        match arg {
            CompilerArg::Builtin => Backend::Builtin,
            CompilerArg::Protoc => Backend::Protoc,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    match real_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<PipelineError>() {
                Some(pipeline) => error!("{} stage failed: {}", pipeline.stage(), e),
                None => error!("{:#}", e),
            }
            ExitCode::from(1)
        }
    }
}

fn real_main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            root,
            schema_root,
            config,
            compiler,
        } => {
            let mut config = load(&root, config)?;
            if let Some(schema_root) = schema_root {
                config.schema.root = schema_root;
            }
            if let Some(compiler) = compiler {
                config.compiler.backend = compiler.into();
            }

            debug!("running with {:?}", config.compiler.backend);
            let report = Pipeline::new(root, config)?.run()?;
            print!("{}", report);
            println!("protoplex: all stages completed");
            Ok(())
        }

        Commands::Targets { root, config } => {
            let registry = load(&root, config)?.registry();
            registry.validate()?;
            for target in &registry.targets {
                let kinds: Vec<String> = target.kinds.iter().map(|k| k.to_string()).collect();
                println!(
                    "{:<18} {:<44} {:<28} {:<14} {}",
                    target.name,
                    target.directory.display().to_string(),
                    kinds.join(","),
                    target.mode.to_string(),
                    target.layout
                );
            }
            for consumer in &registry.descriptor_consumers {
                println!("{:<18} {}", "descriptor", consumer.display());
            }
            for archive in &registry.archives {
                println!(
                    "{:<18} {} <- {}",
                    "archive",
                    registry.archive_dir.join(&archive.file_name).display(),
                    archive.target
                );
            }
            Ok(())
        }

        Commands::Inspect { input } => {
            let data = fs::read(&input).with_context(|| format!("read {}", input.display()))?;
            let json = decode_to_json(&data).with_context(|| format!("decode {}", input.display()))?;
            println!("{}", json);
            Ok(())
        }
    }
}

/// The explicit config file if one was given, else `<root>/protoplex.toml`
/// or the defaults.
fn load(root: &Path, explicit: Option<PathBuf>) -> Result<Config, PipelineError> {
    match explicit {
        Some(path) => config::load_config(&path),
        None => config::load_or_default(root),
    }
}
