//! Retrace CLI
//!
//! Two subcommands mirror the two phases:
//!
//! ```bash
//! # Extract a model by tracing a client against the subject library
//! retrace trace --library mylib --client clients/ --out model.json
//!
//! # Check a new library version against a previously extracted model
//! retrace check --model model.json --out report.json
//! ```
//!
//! Client failures during tracing and incompatibilities during checking are
//! logged, not fatal: the exit status is nonzero only for invalid arguments,
//! unreadable models, or a missing subject library.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use retrace::storage::{self, CheckReport, ModelFile};
use retrace::{ClientRunner, Config, ExecutionMode, HostBridge, Replayer, TraceSession};

#[derive(Parser)]
#[command(name = "retrace", version, about = "Model-based detection of breaking API changes")]
struct Cli {
    /// Configuration file (defaults to retrace.toml in the working directory)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Trace a client against the subject library and persist the model
    Trace {
        /// Name of the subject library module
        #[arg(long)]
        library: String,

        /// Client script file, or a directory of client scripts
        #[arg(long)]
        client: PathBuf,

        /// Where to write the model (default: model.json)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Keep every observed call subtree (no structural compression)
        #[arg(long)]
        no_compress: bool,

        /// Bind synchronous test-framework shims (describe/it) for the client
        #[arg(long)]
        test_mode: bool,
    },

    /// Replay a model against the current library version
    Check {
        /// Path to a previously extracted model
        #[arg(long)]
        model: PathBuf,

        /// Load this module instead of the one recorded in the model
        #[arg(long)]
        library: Option<String>,

        /// Where to write a JSON report of the breakages
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;
    init_logging(&config);

    match cli.command {
        Command::Trace { library, client, out, no_compress, test_mode } => {
            run_trace(&config, &library, &client, out.as_deref(), no_compress, test_mode)
        }
        Command::Check { model, library, out } => {
            run_check(&config, &model, library.as_deref(), out.as_deref())
        }
    }
}

fn run_trace(
    config: &Config,
    library: &str,
    client: &Path,
    out: Option<&Path>,
    no_compress: bool,
    test_mode: bool,
) -> Result<()> {
    let bridge = HostBridge::new(library, config.modules.clone(), Some(TraceSession::new()));

    // Fail fast when the subject library cannot be resolved at all.
    let client_dir = if client.is_dir() { client } else { client.parent().unwrap_or(client) };
    bridge
        .resolve(library, client_dir)
        .with_context(|| format!("subject library '{library}' not found"))?;

    let mode = if test_mode { ExecutionMode::TestFramework } else { ExecutionMode::Plain };
    let executed = ClientRunner::new(bridge.clone(), mode)
        .run(client)
        .with_context(|| format!("cannot execute client at {}", client.display()))?;

    let mut tree = bridge.session().expect("trace bridge has a session").finish();
    let observed = tree.len();
    if no_compress || !config.trace.compress {
        info!(files = executed, paths = observed, "trace_complete");
    } else {
        tree.compress(config.trace.policy);
        info!(
            files = executed,
            paths = observed,
            retained = tree.len(),
            "trace_complete_compressed"
        );
    }

    let model = ModelFile::from_tree(&tree);
    let out = out.unwrap_or_else(|| Path::new("model.json"));
    storage::save_model(out, &model)
        .with_context(|| format!("cannot write model to {}", out.display()))?;
    info!(model = %out.display(), paths = model.paths.len(), rho = model.rho_relations.len(), "model_written");
    Ok(())
}

fn run_check(
    config: &Config,
    model_path: &Path,
    library: Option<&str>,
    out: Option<&Path>,
) -> Result<()> {
    let model = storage::load_model(model_path)
        .with_context(|| format!("cannot read model {}", model_path.display()))?;

    let recorded_library = model
        .paths
        .first()
        .and_then(|record| record.path.components().first())
        .and_then(|component| match component {
            retrace::PathComponent::Require { module_name } => Some(module_name.clone()),
            _ => None,
        })
        .context("model has no require root")?;
    let library_name = library.unwrap_or(recorded_library.as_str()).to_string();

    let root_dir = model_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    let bridge = HostBridge::new(&library_name, config.modules.clone(), None);
    let replayer =
        Replayer::new(&model, bridge, &root_dir, library.map(str::to_string))?;
    let breakages = replayer.run()?;

    if breakages.is_empty() {
        info!(model = %model_path.display(), library = %library_name, "check_clean");
    } else {
        warn!(
            model = %model_path.display(),
            library = %library_name,
            breakages = breakages.len(),
            "check_found_breakages"
        );
    }

    if let Some(out) = out {
        let report = CheckReport::new(&model_path.display().to_string(), &library_name, breakages);
        storage::save_report(out, &report)
            .with_context(|| format!("cannot write report to {}", out.display()))?;
        info!(report = %out.display(), "report_written");
    }
    Ok(())
}
