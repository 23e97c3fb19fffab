//! cloudburst — cloud-burst execution engine for batch schedulers.
//!
//! One binary, five entry points:
//!
//! ```text
//! cloudburst resume <node-list> [--execution-plan plan.json]
//! cloudburst suspend <node-list>
//! cloudburst state-manager
//! cloudburst validate config <path> | execution-plan <path> | integration
//! cloudburst export-performance --job-id <id> [--format json]
//! ```
//!
//! `resume` and `suspend` are wired as the scheduler's power-save
//! resume/suspend programs; `state-manager` runs from cron; `validate`
//! and `export-performance` are operator tools.

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use burst_config::LoggingConfig;

#[derive(Parser)]
#[command(
    name = "cloudburst",
    about = "Cloud-burst execution engine for batch schedulers",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Configuration file path.
    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/slurm/cloudburst.yaml"
    )]
    config: PathBuf,

    /// Show what would be done without executing.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Provision cloud instances for a set of scheduler nodes.
    Resume {
        /// Compact hostlist, e.g. `cloud-cpu-[001-004]`.
        node_list: String,

        /// Path to an externally produced execution plan (authoritative
        /// when present).
        #[arg(long)]
        execution_plan: Option<PathBuf>,
    },

    /// Terminate the cloud instances bound to a set of nodes.
    Suspend {
        /// Compact hostlist, e.g. `cloud-cpu-[001-004]`.
        node_list: String,
    },

    /// Run one state-reconciliation sweep over all cloud nodes.
    StateManager,

    /// Validate configuration files and execution plans.
    Validate {
        #[command(subcommand)]
        target: commands::validate::ValidateTarget,
    },

    /// Export performance data for a completed job.
    ExportPerformance {
        /// Scheduler job id to export.
        #[arg(long)]
        job_id: String,

        /// Directory to write the export into.
        #[arg(long, default_value = "/var/spool/cloudburst/learning")]
        output_dir: PathBuf,

        /// Output format: structured-feedback, structured-compact,
        /// reconciliation, or json.
        #[arg(long, default_value = "structured-feedback")]
        format: String,

        /// Strip user and project identity for institutional sharing.
        #[arg(long)]
        anonymize: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Resume {
            node_list,
            execution_plan,
        } => {
            let config = load_config(&cli.config)?;
            init_tracing(&config.logging);
            commands::resume::run(config, &node_list, execution_plan.as_deref(), cli.dry_run)
                .await
        }
        Command::Suspend { node_list } => {
            let config = load_config(&cli.config)?;
            init_tracing(&config.logging);
            commands::suspend::run(config, &node_list, cli.dry_run).await
        }
        Command::StateManager => {
            let config = load_config(&cli.config)?;
            init_tracing(&config.logging);
            commands::state_manager::run(config, cli.dry_run).await
        }
        Command::Validate { target } => {
            init_tracing(&LoggingConfig::default());
            commands::validate::run(target).await
        }
        Command::ExportPerformance {
            job_id,
            output_dir,
            format,
            anonymize,
        } => {
            let config = load_config(&cli.config)?;
            init_tracing(&config.logging);
            commands::export::run(config, &job_id, &output_dir, &format, anonymize).await
        }
    }
}

fn load_config(path: &PathBuf) -> anyhow::Result<burst_config::Config> {
    burst_config::Config::load(path)
        .map_err(|e| anyhow::anyhow!("failed to load config {}: {e}", path.display()))
}

/// Initialize the subscriber from the logging block. `RUST_LOG` wins
/// over the configured level when set.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let file_writer = (!logging.file.is_empty())
        .then(|| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&logging.file)
                .ok()
        })
        .flatten();

    match (logging.format.as_str(), file_writer) {
        ("json", Some(file)) => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(Arc::new(file))
            .init(),
        ("json", None) => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        (_, Some(file)) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Arc::new(file))
            .init(),
        (_, None) => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}
