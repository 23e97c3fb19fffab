//! The validate entry point: check configuration files, execution
//! plans, and the local integration environment before deployment.

use std::path::PathBuf;

use clap::Subcommand;
use tracing::{info, warn};

use burst_config::Config;

#[derive(Subcommand)]
pub enum ValidateTarget {
    /// Validate a configuration file.
    Config { path: PathBuf },

    /// Validate an execution plan JSON file.
    ExecutionPlan { path: PathBuf },

    /// Check the pieces this host needs for a real deployment.
    Integration,
}

pub async fn run(target: ValidateTarget) -> anyhow::Result<()> {
    match target {
        ValidateTarget::Config { path } => validate_config(&path),
        ValidateTarget::ExecutionPlan { path } => validate_plan_file(&path),
        ValidateTarget::Integration => validate_integration().await,
    }
}

fn validate_config(path: &PathBuf) -> anyhow::Result<()> {
    info!(file = %path.display(), "validating configuration file");
    let config = Config::load(path)?;

    let node_groups: usize = config
        .scheduler
        .partitions
        .iter()
        .map(|p| p.node_groups.len())
        .sum();
    info!(
        file = %path.display(),
        region = %config.cloud.region,
        partitions = config.scheduler.partitions.len(),
        node_groups,
        "configuration file is valid"
    );
    Ok(())
}

fn validate_plan_file(path: &PathBuf) -> anyhow::Result<()> {
    info!(file = %path.display(), "validating execution plan");
    let plan = burst_advisor::load_plan(path)?;

    info!(
        file = %path.display(),
        should_provision = plan.should_provision,
        shapes = ?plan.instances.instance_types,
        tight = plan.parallel.is_tight,
        "execution plan is valid"
    );
    Ok(())
}

/// Self-checks plus availability probes for the external tools the
/// engine shells out to. Probes report but do not fail validation: a
/// build host legitimately has neither scheduler nor advisor.
async fn validate_integration() -> anyhow::Result<()> {
    info!("running integration validation");

    // Node naming must round-trip through the grouping parser.
    let samples = vec![
        "cloud-cpu-001".to_string(),
        "cloud-gpu-004".to_string(),
        "cloud-hpc-016".to_string(),
    ];
    let grouped = burst_slurm::group_node_names(&samples);
    anyhow::ensure!(
        grouped.get("cloud").map(|g| g.len()) == Some(3),
        "node-name grouping failed for sample names"
    );

    // The shape catalog must be coherent.
    anyhow::ensure!(
        burst_model::catalog::fabric_support("hpc7a").is_some(),
        "instance catalog is missing its HPC families"
    );

    // The reference price table must stay ordered by size.
    anyhow::ensure!(
        burst_cloud::spot::reference_price("c5.large")
            < burst_cloud::spot::reference_price("c5.xlarge"),
        "reference price table ordering is broken"
    );

    let scheduler = burst_slurm::SlurmClient::new(&burst_config::SchedulerConfig::default());
    if scheduler.available().await {
        info!("scheduler tools are reachable");
    } else {
        warn!("scheduler tools are not reachable from this host");
    }

    let advisor = burst_advisor::client::AdvisorClient::from_config(
        &burst_config::AdvisorConfig::default(),
    );
    if advisor.available().await {
        info!("advisor command is reachable");
    } else {
        warn!("advisor command is not reachable from this host");
    }

    info!("integration validation passed");
    Ok(())
}
