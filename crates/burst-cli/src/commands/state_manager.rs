//! The state-manager entry point: one reconciliation sweep over every
//! configured cloud node. Scheduled externally (cron or a systemd timer).

use std::time::Duration;

use anyhow::Context;
use tracing::info;

use burst_config::Config;
use burst_slurm::{SlurmClient, StateReconciler};

/// Overall deadline for one sweep.
const SWEEP_TIMEOUT: Duration = Duration::from_secs(120);

pub async fn run(config: Config, dry_run: bool) -> anyhow::Result<()> {
    tokio::time::timeout(SWEEP_TIMEOUT, sweep(config, dry_run))
        .await
        .context("state sweep timed out")?
}

async fn sweep(config: Config, dry_run: bool) -> anyhow::Result<()> {
    info!(dry_run, "starting state management cycle");

    let client = SlurmClient::new(&config.scheduler);
    let reconciler = StateReconciler::new(client, dry_run);
    let report = reconciler.sweep(&config).await?;

    info!(
        examined = report.nodes_examined,
        applied = report.transitions_applied,
        failures = report.failures,
        "state management cycle completed"
    );
    Ok(())
}
