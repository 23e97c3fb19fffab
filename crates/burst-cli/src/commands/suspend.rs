//! The suspend entry point: terminate the instances bound to a set of
//! nodes. Idempotent — nodes with no live instances are a no-op.

use std::time::Duration;

use anyhow::Context;
use tracing::{error, info};

use burst_cloud::FleetProvisioner;
use burst_config::Config;
use burst_slurm::SlurmClient;

/// Overall deadline for one suspend invocation.
const SUSPEND_TIMEOUT: Duration = Duration::from_secs(300);

pub async fn run(config: Config, node_list: &str, dry_run: bool) -> anyhow::Result<()> {
    tokio::time::timeout(SUSPEND_TIMEOUT, suspend_nodes(config, node_list, dry_run))
        .await
        .context("suspend timed out")?
}

async fn suspend_nodes(config: Config, node_list: &str, dry_run: bool) -> anyhow::Result<()> {
    let slurm = SlurmClient::new(&config.scheduler);
    let nodes = slurm.expand_hostlist(node_list).await?;

    info!(
        node_list = %node_list,
        count = nodes.len(),
        dry_run,
        "suspend request"
    );

    if dry_run {
        info!(nodes = ?nodes, "dry run: would terminate instances for nodes");
        return Ok(());
    }

    let provider = burst_cloud::provider_from_name(&config.cloud.provider)?;
    let provisioner = FleetProvisioner::new(provider);

    // Work group by group; one group's failure never blocks the rest.
    for (partition, groups) in burst_slurm::group_node_names(&nodes) {
        for (node_group, group_nodes) in groups {
            match provisioner.terminate(&group_nodes).await {
                Ok(()) => info!(
                    partition = %partition,
                    node_group = %node_group,
                    nodes = group_nodes.len(),
                    "node group suspended"
                ),
                Err(e) => error!(
                    partition = %partition,
                    node_group = %node_group,
                    error = %e,
                    "failed to suspend node group"
                ),
            }
        }
    }

    Ok(())
}
