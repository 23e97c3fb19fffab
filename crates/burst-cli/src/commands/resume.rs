//! The resume entry point: expand the node list, decide what to launch,
//! provision (atomically where required), and push bindings back to the
//! scheduler.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};

use burst_advisor::client::AdvisorClient;
use burst_analyzer::{AnalyzerThresholds, JobAnalyzer};
use burst_cloud::{FleetProvisioner, FleetRequest, GangCoordinator, SpotManager};
use burst_config::Config;
use burst_model::{ExecutionPlan, FabricDemand, InstanceRequirements, Job};
use burst_slurm::SlurmClient;

/// Overall deadline for one resume invocation.
const RESUME_TIMEOUT: Duration = Duration::from_secs(600);

pub async fn run(
    config: Config,
    node_list: &str,
    plan_path: Option<&Path>,
    dry_run: bool,
) -> anyhow::Result<()> {
    tokio::time::timeout(
        RESUME_TIMEOUT,
        resume_nodes(config, node_list, plan_path, dry_run),
    )
    .await
    .context("resume timed out")?
}

async fn resume_nodes(
    config: Config,
    node_list: &str,
    plan_path: Option<&Path>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let slurm = SlurmClient::new(&config.scheduler);
    let nodes = slurm.expand_hostlist(node_list).await?;
    if nodes.is_empty() {
        anyhow::bail!("node list '{node_list}' expanded to nothing");
    }

    let (partition, node_group) = nodes
        .iter()
        .find_map(|n| burst_slurm::parse_node_name(n))
        .map(|(p, g, _)| (p, g))
        .with_context(|| format!("no node in '{node_list}' matches partition-nodegroup-id"))?;

    // Execution mode: a supplied plan is authoritative; otherwise the
    // analyzer classifies the job and a plan is synthesized from the
    // matched node-group configuration.
    let (plan, requirements) = match plan_path {
        Some(path) => {
            let plan = burst_advisor::read_plan(path)
                .with_context(|| format!("failed to load execution plan {}", path.display()))?;
            if !plan.should_provision {
                info!("execution plan declines provisioning; nothing to do");
                return Ok(());
            }
            burst_advisor::validate_plan(&plan)?;
            info!(plan = %path.display(), "using supplied execution plan");
            let requirements = InstanceRequirements::from_plan(&plan);
            (plan, requirements)
        }
        None => {
            let plan = burst_advisor::standalone_plan(&config, &partition, &node_group)?;
            let requirements =
                analyze_standalone(&config, &slurm, &nodes, &plan, &partition).await?;
            (plan, requirements)
        }
    };

    let spot_strategy = burst_cloud::spot::strategy_for(&requirements);
    info!(
        nodes = nodes.len(),
        partition = %partition,
        node_group = %node_group,
        shapes = ?plan.instances.instance_types,
        gang = requirements.requires_gang(),
        spot_ratio = spot_strategy.spot_ratio,
        dry_run,
        "resume request"
    );

    if dry_run {
        return print_dry_run(&plan, &requirements, &nodes);
    }

    let provider = burst_cloud::provider_from_name(&config.cloud.provider)?;
    let spot = SpotManager::new(provider.clone());
    spot.validate_pricing(&requirements, &spot_strategy).await?;

    let request = FleetRequest {
        node_names: nodes.clone(),
        partition,
        node_group,
        job_id: plan.metadata.job_id.clone(),
        requirements: requirements.clone(),
        launch_template: plan.instances.launch_template.clone(),
        subnet_ids: plan.instances.subnet_ids.clone(),
        security_group_ids: plan.instances.security_group_ids.clone(),
        tags: plan.metadata.tags.clone(),
    };

    let provisioner = FleetProvisioner::new(provider.clone());
    let coordinator = GangCoordinator::new(provider.clone(), provisioner);
    let response = coordinator.provision(&request).await?;

    // Observe spot reclaims for the remainder of this invocation.
    let (monitor_shutdown, monitor_events) = if requirements.prefer_spot {
        let (tx, rx) = watch::channel(false);
        let events = spot.monitor_interruptions(
            response.bindings.clone(),
            Duration::from_secs(config.pricing.interruption_poll_secs),
            rx,
        );
        (Some(tx), Some(events))
    } else {
        (None, None)
    };

    let failures = slurm.push_bindings(&response.bindings).await;
    if !failures.is_empty() {
        // Instances are up; per-node scheduler failures do not fail the
        // provisioning call.
        error!(
            failed = failures.len(),
            total = response.bindings.len(),
            "some node updates failed"
        );
    }

    if let Some(shutdown) = monitor_shutdown {
        let _ = shutdown.send(true);
        if let Some(mut events) = monitor_events {
            while let Some(event) = events.recv().await {
                warn!(
                    instance = %event.instance_id,
                    node = %event.node_name,
                    "spot interruption observed during resume"
                );
            }
        }
    }

    let estimated_cost = plan.cost_estimate(nodes.len(), plan.cost.max_duration_hours);
    info!(
        fleet_id = %response.fleet_id,
        launched = response.bindings.len(),
        failed_slots = response.failed.len(),
        update_failures = failures.len(),
        estimated_cost,
        "provisioning completed"
    );
    Ok(())
}

/// Standalone-mode requirements: classify the scheduler's job for these
/// nodes (or a default when none is found), then fold in the node-group
/// pricing and an advisor consult when one is reachable.
async fn analyze_standalone(
    config: &Config,
    slurm: &SlurmClient,
    nodes: &[String],
    plan: &ExecutionPlan,
    partition: &str,
) -> anyhow::Result<InstanceRequirements> {
    let mut job = if slurm.available().await {
        match slurm.job_for_nodes(nodes).await {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "no job found for nodes; using defaults");
                Job::default_for_nodes(nodes)
            }
        }
    } else {
        warn!("scheduler tools unavailable; using a default job");
        Job::default_for_nodes(nodes)
    };
    if job.partition.is_empty() {
        job.partition = partition.to_string();
    }

    let analyzer = JobAnalyzer::new(thresholds_from(config));
    let mut requirements = analyzer.analyze(&mut job)?;

    // The node group's purchasing option seeds the pricing preference.
    if plan.cost.prefer_spot {
        requirements.prefer_spot = true;
    }
    requirements.max_spot_price = requirements.max_spot_price.max(plan.instances.max_spot_price);

    if config.advisor.enabled != "false" {
        let advisor = AdvisorClient::from_config(&config.advisor);
        if advisor.available().await {
            advisor.enrich(&job, &mut requirements).await;
        } else if config.advisor.enabled == "true" {
            warn!(command = %config.advisor.command, "advisor enabled but not reachable");
        }
    }

    Ok(requirements)
}

fn thresholds_from(config: &Config) -> AnalyzerThresholds {
    let fabric_default = match config.pricing.fabric_default.as_str() {
        "required" => FabricDemand::Required,
        "optional" => FabricDemand::Optional,
        "disabled" => FabricDemand::Disabled,
        _ => FabricDemand::Preferred,
    };
    AnalyzerThresholds {
        fabric_default,
        hpc_family_threshold: config.pricing.hpc_family_threshold,
        placement_group_threshold: config.pricing.placement_group_threshold,
        enhanced_networking: config.pricing.enable_enhanced_networking,
    }
}

/// Show the plan the engine would execute, without touching the cloud.
fn print_dry_run(
    plan: &ExecutionPlan,
    requirements: &InstanceRequirements,
    nodes: &[String],
) -> anyhow::Result<()> {
    info!("dry run: would execute the following plan");
    info!(shapes = ?plan.instances.instance_types, "  instance shapes");
    info!(pricing = ?plan.instances.pricing_mode, "  pricing mode");
    info!(ceiling = plan.instances.max_spot_price, "  spot price ceiling");
    info!(subnets = ?plan.instances.subnet_ids, "  target subnets");
    info!(nodes = ?nodes, "  node list");
    info!(
        placement = requirements
            .placement_strategy
            .map(|s| s.as_str())
            .unwrap_or("none"),
        "  placement strategy"
    );
    info!(gang = requirements.requires_gang(), "  gang scheduling");
    if requirements.tightly_coupled {
        info!(
            processes = requirements.process_count,
            fabric = ?requirements.fabric,
            "  parallel workload"
        );
    }

    let estimated = plan.cost_estimate(nodes.len(), plan.cost.max_duration_hours);
    info!(
        max_total = plan.cost.max_total_cost,
        max_hourly = plan.cost.max_cost_per_hour,
        estimated_total = estimated,
        "  cost"
    );
    Ok(())
}
