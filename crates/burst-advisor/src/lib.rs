//! Execution-plan loading and validation, plus the advisor client.
//!
//! An externally produced plan is authoritative when supplied: the engine
//! validates it and executes it verbatim. Without one, standalone mode
//! synthesises a plan from the static configuration of the matched
//! (partition, node group).

pub mod client;

use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

use burst_config::Config;
use burst_model::{
    ExecutionPlan, InstanceSpec, LaunchTemplateRef, NetworkConfig, ParallelConfig, PlanMetadata,
    PricingMode,
};

/// Advisor and plan errors.
#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("failed to read execution plan: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse execution plan: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid execution plan: {0}")]
    InvalidPlan(String),

    #[error("advisor command failed: {0}")]
    CommandFailed(String),

    #[error("no configuration found for partition '{partition}' node group '{node_group}'")]
    MissingNodeGroup {
        partition: String,
        node_group: String,
    },
}

pub type AdvisorResult<T> = Result<T, AdvisorError>;

/// Read a plan from disk without validating it. Callers that honor the
/// plan's own "do not provision" verdict check `should_provision` before
/// running [`validate_plan`].
pub fn read_plan(path: impl AsRef<Path>) -> AdvisorResult<ExecutionPlan> {
    let data = std::fs::read(path.as_ref())?;
    Ok(serde_json::from_slice(&data)?)
}

/// Load a plan from disk and validate it.
pub fn load_plan(path: impl AsRef<Path>) -> AdvisorResult<ExecutionPlan> {
    let data = std::fs::read(path.as_ref())?;
    let plan = parse_plan(&data)?;
    debug!(
        path = %path.as_ref().display(),
        should_provision = plan.should_provision,
        shapes = plan.instances.instance_types.len(),
        "loaded execution plan"
    );
    Ok(plan)
}

/// Parse a plan from raw JSON bytes and validate it.
pub fn parse_plan(data: &[u8]) -> AdvisorResult<ExecutionPlan> {
    let plan: ExecutionPlan = serde_json::from_slice(data)?;
    validate_plan(&plan)?;
    Ok(plan)
}

/// Validate an execution plan. Every rule must hold.
pub fn validate_plan(plan: &ExecutionPlan) -> AdvisorResult<()> {
    if !plan.should_provision {
        return Err(AdvisorError::InvalidPlan(
            "plan indicates provisioning should not occur".to_string(),
        ));
    }
    if plan.instances.instance_types.is_empty() {
        return Err(AdvisorError::InvalidPlan(
            "no instance shapes specified".to_string(),
        ));
    }
    if plan.instances.subnet_ids.is_empty() {
        return Err(AdvisorError::InvalidPlan(
            "no target subnets specified".to_string(),
        ));
    }
    if plan.parallel.is_tight && plan.network.placement_strategy.is_none() {
        return Err(AdvisorError::InvalidPlan(
            "tightly coupled jobs require a placement strategy".to_string(),
        ));
    }
    if plan.parallel.requires_gang && plan.network.placement_strategy.is_none() {
        return Err(AdvisorError::InvalidPlan(
            "gang scheduling requires a placement strategy".to_string(),
        ));
    }
    if plan.parallel.fabric_required && !plan.network.enhanced_networking {
        return Err(AdvisorError::InvalidPlan(
            "the fabric requires enhanced networking to be enabled".to_string(),
        ));
    }
    if plan.cost.max_total_cost > 0.0 && plan.cost.max_cost_per_hour > 0.0 {
        let duration = if plan.cost.max_duration_hours > 0.0 {
            plan.cost.max_duration_hours
        } else {
            1.0
        };
        if plan.cost.max_cost_per_hour * duration > plan.cost.max_total_cost {
            return Err(AdvisorError::InvalidPlan(
                "cost constraints inconsistent".to_string(),
            ));
        }
    }
    Ok(())
}

/// Synthesize a plan from static configuration for `(partition, node group)`.
///
/// The standalone plan launches the configured shape overrides in the
/// configured subnets, assumes an independent workload, and caps the run
/// at 24 hours for cost estimation.
pub fn standalone_plan(
    config: &Config,
    partition: &str,
    node_group: &str,
) -> AdvisorResult<ExecutionPlan> {
    let group =
        config
            .find_node_group(partition, node_group)
            .ok_or_else(|| AdvisorError::MissingNodeGroup {
                partition: partition.to_string(),
                node_group: node_group.to_string(),
            })?;

    let instance_types: Vec<String> = group
        .instance_type_overrides
        .iter()
        .map(|o| o.instance_type.clone())
        .collect();
    let prefer_spot = group.purchasing_option == "spot";

    let plan = ExecutionPlan {
        should_provision: true,
        instances: InstanceSpec {
            instance_types,
            pricing_mode: if prefer_spot {
                PricingMode::Spot
            } else {
                PricingMode::OnDemand
            },
            max_spot_price: 0.0,
            subnet_ids: group.subnet_ids.clone(),
            launch_template: LaunchTemplateRef {
                name: (!group.launch_template.name.is_empty())
                    .then(|| group.launch_template.name.clone()),
                id: (!group.launch_template.id.is_empty())
                    .then(|| group.launch_template.id.clone()),
                version: group.launch_template.version.clone(),
            },
            security_group_ids: group.security_group_ids.clone(),
            instance_profile: group.instance_profile.clone(),
            user_data: None,
        },
        parallel: ParallelConfig::default(),
        cost: burst_model::CostConstraints {
            prefer_spot,
            max_duration_hours: 24.0,
            ..burst_model::CostConstraints::default()
        },
        network: NetworkConfig {
            enhanced_networking: config.pricing.enable_enhanced_networking,
            ..NetworkConfig::default()
        },
        metadata: PlanMetadata {
            job_id: "standalone".to_string(),
            priority: "normal".to_string(),
            decision_factors: vec!["static_configuration".to_string()],
            tags: group.tags.clone(),
            ..PlanMetadata::default()
        },
    };

    info!(
        partition = %partition,
        node_group = %node_group,
        shapes = plan.instances.instance_types.len(),
        purchasing = %group.purchasing_option,
        "synthesized standalone execution plan"
    );
    Ok(plan)
}
