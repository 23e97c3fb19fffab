//! Execution plans — externally produced provisioning decisions.
//!
//! When an advisor supplies a plan it is authoritative: the engine executes
//! it instead of running its own analysis. The JSON schema round-trips
//! through these types without losing semantically significant fields.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::requirements::PlacementStrategy;

/// Pricing mode for a launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PricingMode {
    Spot,
    #[default]
    OnDemand,
    Mixed,
}

/// Launch template handle — by name or by id, with an optional version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LaunchTemplateRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default = "default_template_version")]
    pub version: String,
}

fn default_template_version() -> String {
    "$Latest".to_string()
}

/// Exactly which instances to launch and how to pay for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InstanceSpec {
    pub instance_types: Vec<String>,
    #[serde(default)]
    pub pricing_mode: PricingMode,
    #[serde(default)]
    pub max_spot_price: f64,
    pub subnet_ids: Vec<String>,
    #[serde(default)]
    pub launch_template: LaunchTemplateRef,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    #[serde(default)]
    pub instance_profile: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
}

/// Parallel-workload block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ParallelConfig {
    #[serde(default)]
    pub is_tight: bool,
    #[serde(default)]
    pub process_count: u32,
    #[serde(default)]
    pub requires_gang: bool,
    #[serde(default)]
    pub fabric_required: bool,
    #[serde(default)]
    pub fabric_generation: u32,
}

/// Cost and budget limits. Zero means "not set".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CostConstraints {
    #[serde(default)]
    pub max_total_cost: f64,
    #[serde(default)]
    pub max_cost_per_hour: f64,
    #[serde(default)]
    pub max_duration_hours: f64,
    #[serde(default)]
    pub auto_terminate_hours: f64,
    #[serde(default)]
    pub prefer_spot: bool,
    #[serde(default)]
    pub allow_mixed_pricing: bool,
}

/// Network block — placement and fabric-adjacent settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NetworkConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement_strategy: Option<PlacementStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement_group_name: Option<String>,
    #[serde(default)]
    pub enhanced_networking: bool,
    #[serde(default)]
    pub availability_zones: Vec<String>,
    #[serde(default)]
    pub single_az_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_class: Option<String>,
}

/// Execution context the advisor attaches to a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PlanMetadata {
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub decision_factors: Vec<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// A complete execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExecutionPlan {
    pub should_provision: bool,
    pub instances: InstanceSpec,
    #[serde(default)]
    pub parallel: ParallelConfig,
    #[serde(default)]
    pub cost: CostConstraints,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub metadata: PlanMetadata,
}

/// Hourly rate assumed when the plan carries no cost ceiling.
const FALLBACK_HOURLY_RATE: f64 = 0.10;

impl ExecutionPlan {
    /// Estimated total cost: hourly ceiling × node count × duration.
    pub fn cost_estimate(&self, node_count: usize, duration_hours: f64) -> f64 {
        if self.instances.instance_types.is_empty() {
            return 0.0;
        }
        let hourly = if self.cost.max_cost_per_hour > 0.0 {
            self.cost.max_cost_per_hour
        } else {
            FALLBACK_HOURLY_RATE
        };
        hourly * node_count as f64 * duration_hours
    }
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::valid_plan;
    use super::*;

    #[test]
    fn json_round_trip_preserves_fields() {
        let mut plan = valid_plan();
        plan.parallel = ParallelConfig {
            is_tight: true,
            process_count: 512,
            requires_gang: true,
            fabric_required: true,
            fabric_generation: 2,
        };
        plan.network.placement_strategy = Some(PlacementStrategy::Cluster);
        plan.cost.max_cost_per_hour = 2.5;
        plan.cost.max_total_cost = 100.0;
        plan.metadata.tags.insert("project".into(), "climate".into());

        let encoded = serde_json::to_string(&plan).unwrap();
        let decoded: ExecutionPlan = serde_json::from_str(&encoded).unwrap();
        assert_eq!(plan, decoded);
    }

    #[test]
    fn pricing_mode_uses_kebab_case() {
        assert_eq!(
            serde_json::to_string(&PricingMode::OnDemand).unwrap(),
            "\"on-demand\""
        );
        let m: PricingMode = serde_json::from_str("\"spot\"").unwrap();
        assert_eq!(m, PricingMode::Spot);
    }

    #[test]
    fn cost_estimate_uses_hourly_ceiling() {
        let mut plan = valid_plan();
        plan.cost.max_cost_per_hour = 2.0;
        assert!((plan.cost_estimate(8, 3.0) - 48.0).abs() < f64::EPSILON);
    }

    #[test]
    fn cost_estimate_falls_back_when_no_ceiling() {
        let plan = valid_plan();
        assert!((plan.cost_estimate(10, 1.0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn cost_estimate_zero_without_shapes() {
        let mut plan = valid_plan();
        plan.instances.instance_types.clear();
        assert_eq!(plan.cost_estimate(4, 2.0), 0.0);
    }
}
