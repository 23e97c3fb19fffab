//! Instance requirements — what kind of cloud capacity a job needs.
//!
//! Produced either by the analyzer (from a classified job) or imported
//! from an externally supplied execution plan. Downstream provisioning
//! code consumes only this type.

use serde::{Deserialize, Serialize};

use crate::job::Topology;

/// How strongly a job demands the low-latency fabric adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FabricDemand {
    /// The job fails or degrades badly without the fabric.
    Required,
    /// The job benefits from the fabric but runs without it.
    Preferred,
    /// The fabric may be used if the chosen shape happens to have it.
    Optional,
    /// Do not use the fabric.
    #[default]
    Disabled,
}

/// Placement-group strategy for a multi-instance launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementStrategy {
    Cluster,
    Partition,
    Spread,
}

impl PlacementStrategy {
    /// Map a job topology onto a placement strategy; `Any` maps to none.
    pub fn from_topology(topology: Topology) -> Option<Self> {
        match topology {
            Topology::Cluster => Some(PlacementStrategy::Cluster),
            Topology::Partition => Some(PlacementStrategy::Partition),
            Topology::Spread => Some(PlacementStrategy::Spread),
            Topology::Any => None,
        }
    }

    /// The strategy name as the cloud API spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlacementStrategy::Cluster => "cluster",
            PlacementStrategy::Partition => "partition",
            PlacementStrategy::Spread => "spread",
        }
    }
}

/// What kind of instance a job needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InstanceRequirements {
    pub min_cpus: u32,
    pub min_memory_mb: u64,
    #[serde(default)]
    pub gpus: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_type: Option<String>,

    #[serde(default)]
    pub fabric: FabricDemand,
    #[serde(default)]
    pub topology: Topology,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement_strategy: Option<PlacementStrategy>,

    /// Ordered preference list. Entries may be bare families (`c6in`) that
    /// the provisioner sizes, or full shapes (`hpc7a.2xlarge`) used verbatim.
    #[serde(default)]
    pub instance_families: Vec<String>,
    #[serde(default)]
    pub exclude_instances: Vec<String>,
    #[serde(default)]
    pub hpc_optimized: bool,
    #[serde(default)]
    pub enhanced_networking: bool,

    #[serde(default)]
    pub max_spot_price: f64,
    #[serde(default)]
    pub prefer_spot: bool,
    #[serde(default)]
    pub allow_mixed_pricing: bool,

    // Workload classification the pricing and gang layers key off.
    #[serde(default)]
    pub tightly_coupled: bool,
    #[serde(default)]
    pub process_count: u32,
}

impl InstanceRequirements {
    /// Whether this workload must be provisioned atomically.
    pub fn requires_gang(&self) -> bool {
        self.tightly_coupled && self.fabric == FabricDemand::Required
    }

    /// Import requirements from an execution plan. The plan is
    /// authoritative: its shape list is used verbatim and its parallel,
    /// network, and cost blocks override anything the analyzer would
    /// have derived.
    pub fn from_plan(plan: &crate::plan::ExecutionPlan) -> Self {
        InstanceRequirements {
            instance_families: plan.instances.instance_types.clone(),
            fabric: if plan.parallel.fabric_required {
                FabricDemand::Required
            } else {
                FabricDemand::Disabled
            },
            placement_strategy: plan.network.placement_strategy,
            enhanced_networking: plan.network.enhanced_networking,
            max_spot_price: plan.instances.max_spot_price,
            prefer_spot: plan.instances.pricing_mode == crate::plan::PricingMode::Spot,
            allow_mixed_pricing: plan.instances.pricing_mode == crate::plan::PricingMode::Mixed,
            tightly_coupled: plan.parallel.is_tight,
            process_count: plan.parallel.process_count,
            ..InstanceRequirements::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::test_fixtures::valid_plan;

    #[test]
    fn topology_mapping() {
        assert_eq!(
            PlacementStrategy::from_topology(Topology::Cluster),
            Some(PlacementStrategy::Cluster)
        );
        assert_eq!(PlacementStrategy::from_topology(Topology::Any), None);
    }

    #[test]
    fn gang_needs_tight_and_required_fabric() {
        let mut req = InstanceRequirements {
            tightly_coupled: true,
            fabric: FabricDemand::Required,
            ..InstanceRequirements::default()
        };
        assert!(req.requires_gang());

        req.fabric = FabricDemand::Preferred;
        assert!(!req.requires_gang());

        req.fabric = FabricDemand::Required;
        req.tightly_coupled = false;
        assert!(!req.requires_gang());
    }

    #[test]
    fn plan_import_is_authoritative() {
        let mut plan = valid_plan();
        plan.parallel.is_tight = true;
        plan.parallel.requires_gang = true;
        plan.parallel.fabric_required = true;
        plan.network.placement_strategy = Some(PlacementStrategy::Cluster);
        plan.instances.instance_types = vec!["hpc7a.2xlarge".to_string()];

        let req = InstanceRequirements::from_plan(&plan);
        assert!(req.tightly_coupled);
        assert_eq!(req.fabric, FabricDemand::Required);
        assert_eq!(req.placement_strategy, Some(PlacementStrategy::Cluster));
        assert_eq!(req.instance_families, vec!["hpc7a.2xlarge"]);
        assert!(req.requires_gang());
    }
}
