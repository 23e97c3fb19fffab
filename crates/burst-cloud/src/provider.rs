//! The compute-provider boundary.
//!
//! Everything the engine needs from a cloud is expressed here as one
//! async trait: an instant fleet launch, instance description, tagging,
//! termination, placement groups, offering checks, and spot prices. The
//! production binding implements this against the provider SDK; the
//! in-tree [`crate::sim::SimProvider`] implements it deterministically
//! for tests, dry runs, and integration rehearsal.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use burst_model::{LaunchTemplateRef, PlacementStrategy};

use crate::error::CloudResult;

/// Tag key carrying the logical node name, used for instance lookup.
pub const NODE_NAME_TAG: &str = "cloudburst:node";

/// Tag key marking instances as managed by this engine.
pub const MANAGED_BY_TAG: &str = "cloudburst:managed-by";

/// Value written under [`MANAGED_BY_TAG`].
pub const MANAGED_BY_VALUE: &str = "cloudburst";

/// Instance states that count as "alive" for lookup and termination.
pub const ACTIVE_STATES: &[&str] = &["pending", "running", "shutting-down", "stopping", "stopped"];

/// One row of the fleet request's override matrix: a shape in a subnet.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetOverride {
    pub instance_type: String,
    pub subnet_id: String,
    pub weighted_capacity: f64,
    pub placement_group: Option<String>,
}

/// Default capacity type for the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityType {
    Spot,
    OnDemand,
}

/// Spot block of a fleet request.
#[derive(Debug, Clone, PartialEq)]
pub struct SpotBlock {
    /// Allocation strategy; the engine always asks for `lowest-price`.
    pub allocation_strategy: String,
    /// What happens to a reclaimed instance; always `terminate` here.
    pub interruption_behavior: String,
    pub max_total_price: Option<String>,
}

impl Default for SpotBlock {
    fn default() -> Self {
        SpotBlock {
            allocation_strategy: "lowest-price".to_string(),
            interruption_behavior: "terminate".to_string(),
            max_total_price: None,
        }
    }
}

/// A composed instant-fleet request.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetSpec {
    pub launch_template: LaunchTemplateRef,
    pub overrides: Vec<FleetOverride>,
    pub target_capacity: u32,
    pub default_capacity_type: CapacityType,
    pub spot: Option<SpotBlock>,
    pub on_demand_lowest_price: bool,
    /// Tags applied at the instance resource level.
    pub instance_tags: Vec<(String, String)>,
}

/// Per-slot error reported inside an otherwise successful fleet call.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetSlotError {
    pub instance_type: String,
    pub subnet_id: String,
    pub error_code: String,
    pub error_message: String,
}

/// Outcome of a fleet launch.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetOutcome {
    pub fleet_id: String,
    pub instance_ids: Vec<String>,
    pub errors: Vec<FleetSlotError>,
}

/// A described instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceDescription {
    pub instance_id: String,
    pub state: String,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
    pub launch_time: DateTime<Utc>,
    pub tags: HashMap<String, String>,
}

impl InstanceDescription {
    /// The logical node name recorded on the instance, if any. Callers
    /// decide how to handle the absent case.
    pub fn node_name(&self) -> Option<&str> {
        self.tags
            .get("Name")
            .or_else(|| self.tags.get(NODE_NAME_TAG))
            .map(String::as_str)
    }
}

/// The cloud primitives the engine consumes.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Launch an instant (synchronous) fleet. Slot-level failures are
    /// reported in the outcome, not as an `Err`.
    async fn create_fleet(&self, spec: &FleetSpec) -> CloudResult<FleetOutcome>;

    /// Describe instances by id. Unknown ids are omitted from the result.
    async fn describe_instances(&self, ids: &[String]) -> CloudResult<Vec<InstanceDescription>>;

    /// Apply tags to a set of instances.
    async fn create_tags(&self, ids: &[String], tags: &[(String, String)]) -> CloudResult<()>;

    /// Bulk-terminate instances. Terminating an unknown or already
    /// terminated instance is not an error.
    async fn terminate_instances(&self, ids: &[String]) -> CloudResult<()>;

    /// Find instance ids carrying any of `values` under `tag_key`,
    /// restricted to the given lifecycle states.
    async fn find_instances_by_tag(
        &self,
        tag_key: &str,
        values: &[String],
        states: &[&str],
    ) -> CloudResult<Vec<String>>;

    /// Strategy of an existing placement group, if one exists.
    async fn describe_placement_group(&self, name: &str)
        -> CloudResult<Option<PlacementStrategy>>;

    /// Create a placement group. Creating a group that already exists
    /// with the same strategy must succeed.
    async fn create_placement_group(
        &self,
        name: &str,
        strategy: PlacementStrategy,
    ) -> CloudResult<()>;

    /// Whether a shape is offered in the subnet's availability zone.
    async fn instance_type_offered(&self, instance_type: &str, subnet_id: &str)
        -> CloudResult<bool>;

    /// Current spot prices for the given shapes.
    async fn spot_prices(&self, instance_types: &[String]) -> CloudResult<HashMap<String, f64>>;
}
