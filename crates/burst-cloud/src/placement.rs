//! Placement-group lifecycle.
//!
//! Groups are named `{partition}-{nodegroup}-pg` and shared across every
//! launch targeting the same node group. Creation is idempotent and
//! tolerates racing sibling invocations; the engine never deletes a
//! group (external lifecycle).

use std::sync::Arc;

use tracing::{debug, info, warn};

use burst_model::PlacementStrategy;

use crate::error::CloudResult;
use crate::provider::ComputeProvider;

/// Group name for a (partition, node group) pair.
pub fn group_name(partition: &str, node_group: &str) -> String {
    format!("{partition}-{node_group}-pg")
}

/// Idempotently ensures placement groups exist.
pub struct PlacementGroupManager {
    provider: Arc<dyn ComputeProvider>,
}

impl PlacementGroupManager {
    pub fn new(provider: Arc<dyn ComputeProvider>) -> Self {
        PlacementGroupManager { provider }
    }

    /// Ensure the group for `(partition, node_group)` exists with the
    /// given strategy and return its name.
    pub async fn ensure(
        &self,
        partition: &str,
        node_group: &str,
        strategy: PlacementStrategy,
    ) -> CloudResult<String> {
        let name = group_name(partition, node_group);

        if let Some(existing) = self.provider.describe_placement_group(&name).await? {
            if existing != strategy {
                warn!(
                    group = %name,
                    existing = existing.as_str(),
                    requested = strategy.as_str(),
                    "placement group exists with a different strategy; keeping existing"
                );
            } else {
                debug!(group = %name, "using existing placement group");
            }
            return Ok(name);
        }

        match self.provider.create_placement_group(&name, strategy).await {
            Ok(()) => {
                info!(group = %name, strategy = strategy.as_str(), "created placement group");
                Ok(name)
            }
            Err(e) => {
                // A sibling invocation may have created the group between
                // our describe and create.
                if self.provider.describe_placement_group(&name).await?.is_some() {
                    debug!(group = %name, "placement group created concurrently");
                    return Ok(name);
                }
                Err(e)
            }
        }
    }
}
