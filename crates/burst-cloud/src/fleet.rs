//! Fleet provisioner — turns node names plus requirements into running,
//! tagged, bound instances.
//!
//! The launch is a single instant-fleet call; the override matrix is the
//! outer product of selected shapes and target subnets with unit weight.
//! Within a family, larger sizes precede smaller ones so the fleet
//! allocator right-sizes without over-specifying.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use burst_model::{
    FabricDemand, FailedInstance, InstanceBinding, InstanceRequirements, LaunchTemplateRef,
};

use crate::error::{CloudError, CloudResult};
use crate::placement::PlacementGroupManager;
use crate::provider::{
    CapacityType, ComputeProvider, FleetOverride, FleetSpec, InstanceDescription, SpotBlock,
    ACTIVE_STATES, MANAGED_BY_TAG, MANAGED_BY_VALUE, NODE_NAME_TAG,
};

/// Wait cap for the normal provisioning path.
const DEFAULT_WAIT: Duration = Duration::from_secs(300);

/// How often the running-state waiter polls.
const DEFAULT_POLL: Duration = Duration::from_secs(5);

/// A provisioning request for a set of logical nodes.
#[derive(Debug, Clone)]
pub struct FleetRequest {
    /// Ordered logical node names; bindings are index-aligned to this.
    pub node_names: Vec<String>,
    pub partition: String,
    pub node_group: String,
    pub job_id: String,
    pub requirements: InstanceRequirements,
    pub launch_template: LaunchTemplateRef,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
    /// Extra instance tags from the plan or node-group config.
    pub tags: HashMap<String, String>,
}

/// Result of a completed provisioning call.
#[derive(Debug, Clone)]
pub struct FleetResponse {
    pub fleet_id: String,
    pub bindings: Vec<InstanceBinding>,
    pub failed: Vec<FailedInstance>,
}

/// Instances created by the launch stage, before running verification.
#[derive(Debug, Clone)]
pub struct LaunchedFleet {
    pub fleet_id: String,
    pub instance_ids: Vec<String>,
    pub failed: Vec<FailedInstance>,
}

/// The provisioner.
pub struct FleetProvisioner {
    provider: Arc<dyn ComputeProvider>,
    placement: PlacementGroupManager,
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl FleetProvisioner {
    pub fn new(provider: Arc<dyn ComputeProvider>) -> Self {
        FleetProvisioner {
            placement: PlacementGroupManager::new(provider.clone()),
            provider,
            wait_timeout: DEFAULT_WAIT,
            poll_interval: DEFAULT_POLL,
        }
    }

    /// Override the running-state wait cap.
    pub fn with_wait_timeout(mut self, wait: Duration) -> Self {
        self.wait_timeout = wait;
        self
    }

    /// Override the waiter poll interval.
    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll_interval = poll;
        self
    }

    /// Launch, verify, bind, and tag in one call (the non-gang path).
    pub async fn provision(&self, request: &FleetRequest) -> CloudResult<FleetResponse> {
        let launched = self.launch(request).await?;
        self.finalize(request, &launched, self.wait_timeout).await
    }

    /// Compose and fire the fleet request. Returns raw instance ids; the
    /// caller decides the verification deadline and failure policy.
    pub async fn launch(&self, request: &FleetRequest) -> CloudResult<LaunchedFleet> {
        if request.node_names.is_empty() {
            return Err(CloudError::provider("no nodes requested", false));
        }
        if request.subnet_ids.is_empty() {
            return Err(CloudError::provider("no target subnets configured", false));
        }

        let placement_group = match request.requirements.placement_strategy {
            Some(strategy) if request.node_names.len() >= 2 => Some(
                self.placement
                    .ensure(&request.partition, &request.node_group, strategy)
                    .await?,
            ),
            _ => None,
        };

        let instance_types = self.select_instance_types(&request.requirements);
        let spec = self.build_fleet_spec(request, &instance_types, placement_group.as_deref());

        info!(
            partition = %request.partition,
            node_group = %request.node_group,
            nodes = request.node_names.len(),
            shapes = instance_types.len(),
            subnets = request.subnet_ids.len(),
            spot = request.requirements.prefer_spot,
            placement_group = placement_group.as_deref().unwrap_or("-"),
            "launching instant fleet"
        );

        let outcome = self.provider.create_fleet(&spec).await?;

        let failed: Vec<FailedInstance> = outcome
            .errors
            .iter()
            .map(|e| FailedInstance {
                instance_type: e.instance_type.clone(),
                subnet_id: e.subnet_id.clone(),
                error_code: e.error_code.clone(),
                error_message: e.error_message.clone(),
            })
            .collect();
        for failure in &failed {
            warn!(
                instance_type = %failure.instance_type,
                subnet = %failure.subnet_id,
                code = %failure.error_code,
                "fleet slot failed"
            );
        }

        if outcome.instance_ids.is_empty() {
            return Err(CloudError::provider("no instances were launched", true));
        }

        info!(
            fleet_id = %outcome.fleet_id,
            launched = outcome.instance_ids.len(),
            requested = request.node_names.len(),
            "fleet created"
        );

        Ok(LaunchedFleet {
            fleet_id: outcome.fleet_id,
            instance_ids: outcome.instance_ids,
            failed,
        })
    }

    /// Wait for running state, build index-aligned bindings, and tag.
    ///
    /// Tag failures degrade later lookups but never fail the operation.
    pub async fn finalize(
        &self,
        request: &FleetRequest,
        launched: &LaunchedFleet,
        wait: Duration,
    ) -> CloudResult<FleetResponse> {
        let described = self.wait_for_running(&launched.instance_ids, wait).await?;

        if described.len() != request.node_names.len() {
            return Err(CloudError::provider(
                format!(
                    "fleet produced {} running instance(s) for {} requested node(s)",
                    described.len(),
                    request.node_names.len()
                ),
                true,
            ));
        }

        let mut bindings = Vec::with_capacity(described.len());
        for (node_name, instance) in request.node_names.iter().zip(described.iter()) {
            let private_ip = instance.private_ip.clone().ok_or_else(|| {
                CloudError::provider(
                    format!("instance {} has no private address", instance.instance_id),
                    true,
                )
            })?;
            bindings.push(InstanceBinding {
                node_name: node_name.clone(),
                instance_id: instance.instance_id.clone(),
                private_ip,
                public_ip: instance.public_ip.clone(),
                state: instance.state.clone(),
                launch_time: instance.launch_time,
            });
        }

        self.tag_bindings(&bindings).await;

        Ok(FleetResponse {
            fleet_id: launched.fleet_id.clone(),
            bindings,
            failed: launched.failed.clone(),
        })
    }

    /// Poll until every instance is running, the deadline passes, or the
    /// provider errors. Descriptions come back in launch order.
    async fn wait_for_running(
        &self,
        ids: &[String],
        wait: Duration,
    ) -> CloudResult<Vec<InstanceDescription>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let described = self.provider.describe_instances(ids).await?;
            let by_id: HashMap<&str, &InstanceDescription> = described
                .iter()
                .map(|d| (d.instance_id.as_str(), d))
                .collect();

            let pending: Vec<String> = ids
                .iter()
                .filter(|id| {
                    by_id
                        .get(id.as_str())
                        .map_or(true, |d| d.state != "running")
                })
                .cloned()
                .collect();

            if pending.is_empty() {
                let ordered = ids
                    .iter()
                    .filter_map(|id| by_id.get(id.as_str()).map(|d| (*d).clone()))
                    .collect();
                return Ok(ordered);
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(pending = pending.len(), "running-state wait expired");
                return Err(CloudError::LaunchTimeout(pending));
            }

            debug!(pending = pending.len(), "waiting for instances to run");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Stamp each instance with its node name and the managed-by marker.
    async fn tag_bindings(&self, bindings: &[InstanceBinding]) {
        for binding in bindings {
            let tags = vec![
                ("Name".to_string(), binding.node_name.clone()),
                (NODE_NAME_TAG.to_string(), binding.node_name.clone()),
                (MANAGED_BY_TAG.to_string(), MANAGED_BY_VALUE.to_string()),
            ];
            if let Err(e) = self
                .provider
                .create_tags(std::slice::from_ref(&binding.instance_id), &tags)
                .await
            {
                warn!(
                    instance = %binding.instance_id,
                    node = %binding.node_name,
                    error = %e,
                    "failed to tag instance"
                );
            }
        }
    }

    /// Terminate the instances bound to the given node names. Idempotent:
    /// nothing found means nothing to do.
    pub async fn terminate(&self, node_names: &[String]) -> CloudResult<()> {
        if node_names.is_empty() {
            return Ok(());
        }

        let ids = self
            .provider
            .find_instances_by_tag(NODE_NAME_TAG, node_names, ACTIVE_STATES)
            .await?;

        if ids.is_empty() {
            info!(nodes = node_names.len(), "no instances found for termination");
            return Ok(());
        }

        self.provider.terminate_instances(&ids).await?;
        info!(
            nodes = node_names.len(),
            instances = ids.len(),
            "termination initiated"
        );
        Ok(())
    }

    /// Resolve the shape list for a set of requirements.
    ///
    /// Entries with a size suffix are used verbatim (an external plan has
    /// already made the decision); bare families go through the size
    /// matrix. With no families at all, fall back by workload kind.
    pub fn select_instance_types(&self, requirements: &InstanceRequirements) -> Vec<String> {
        let mut types = Vec::new();

        if requirements.instance_families.is_empty() {
            if requirements.gpus > 0 {
                types.extend(["p3.2xlarge", "g4dn.xlarge"].map(String::from));
            } else if requirements.fabric == FabricDemand::Required {
                types.extend(
                    ["c5n.large", "c5n.xlarge", "c6i.large", "c6i.xlarge"].map(String::from),
                );
            } else {
                types.extend(["c5.large", "c5.xlarge", "m5.large", "m5.xlarge"].map(String::from));
            }
        } else {
            for entry in &requirements.instance_families {
                if entry.contains('.') {
                    types.push(entry.clone());
                } else if let Some(shapes) = accelerator_shapes(entry) {
                    types.extend(shapes.iter().map(|s| s.to_string()));
                } else {
                    types.extend(sizes_for_family(entry, requirements));
                }
            }
        }

        types.retain(|t| !requirements.exclude_instances.iter().any(|x| x == t));
        types
    }

    fn build_fleet_spec(
        &self,
        request: &FleetRequest,
        instance_types: &[String],
        placement_group: Option<&str>,
    ) -> FleetSpec {
        let overrides = instance_types
            .iter()
            .flat_map(|instance_type| {
                request.subnet_ids.iter().map(move |subnet| FleetOverride {
                    instance_type: instance_type.clone(),
                    subnet_id: subnet.clone(),
                    weighted_capacity: 1.0,
                    placement_group: placement_group.map(str::to_string),
                })
            })
            .collect();

        let prefer_spot = request.requirements.prefer_spot;
        let spot = prefer_spot.then(|| SpotBlock {
            max_total_price: (request.requirements.max_spot_price > 0.0)
                .then(|| format!("{:.4}", request.requirements.max_spot_price)),
            ..SpotBlock::default()
        });

        let mut instance_tags: Vec<(String, String)> = vec![
            ("Partition".to_string(), request.partition.clone()),
            ("NodeGroup".to_string(), request.node_group.clone()),
            ("JobID".to_string(), request.job_id.clone()),
            (MANAGED_BY_TAG.to_string(), MANAGED_BY_VALUE.to_string()),
        ];
        for (key, value) in &request.tags {
            instance_tags.push((key.clone(), value.clone()));
        }

        FleetSpec {
            launch_template: request.launch_template.clone(),
            overrides,
            target_capacity: request.node_names.len() as u32,
            default_capacity_type: if prefer_spot {
                CapacityType::Spot
            } else {
                CapacityType::OnDemand
            },
            on_demand_lowest_price: !prefer_spot || request.requirements.allow_mixed_pricing,
            spot,
            instance_tags,
        }
    }
}

/// Size matrix keyed by (memory per node, CPUs per node). Larger sizes
/// lead so the allocator picks the tightest fit that actually exists.
fn sizes_for_family(family: &str, requirements: &InstanceRequirements) -> Vec<String> {
    let memory_gb = requirements.min_memory_mb / 1024;
    let cpus = requirements.min_cpus;

    let sizes: &[&str] = if memory_gb <= 8 && cpus <= 2 {
        &["large"]
    } else if memory_gb <= 16 && cpus <= 4 {
        &["xlarge", "large"]
    } else if memory_gb <= 32 && cpus <= 8 {
        &["2xlarge", "xlarge"]
    } else if memory_gb <= 64 && cpus <= 16 {
        &["4xlarge", "2xlarge"]
    } else {
        &["8xlarge", "4xlarge"]
    };

    sizes.iter().map(|s| format!("{family}.{s}")).collect()
}

/// Accelerator families ship in fixed shapes; sizing by CPU/memory does
/// not apply.
fn accelerator_shapes(family: &str) -> Option<&'static [&'static str]> {
    match family {
        "p4d" => Some(&["p4d.24xlarge"]),
        "p3dn" => Some(&["p3dn.24xlarge"]),
        "g4dn" => Some(&["g4dn.xlarge", "g4dn.2xlarge"]),
        _ => None,
    }
}
