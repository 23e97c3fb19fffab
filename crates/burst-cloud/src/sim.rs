//! Deterministic in-process compute provider.
//!
//! Implements the full [`ComputeProvider`] surface against in-memory
//! state: fleets allocate instance records, tags and placement groups are
//! real maps, and termination flips lifecycle states. Fault knobs (denied
//! offerings, stalled instances, capacity limits, fleet failures) let
//! tests and integration rehearsal drive every failure path the real
//! cloud can produce.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use burst_model::PlacementStrategy;

use crate::error::{CloudError, CloudResult};
use crate::provider::{
    ComputeProvider, FleetOutcome, FleetSlotError, FleetSpec, InstanceDescription,
};
use crate::spot::reference_price;

#[derive(Debug, Clone)]
struct SimInstance {
    instance_id: String,
    state: String,
    private_ip: String,
    tags: HashMap<String, String>,
    launch_time: chrono::DateTime<Utc>,
}

#[derive(Default)]
struct SimState {
    next_instance: u32,
    instances: HashMap<String, SimInstance>,
    placement_groups: HashMap<String, PlacementStrategy>,
    /// `None` = every (shape, subnet) pair is offered.
    offered_pairs: Option<HashSet<(String, String)>>,
    /// How many of the next launches stay stuck in `pending`.
    stall_budget: u32,
    /// Cap on instances a single fleet call may fill.
    capacity_limit: Option<u32>,
    fleet_failure: Option<(String, bool)>,
    fleet_calls: u32,
    terminate_calls: u32,
}

/// The simulated provider.
#[derive(Default)]
pub struct SimProvider {
    state: Mutex<SimState>,
}

impl SimProvider {
    pub fn new() -> Self {
        SimProvider::default()
    }

    /// Deny every (shape, subnet) offering.
    pub fn with_denied_offerings(self) -> Self {
        self.state.lock().unwrap().offered_pairs = Some(HashSet::new());
        self
    }

    /// Restrict offerings to an explicit allowlist.
    pub fn with_offered_pair(self, instance_type: &str, subnet_id: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state
                .offered_pairs
                .get_or_insert_with(HashSet::new)
                .insert((instance_type.to_string(), subnet_id.to_string()));
        }
        self
    }

    /// The next `n` launched instances never leave `pending`.
    pub fn with_stalled_instances(self, n: u32) -> Self {
        self.state.lock().unwrap().stall_budget = n;
        self
    }

    /// Cap how many instances one fleet call can fill; the rest come back
    /// as slot errors.
    pub fn with_capacity_limit(self, n: u32) -> Self {
        self.state.lock().unwrap().capacity_limit = Some(n);
        self
    }

    /// Every fleet call fails with a provider error.
    pub fn with_fleet_failure(self, message: &str, recoverable: bool) -> Self {
        self.state.lock().unwrap().fleet_failure = Some((message.to_string(), recoverable));
        self
    }

    /// Force an instance into a lifecycle state (e.g. `shutting-down`).
    pub fn set_instance_state(&self, instance_id: &str, state: &str) {
        let mut sim = self.state.lock().unwrap();
        if let Some(instance) = sim.instances.get_mut(instance_id) {
            instance.state = state.to_string();
        }
    }

    pub fn fleet_call_count(&self) -> u32 {
        self.state.lock().unwrap().fleet_calls
    }

    pub fn terminate_call_count(&self) -> u32 {
        self.state.lock().unwrap().terminate_calls
    }
}

#[async_trait]
impl ComputeProvider for SimProvider {
    async fn create_fleet(&self, spec: &FleetSpec) -> CloudResult<FleetOutcome> {
        let mut sim = self.state.lock().unwrap();
        sim.fleet_calls += 1;

        if let Some((message, recoverable)) = sim.fleet_failure.clone() {
            return Err(CloudError::Provider {
                message,
                recoverable,
            });
        }
        if spec.overrides.is_empty() {
            return Err(CloudError::provider("fleet request has no overrides", false));
        }

        let fleet_id = format!("fleet-{:04}", sim.fleet_calls);
        let to_fill = match sim.capacity_limit {
            Some(limit) => spec.target_capacity.min(limit),
            None => spec.target_capacity,
        };

        let mut instance_ids = Vec::new();
        for _ in 0..to_fill {
            sim.next_instance += 1;
            let seq = sim.next_instance;
            let stalled = if sim.stall_budget > 0 {
                sim.stall_budget -= 1;
                true
            } else {
                false
            };
            let id = format!("i-{seq:08x}");
            let tags: HashMap<String, String> = spec.instance_tags.iter().cloned().collect();
            sim.instances.insert(
                id.clone(),
                SimInstance {
                    instance_id: id.clone(),
                    state: if stalled { "pending" } else { "running" }.to_string(),
                    private_ip: format!("10.0.{}.{}", seq / 256, seq % 256),
                    tags,
                    launch_time: Utc::now(),
                },
            );
            instance_ids.push(id);
        }

        let mut errors = Vec::new();
        if to_fill < spec.target_capacity {
            let first = &spec.overrides[0];
            errors.push(FleetSlotError {
                instance_type: first.instance_type.clone(),
                subnet_id: first.subnet_id.clone(),
                error_code: "InsufficientInstanceCapacity".to_string(),
                error_message: format!(
                    "could only fill {to_fill} of {} requested instances",
                    spec.target_capacity
                ),
            });
        }

        Ok(FleetOutcome {
            fleet_id,
            instance_ids,
            errors,
        })
    }

    async fn describe_instances(&self, ids: &[String]) -> CloudResult<Vec<InstanceDescription>> {
        let sim = self.state.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| sim.instances.get(id))
            .map(|i| InstanceDescription {
                instance_id: i.instance_id.clone(),
                state: i.state.clone(),
                private_ip: Some(i.private_ip.clone()),
                public_ip: None,
                launch_time: i.launch_time,
                tags: i.tags.clone(),
            })
            .collect())
    }

    async fn create_tags(&self, ids: &[String], tags: &[(String, String)]) -> CloudResult<()> {
        let mut sim = self.state.lock().unwrap();
        for id in ids {
            if let Some(instance) = sim.instances.get_mut(id) {
                for (key, value) in tags {
                    instance.tags.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    async fn terminate_instances(&self, ids: &[String]) -> CloudResult<()> {
        let mut sim = self.state.lock().unwrap();
        sim.terminate_calls += 1;
        for id in ids {
            if let Some(instance) = sim.instances.get_mut(id) {
                instance.state = "terminated".to_string();
            }
        }
        Ok(())
    }

    async fn find_instances_by_tag(
        &self,
        tag_key: &str,
        values: &[String],
        states: &[&str],
    ) -> CloudResult<Vec<String>> {
        let sim = self.state.lock().unwrap();
        let mut ids: Vec<String> = sim
            .instances
            .values()
            .filter(|i| states.contains(&i.state.as_str()))
            .filter(|i| {
                i.tags
                    .get(tag_key)
                    .is_some_and(|v| values.iter().any(|wanted| wanted == v))
            })
            .map(|i| i.instance_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn describe_placement_group(
        &self,
        name: &str,
    ) -> CloudResult<Option<PlacementStrategy>> {
        Ok(self.state.lock().unwrap().placement_groups.get(name).copied())
    }

    async fn create_placement_group(
        &self,
        name: &str,
        strategy: PlacementStrategy,
    ) -> CloudResult<()> {
        let mut sim = self.state.lock().unwrap();
        if let Some(existing) = sim.placement_groups.get(name) {
            if *existing == strategy {
                return Ok(());
            }
            return Err(CloudError::provider(
                format!(
                    "placement group '{name}' already exists with strategy {}",
                    existing.as_str()
                ),
                false,
            ));
        }
        sim.placement_groups.insert(name.to_string(), strategy);
        Ok(())
    }

    async fn instance_type_offered(
        &self,
        instance_type: &str,
        subnet_id: &str,
    ) -> CloudResult<bool> {
        let sim = self.state.lock().unwrap();
        Ok(match &sim.offered_pairs {
            None => true,
            Some(pairs) => {
                pairs.contains(&(instance_type.to_string(), subnet_id.to_string()))
            }
        })
    }

    async fn spot_prices(&self, instance_types: &[String]) -> CloudResult<HashMap<String, f64>> {
        Ok(instance_types
            .iter()
            .map(|t| (t.clone(), reference_price(t)))
            .collect())
    }
}
