//! Gang coordinator — all-or-nothing provisioning for tightly coupled
//! fabric workloads.
//!
//! Wraps the fleet provisioner only when the workload is tightly coupled
//! and the fabric is required; everything else passes straight through.
//! Any failure after launch terminates every created instance before an
//! error surfaces: a half-populated gang is never returned.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::{CloudError, CloudResult};
use crate::fleet::{FleetProvisioner, FleetRequest, FleetResponse};
use crate::provider::ComputeProvider;

/// Verification cap for gang launches.
const GANG_VERIFY_WAIT: Duration = Duration::from_secs(600);

/// The coordinator.
pub struct GangCoordinator {
    provider: Arc<dyn ComputeProvider>,
    provisioner: FleetProvisioner,
    verify_wait: Duration,
}

impl GangCoordinator {
    pub fn new(provider: Arc<dyn ComputeProvider>, provisioner: FleetProvisioner) -> Self {
        GangCoordinator {
            provider,
            provisioner,
            verify_wait: GANG_VERIFY_WAIT,
        }
    }

    /// Override the verify-all deadline.
    pub fn with_verify_wait(mut self, wait: Duration) -> Self {
        self.verify_wait = wait;
        self
    }

    /// Provision a node set, atomically when the workload demands it.
    pub async fn provision(&self, request: &FleetRequest) -> CloudResult<FleetResponse> {
        if !request.requirements.requires_gang() {
            return self.provisioner.provision(request).await;
        }

        info!(
            job_id = %request.job_id,
            nodes = request.node_names.len(),
            "starting gang provisioning"
        );

        self.preflight(request).await?;

        let launched = match self.provisioner.launch(request).await {
            Ok(launched) => launched,
            Err(e) => return Err(CloudError::GangFailed(e.to_string())),
        };

        if launched.instance_ids.len() < request.node_names.len() {
            let reason = format!(
                "fleet filled {} of {} required instances",
                launched.instance_ids.len(),
                request.node_names.len()
            );
            self.rollback(&launched.instance_ids).await;
            return Err(CloudError::GangFailed(reason));
        }

        match self
            .provisioner
            .finalize(request, &launched, self.verify_wait)
            .await
        {
            Ok(response) => {
                info!(
                    job_id = %request.job_id,
                    fleet_id = %response.fleet_id,
                    instances = response.bindings.len(),
                    "gang provisioning complete"
                );
                Ok(response)
            }
            Err(e) => {
                self.rollback(&launched.instance_ids).await;
                let reason = match &e {
                    CloudError::LaunchTimeout(_) => format!("verify timed out: {e}"),
                    _ => e.to_string(),
                };
                Err(CloudError::GangFailed(reason))
            }
        }
    }

    /// Pre-flight capacity check: at least one (shape, subnet) pair must
    /// have an offering.
    async fn preflight(&self, request: &FleetRequest) -> CloudResult<()> {
        let instance_types = self.provisioner.select_instance_types(&request.requirements);

        for subnet in &request.subnet_ids {
            for instance_type in &instance_types {
                match self
                    .provider
                    .instance_type_offered(instance_type, subnet)
                    .await
                {
                    Ok(true) => {
                        debug!(
                            instance_type = %instance_type,
                            subnet = %subnet,
                            "capacity confirmed"
                        );
                        return Ok(());
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(
                            instance_type = %instance_type,
                            subnet = %subnet,
                            error = %e,
                            "offering check failed"
                        );
                    }
                }
            }
        }

        Err(CloudError::InsufficientCapacity)
    }

    /// Terminate everything the failed launch created.
    async fn rollback(&self, instance_ids: &[String]) {
        if instance_ids.is_empty() {
            return;
        }
        warn!(
            instances = instance_ids.len(),
            "cleaning up partial gang launch"
        );
        match self.provider.terminate_instances(instance_ids).await {
            Ok(()) => info!(instances = instance_ids.len(), "partial launch cleaned up"),
            Err(e) => error!(error = %e, "failed to clean up partial launch"),
        }
    }
}
