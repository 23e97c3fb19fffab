//! Cloud control plane for the cloudburst engine.
//!
//! - [`provider`] — the `ComputeProvider` trait, the engine's only view
//!   of the cloud
//! - [`fleet`] — instant-fleet provisioning, binding, tagging, termination
//! - [`placement`] — idempotent placement-group lifecycle
//! - [`gang`] — all-or-nothing provisioning for tightly coupled work
//! - [`spot`] — pricing strategy and interruption monitoring
//! - [`sim`] — the deterministic in-process provider

pub mod error;
pub mod fleet;
pub mod gang;
pub mod placement;
pub mod provider;
pub mod sim;
pub mod spot;

use std::sync::Arc;

pub use error::{CloudError, CloudResult};
pub use fleet::{FleetProvisioner, FleetRequest, FleetResponse};
pub use gang::GangCoordinator;
pub use placement::PlacementGroupManager;
pub use provider::ComputeProvider;
pub use spot::{PreemptionEvent, PricingStrategy, SpotManager};

/// Bind a compute provider by its configured name.
///
/// `simulated` is the in-process backend; production backends register
/// here as they are integrated.
pub fn provider_from_name(name: &str) -> CloudResult<Arc<dyn ComputeProvider>> {
    match name {
        "simulated" => Ok(Arc::new(sim::SimProvider::new())),
        other => Err(CloudError::provider(
            format!("unknown compute provider '{other}'"),
            false,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_provider_resolves() {
        assert!(provider_from_name("simulated").is_ok());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        assert!(matches!(
            provider_from_name("ec2"),
            Err(CloudError::Provider { recoverable: false, .. })
        ));
    }
}
