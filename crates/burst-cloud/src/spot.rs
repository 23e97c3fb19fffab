//! Spot pricing strategy and interruption monitoring.
//!
//! The strategy decides how much of a job rides on reclaimable capacity;
//! validation rejects launches whose every candidate shape prices above
//! the ceiling when fallback is off. The interruption monitor is a single
//! background worker that polls tracked instances and emits an event per
//! observed reclaim — observational only, reaction is external.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use burst_model::{FabricDemand, InstanceBinding, InstanceRequirements};

use crate::error::{CloudError, CloudResult};
use crate::provider::ComputeProvider;

/// How a job's capacity is split between spot and on-demand.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingStrategy {
    pub max_spot_price: f64,
    pub allow_mixed_pricing: bool,
    /// Fraction of instances to launch as spot, in [0, 1].
    pub spot_ratio: f64,
    pub on_demand_fallback: bool,
}

/// Derive the pricing strategy for a workload.
///
/// Tightly coupled work is failure-sensitive, so the spot share shrinks
/// as the fabric requirement tightens; independent work leans the other
/// way.
pub fn strategy_for(requirements: &InstanceRequirements) -> PricingStrategy {
    let mut strategy = PricingStrategy {
        max_spot_price: requirements.max_spot_price,
        allow_mixed_pricing: requirements.allow_mixed_pricing,
        spot_ratio: 0.5,
        on_demand_fallback: true,
    };

    if requirements.tightly_coupled {
        if requirements.fabric == FabricDemand::Required {
            strategy.spot_ratio = 0.3;
            strategy.allow_mixed_pricing = true;
            strategy.on_demand_fallback = true;
        } else {
            strategy.spot_ratio = 0.7;
            strategy.allow_mixed_pricing = true;
        }
    } else if requirements.prefer_spot {
        strategy.spot_ratio = 0.9;
        strategy.allow_mixed_pricing = true;
    }

    strategy
}

/// Reference price table, strictly ordered by size suffix.
///
/// TODO: replace with a live pricing lookup; the suffix ordering here is
/// load-bearing for strategy validation until then.
pub fn reference_price(instance_type: &str) -> f64 {
    if instance_type.contains("2xlarge") {
        0.384
    } else if instance_type.contains("xlarge") {
        0.192
    } else if instance_type.contains("large") {
        0.096
    } else {
        0.048
    }
}

/// A detected reclaim of a tracked spot instance.
#[derive(Debug, Clone, PartialEq)]
pub struct PreemptionEvent {
    pub instance_id: String,
    pub node_name: String,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub action: String,
}

/// Spot lifecycle manager.
pub struct SpotManager {
    provider: Arc<dyn ComputeProvider>,
}

impl SpotManager {
    pub fn new(provider: Arc<dyn ComputeProvider>) -> Self {
        SpotManager { provider }
    }

    /// Validate that at least one candidate shape prices under the
    /// ceiling, unless on-demand fallback makes the point moot.
    ///
    /// A failed price fetch logs and proceeds; pricing validation must
    /// never be the reason a job cannot start.
    pub async fn validate_pricing(
        &self,
        requirements: &InstanceRequirements,
        strategy: &PricingStrategy,
    ) -> CloudResult<()> {
        if !requirements.prefer_spot {
            return Ok(());
        }

        let candidates: Vec<String> = if requirements.instance_families.is_empty() {
            ["c5.large", "c5.xlarge", "m5.large", "m5.xlarge"]
                .iter()
                .map(|s| s.to_string())
                .collect()
        } else {
            requirements.instance_families.clone()
        };

        let prices = match self.provider.spot_prices(&candidates).await {
            Ok(prices) => prices,
            Err(e) => {
                warn!(error = %e, "spot price fetch failed; proceeding without validation");
                return Ok(());
            }
        };

        let within_budget = prices
            .values()
            .any(|price| strategy.max_spot_price == 0.0 || *price <= strategy.max_spot_price);

        if !within_budget && !strategy.on_demand_fallback {
            return Err(CloudError::PriceCeilingExceeded);
        }

        for (instance_type, price) in &prices {
            if strategy.max_spot_price > 0.0 && *price > strategy.max_spot_price {
                debug!(
                    instance_type = %instance_type,
                    price,
                    ceiling = strategy.max_spot_price,
                    "shape prices above the spot ceiling"
                );
            }
        }

        Ok(())
    }

    /// Start the interruption monitor for a set of bound instances.
    ///
    /// A single worker polls on `poll_interval` and emits one
    /// [`PreemptionEvent`] per instance observed shutting down. Signalling
    /// `shutdown` stops the worker and closes the channel.
    pub fn monitor_interruptions(
        &self,
        bindings: Vec<InstanceBinding>,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> mpsc::Receiver<PreemptionEvent> {
        let (tx, rx) = mpsc::channel(1);
        let provider = self.provider.clone();
        let ids: Vec<String> = bindings.iter().map(|b| b.instance_id.clone()).collect();

        tokio::spawn(async move {
            let mut reported: HashSet<String> = HashSet::new();
            info!(instances = ids.len(), "interruption monitor started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {
                        let described = match provider.describe_instances(&ids).await {
                            Ok(d) => d,
                            Err(e) => {
                                warn!(error = %e, "interruption poll failed");
                                continue;
                            }
                        };
                        for instance in described {
                            if instance.state != "shutting-down"
                                || reported.contains(&instance.instance_id)
                            {
                                continue;
                            }
                            reported.insert(instance.instance_id.clone());
                            let node_name = instance
                                .node_name()
                                .unwrap_or(&instance.instance_id)
                                .to_string();
                            let event = PreemptionEvent {
                                instance_id: instance.instance_id.clone(),
                                node_name: node_name.clone(),
                                timestamp: Utc::now(),
                                reason: "spot_interruption".to_string(),
                                action: "terminate".to_string(),
                            };
                            warn!(
                                instance = %event.instance_id,
                                node = %node_name,
                                "spot interruption detected"
                            );
                            if tx.send(event).await.is_err() {
                                // Receiver gone; nothing left to report to.
                                return;
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        info!("interruption monitor shutting down");
                        return;
                    }
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::test_fixtures::request;
    use crate::fleet::FleetProvisioner;
    use crate::sim::SimProvider;

    fn tight_fabric() -> InstanceRequirements {
        InstanceRequirements {
            tightly_coupled: true,
            fabric: FabricDemand::Required,
            ..InstanceRequirements::default()
        }
    }

    #[test]
    fn tight_fabric_jobs_lean_on_demand() {
        let strategy = strategy_for(&tight_fabric());
        assert_eq!(strategy.spot_ratio, 0.3);
        assert!(strategy.allow_mixed_pricing);
        assert!(strategy.on_demand_fallback);
    }

    #[test]
    fn tight_jobs_without_fabric_take_more_spot() {
        let req = InstanceRequirements {
            tightly_coupled: true,
            fabric: FabricDemand::Preferred,
            ..InstanceRequirements::default()
        };
        let strategy = strategy_for(&req);
        assert_eq!(strategy.spot_ratio, 0.7);
        assert!(strategy.allow_mixed_pricing);
    }

    #[test]
    fn independent_spot_preferring_jobs_ride_spot() {
        let req = InstanceRequirements {
            prefer_spot: true,
            ..InstanceRequirements::default()
        };
        let strategy = strategy_for(&req);
        assert_eq!(strategy.spot_ratio, 0.9);
        assert!(strategy.allow_mixed_pricing);
    }

    #[test]
    fn neutral_independent_jobs_split_evenly() {
        let strategy = strategy_for(&InstanceRequirements::default());
        assert_eq!(strategy.spot_ratio, 0.5);
    }

    #[test]
    fn reference_prices_rise_with_size() {
        assert!(reference_price("c5.large") < reference_price("c5.xlarge"));
        assert!(reference_price("c5.xlarge") < reference_price("m5.2xlarge"));
        assert_eq!(reference_price("t3.micro"), 0.048);
    }

    #[tokio::test]
    async fn ceiling_below_every_price_fails_without_fallback() {
        let provider = Arc::new(SimProvider::new());
        let manager = SpotManager::new(provider);

        let req = InstanceRequirements {
            prefer_spot: true,
            instance_families: vec!["c5.xlarge".to_string(), "m5.2xlarge".to_string()],
            ..InstanceRequirements::default()
        };
        let strategy = PricingStrategy {
            max_spot_price: 0.01,
            allow_mixed_pricing: false,
            spot_ratio: 0.9,
            on_demand_fallback: false,
        };

        match manager.validate_pricing(&req, &strategy).await {
            Err(CloudError::PriceCeilingExceeded) => {}
            other => panic!("expected PriceCeilingExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fallback_lets_overpriced_launches_proceed() {
        let provider = Arc::new(SimProvider::new());
        let manager = SpotManager::new(provider);

        let req = InstanceRequirements {
            prefer_spot: true,
            instance_families: vec!["c5.xlarge".to_string()],
            ..InstanceRequirements::default()
        };
        let strategy = PricingStrategy {
            max_spot_price: 0.01,
            allow_mixed_pricing: true,
            spot_ratio: 0.3,
            on_demand_fallback: true,
        };
        assert!(manager.validate_pricing(&req, &strategy).await.is_ok());
    }

    #[tokio::test]
    async fn zero_ceiling_means_no_ceiling() {
        let provider = Arc::new(SimProvider::new());
        let manager = SpotManager::new(provider);

        let req = InstanceRequirements {
            prefer_spot: true,
            instance_families: vec!["m5.2xlarge".to_string()],
            ..InstanceRequirements::default()
        };
        let strategy = PricingStrategy {
            max_spot_price: 0.0,
            allow_mixed_pricing: false,
            spot_ratio: 0.9,
            on_demand_fallback: false,
        };
        assert!(manager.validate_pricing(&req, &strategy).await.is_ok());
    }

    #[tokio::test]
    async fn monitor_emits_one_event_per_reclaimed_instance() {
        let provider = Arc::new(SimProvider::new());
        let provisioner = FleetProvisioner::new(provider.clone())
            .with_wait_timeout(Duration::from_millis(50))
            .with_poll_interval(Duration::from_millis(1));
        let req = request(
            &["cloud-cpu-001", "cloud-cpu-002"],
            InstanceRequirements {
                instance_families: vec!["c6i.xlarge".to_string()],
                ..InstanceRequirements::default()
            },
        );
        let response = provisioner.provision(&req).await.unwrap();

        let reclaimed = response.bindings[0].instance_id.clone();
        provider.set_instance_state(&reclaimed, "shutting-down");

        let manager = SpotManager::new(provider.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut events = manager.monitor_interruptions(
            response.bindings.clone(),
            Duration::from_millis(1),
            shutdown_rx,
        );

        let event = events.recv().await.expect("one interruption event");
        assert_eq!(event.instance_id, reclaimed);
        assert_eq!(event.node_name, "cloud-cpu-001");
        assert_eq!(event.reason, "spot_interruption");
        assert_eq!(event.action, "terminate");

        // Shutting the context down closes the channel.
        shutdown_tx.send(true).unwrap();
        assert!(events.recv().await.is_none());
    }
}
