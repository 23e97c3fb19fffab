//! Advisor subprocess client.
//!
//! The advisor is an external tool consulted for burst decisions and
//! cost modelling. Integration is best-effort: a missing or failing
//! advisor never blocks provisioning, it only withholds enrichment.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use burst_model::{InstanceRequirements, Job, Topology};

use crate::{AdvisorError, AdvisorResult};

/// Cost analysis block of an advisor decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CostAnalysis {
    #[serde(default)]
    pub onpremise_cost: f64,
    #[serde(default)]
    pub cloud_cost: f64,
    #[serde(default)]
    pub savings_percent: f64,
    #[serde(default)]
    pub break_even_hours: f64,
}

/// Expected queueing/provisioning behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PerformanceOutlook {
    #[serde(default)]
    pub onpremise_wait_minutes: u64,
    #[serde(default)]
    pub cloud_provision_minutes: u64,
}

/// A burst decision returned by the advisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AdvisorDecision {
    pub should_provision: bool,
    #[serde(default)]
    pub recommended_action: String,
    #[serde(default)]
    pub cost_analysis: CostAnalysis,
    #[serde(default)]
    pub performance: PerformanceOutlook,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub decision_factors: Vec<String>,
}

/// The advisor client.
#[derive(Debug, Clone)]
pub struct AdvisorClient {
    command: String,
    config_path: String,
    timeout: Duration,
}

impl AdvisorClient {
    pub fn new(command: impl Into<String>, config_path: impl Into<String>, timeout: Duration) -> Self {
        AdvisorClient {
            command: command.into(),
            config_path: config_path.into(),
            timeout,
        }
    }

    pub fn from_config(config: &burst_config::AdvisorConfig) -> Self {
        AdvisorClient::new(
            config.command.clone(),
            config.config_path.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Whether the advisor command is present and answers.
    pub async fn available(&self) -> bool {
        let probe = Command::new(&self.command).arg("--version").output();
        match tokio::time::timeout(self.timeout, probe).await {
            Ok(Ok(output)) => output.status.success(),
            _ => false,
        }
    }

    /// Ask the advisor for a burst decision on a job.
    pub async fn analyze(&self, job: &Job) -> AdvisorResult<AdvisorDecision> {
        let mut args = vec![
            "analyze".to_string(),
            "--output=json".to_string(),
            format!("--job-id={}", job.job_id),
        ];
        if !self.config_path.is_empty() {
            args.push(format!("--config={}", self.config_path));
        }
        if job.tightly_coupled {
            args.push("--parallel-job=true".to_string());
            args.push(format!("--processes={}", job.process_count));
            args.push(format!("--nodes={}", job.resources.nodes));
            if job.topology == Topology::Cluster {
                args.push("--requires-low-latency=true".to_string());
            }
        }

        let run = Command::new(&self.command).args(&args).output();
        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| AdvisorError::CommandFailed("advisor timed out".to_string()))?
            .map_err(|e| AdvisorError::CommandFailed(e.to_string()))?;

        if !output.status.success() {
            return Err(AdvisorError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let decision: AdvisorDecision = serde_json::from_slice(&output.stdout)?;
        info!(
            job_id = %job.job_id,
            should_provision = decision.should_provision,
            action = %decision.recommended_action,
            confidence = decision.confidence,
            "advisor decision received"
        );
        Ok(decision)
    }

    /// Fold an advisor decision into derived requirements. Failures log
    /// and leave the requirements untouched.
    pub async fn enrich(&self, job: &Job, requirements: &mut InstanceRequirements) {
        let decision = match self.analyze(job).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "advisor unavailable, proceeding without enrichment");
                return;
            }
        };
        apply_decision(&decision, job, requirements);
    }
}

/// Pure decision-application logic, split out for testing.
pub fn apply_decision(
    decision: &AdvisorDecision,
    job: &Job,
    requirements: &mut InstanceRequirements,
) {
    if decision.cost_analysis.cloud_cost > 0.0 && job.resources.nodes > 0 {
        let per_node_hourly = decision.cost_analysis.cloud_cost / f64::from(job.resources.nodes);
        let ceiling = per_node_hourly * 0.8;
        if requirements.max_spot_price == 0.0 || ceiling < requirements.max_spot_price {
            requirements.max_spot_price = ceiling;
        }
        if decision.cost_analysis.savings_percent > 30.0 {
            requirements.prefer_spot = true;
        }
    }

    // Long on-premise queues make the job urgent: favor reliability.
    if decision.performance.onpremise_wait_minutes > 60 {
        requirements.allow_mixed_pricing = true;
        requirements.prefer_spot = false;
    }

    debug!(
        job_id = %job.job_id,
        max_spot_price = requirements.max_spot_price,
        prefer_spot = requirements.prefer_spot,
        allow_mixed = requirements.allow_mixed_pricing,
        "applied advisor decision"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use burst_model::ResourceEnvelope;

    fn four_node_job() -> Job {
        Job {
            job_id: "77".to_string(),
            resources: ResourceEnvelope {
                nodes: 4,
                cpus_per_node: 8,
                memory_mb: 16384,
                ..ResourceEnvelope::default()
            },
            ..Job::default()
        }
    }

    #[test]
    fn cost_analysis_sets_a_discounted_ceiling() {
        let decision = AdvisorDecision {
            should_provision: true,
            cost_analysis: CostAnalysis {
                cloud_cost: 4.0,
                savings_percent: 50.0,
                ..CostAnalysis::default()
            },
            ..AdvisorDecision::default()
        };
        let job = four_node_job();
        let mut requirements = InstanceRequirements::default();

        apply_decision(&decision, &job, &mut requirements);
        // 4.0 / 4 nodes × 0.8 buffer.
        assert!((requirements.max_spot_price - 0.8).abs() < 1e-9);
        assert!(requirements.prefer_spot);
    }

    #[test]
    fn lower_existing_ceiling_is_kept() {
        let decision = AdvisorDecision {
            cost_analysis: CostAnalysis {
                cloud_cost: 40.0,
                ..CostAnalysis::default()
            },
            ..AdvisorDecision::default()
        };
        let job = four_node_job();
        let mut requirements = InstanceRequirements {
            max_spot_price: 0.5,
            ..InstanceRequirements::default()
        };

        apply_decision(&decision, &job, &mut requirements);
        assert_eq!(requirements.max_spot_price, 0.5);
    }

    #[test]
    fn urgent_jobs_drop_spot_preference() {
        let decision = AdvisorDecision {
            performance: PerformanceOutlook {
                onpremise_wait_minutes: 120,
                ..PerformanceOutlook::default()
            },
            ..AdvisorDecision::default()
        };
        let job = four_node_job();
        let mut requirements = InstanceRequirements {
            prefer_spot: true,
            ..InstanceRequirements::default()
        };

        apply_decision(&decision, &job, &mut requirements);
        assert!(!requirements.prefer_spot);
        assert!(requirements.allow_mixed_pricing);
    }

    #[test]
    fn modest_savings_do_not_force_spot() {
        let decision = AdvisorDecision {
            cost_analysis: CostAnalysis {
                cloud_cost: 4.0,
                savings_percent: 10.0,
                ..CostAnalysis::default()
            },
            ..AdvisorDecision::default()
        };
        let job = four_node_job();
        let mut requirements = InstanceRequirements::default();

        apply_decision(&decision, &job, &mut requirements);
        assert!(!requirements.prefer_spot);
    }

    #[test]
    fn decision_deserializes_with_defaults() {
        let decision: AdvisorDecision =
            serde_json::from_str(r#"{"should_provision": true}"#).unwrap();
        assert!(decision.should_provision);
        assert_eq!(decision.confidence, 0.0);
        assert!(decision.decision_factors.is_empty());
    }

    #[tokio::test]
    async fn missing_command_is_unavailable() {
        let client = AdvisorClient::new(
            "/nonexistent/advisor-binary",
            "",
            Duration::from_millis(200),
        );
        assert!(!client.available().await);
    }
}
