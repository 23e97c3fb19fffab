//! Performance-report types for the post-job export path.
//!
//! A completed job's actual execution record is exported for the advisor's
//! learning loop and for institutional cost reconciliation. The engine only
//! reports; nothing here feeds back into provisioning decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Complete performance record for one finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PerformanceReport {
    pub job: JobRecord,
    #[serde(default)]
    pub prediction: PredictionValidation,
    #[serde(default)]
    pub cloud: CloudMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<ParallelEfficiency>,
    #[serde(default)]
    pub cost: CostBreakdown,
    #[serde(default)]
    pub context: ExportContext,
}

/// Who ran what, and what actually happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JobRecord {
    pub job_id: String,
    #[serde(default)]
    pub job_name: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub partition: String,
    #[serde(default)]
    pub instance_types_used: Vec<String>,
    #[serde(default)]
    pub node_count: u32,
    #[serde(default)]
    pub duration_hours: f64,
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// How close the advisor's prediction came to reality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PredictionValidation {
    pub cost_accuracy: f64,
    pub runtime_accuracy: f64,
    pub instance_type_optimal: bool,
    pub overall_accuracy_score: f64,
}

/// Cloud-side metrics observed during the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CloudMetrics {
    pub fabric_utilization: f64,
    pub placement_group_effectiveness: f64,
    pub spot_interruptions: u32,
    pub cpu_utilization: f64,
    pub memory_utilization: f64,
    pub provisioning_seconds: u64,
    #[serde(default)]
    pub availability_zones: Vec<String>,
}

/// Parallel-efficiency block, present only for tightly coupled jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ParallelEfficiency {
    pub communication_overhead: f64,
    pub scaling_efficiency: f64,
    pub load_balance: f64,
}

/// Cost breakdown in USD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CostBreakdown {
    pub compute_cost_usd: f64,
    pub storage_cost_usd: f64,
    pub network_cost_usd: f64,
    pub total_cost_usd: f64,
    pub spot_savings_usd: f64,
}

/// Environment the export ran in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExportContext {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub engine_version: String,
    #[serde(default)]
    pub execution_mode: String,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

impl PerformanceReport {
    /// Strip identifying fields for institutional sharing.
    pub fn anonymize(&mut self) {
        self.job.user_id = "anonymous".to_string();
        self.job.project_id = "anonymized".to_string();
        self.context.environment.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymize_strips_identity() {
        let mut report = PerformanceReport {
            job: JobRecord {
                job_id: "42".into(),
                user_id: "alice".into(),
                project_id: "NSF-ABC123".into(),
                ..JobRecord::default()
            },
            ..PerformanceReport::default()
        };
        report
            .context
            .environment
            .insert("HOME".into(), "/home/alice".into());

        report.anonymize();
        assert_eq!(report.job.user_id, "anonymous");
        assert_eq!(report.job.project_id, "anonymized");
        assert!(report.context.environment.is_empty());
        assert_eq!(report.job.job_id, "42");
    }

    #[test]
    fn report_round_trips_through_json() {
        let report = PerformanceReport {
            job: JobRecord {
                job_id: "7".into(),
                node_count: 4,
                duration_hours: 2.0,
                success: true,
                instance_types_used: vec!["c5n.xlarge".into()],
                ..JobRecord::default()
            },
            parallel: Some(ParallelEfficiency {
                scaling_efficiency: 0.87,
                ..ParallelEfficiency::default()
            }),
            ..PerformanceReport::default()
        };
        let text = serde_json::to_string_pretty(&report).unwrap();
        let decoded: PerformanceReport = serde_json::from_str(&text).unwrap();
        assert_eq!(report, decoded);
    }
}
