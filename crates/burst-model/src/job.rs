//! Scheduler-side view of a job and its resource envelope.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Network topology a workload asks for across its nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// Co-located on the densest interconnect available.
    Cluster,
    /// Spread across failure domains.
    Spread,
    /// Grouped into partitions with intra-partition locality.
    Partition,
    /// No topology requirement.
    #[default]
    Any,
}

/// Resource envelope requested by a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResourceEnvelope {
    pub nodes: u32,
    pub cpus_per_node: u32,
    pub memory_mb: u64,
    #[serde(default)]
    pub gpus: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_type: Option<String>,
    #[serde(default)]
    pub local_storage_gb: u32,
}

/// Scheduling constraints carried on the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JobConstraints {
    /// Feature tokens (`fabric-required`, `no-fabric`, ...).
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub exclude_nodes: Vec<String>,
    #[serde(default)]
    pub required_nodes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub max_spot_price: f64,
}

/// A job as retrieved from the scheduler (or defaulted when no job can be
/// found for the requested nodes).
///
/// Constructed once, mutated only by the analyzer (which fills in the
/// derived classification fields), read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Job {
    pub job_id: String,
    pub name: String,
    pub partition: String,
    #[serde(default)]
    pub node_list: Vec<String>,
    pub resources: ResourceEnvelope,
    #[serde(default)]
    pub constraints: JobConstraints,
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Wall-clock limit in minutes; 0 when the scheduler did not report one.
    #[serde(default)]
    pub time_limit_minutes: u64,

    // Derived by the analyzer.
    #[serde(default)]
    pub tightly_coupled: bool,
    #[serde(default)]
    pub process_count: u32,
    #[serde(default)]
    pub topology: Topology,
}

impl Job {
    /// Minimal default job for a set of nodes when the scheduler has no
    /// job record to hand out. CPUs default to 4 per node.
    pub fn default_for_nodes(nodes: &[String]) -> Self {
        Job {
            job_id: "unknown".to_string(),
            name: "unknown".to_string(),
            node_list: nodes.to_vec(),
            resources: ResourceEnvelope {
                nodes: nodes.len() as u32,
                cpus_per_node: 4,
                memory_mb: 8192,
                ..ResourceEnvelope::default()
            },
            ..Job::default()
        }
    }

    /// Whether a feature token is present (case-insensitive).
    pub fn has_feature(&self, token: &str) -> bool {
        self.constraints
            .features
            .iter()
            .any(|f| f.eq_ignore_ascii_case(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_job_fills_node_count_and_cpus() {
        let nodes = vec!["cloud-cpu-001".to_string(), "cloud-cpu-002".to_string()];
        let job = Job::default_for_nodes(&nodes);
        assert_eq!(job.resources.nodes, 2);
        assert_eq!(job.resources.cpus_per_node, 4);
        assert_eq!(job.node_list, nodes);
        assert!(!job.tightly_coupled);
    }

    #[test]
    fn feature_lookup_ignores_case() {
        let mut job = Job::default_for_nodes(&["a-b-001".to_string()]);
        job.constraints.features = vec!["Fabric-Required".to_string()];
        assert!(job.has_feature("fabric-required"));
        assert!(!job.has_feature("no-fabric"));
    }

    #[test]
    fn topology_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Topology::Cluster).unwrap(),
            "\"cluster\""
        );
        let t: Topology = serde_json::from_str("\"spread\"").unwrap();
        assert_eq!(t, Topology::Spread);
    }
}
