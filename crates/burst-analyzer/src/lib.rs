//! Job analyzer — classifies a job and derives instance requirements.
//!
//! Classification folds four independent detectors by maximum confidence;
//! a job is tightly coupled when the best detector clears 0.5. Fabric
//! demand, instance-family preference, and placement strategy follow from
//! the classification and the job's resource envelope.

pub mod detectors;

use burst_model::{
    catalog, FabricDemand, InstanceRequirements, Job, PlacementStrategy, Topology,
};
use thiserror::Error;
use tracing::{debug, info};

use detectors::DETECTORS;

/// Errors from job classification.
#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("job requests no nodes")]
    NoNodes,

    #[error("invalid resource envelope: {0}")]
    InvalidResources(String),
}

pub type AnalyzerResult<T> = Result<T, ClassificationError>;

/// Tunable thresholds, sourced from the pricing feature toggles.
#[derive(Debug, Clone)]
pub struct AnalyzerThresholds {
    /// Demand policy for tight jobs without an explicit token:
    /// `Required` and `Disabled` are absolute; `Preferred`/`Optional`
    /// defer to the scale-based chain.
    pub fabric_default: FabricDemand,
    /// Node count at which HPC families lead the preference list.
    pub hpc_family_threshold: u32,
    /// Node count at which a placement group is requested.
    pub placement_group_threshold: u32,
    pub enhanced_networking: bool,
}

impl Default for AnalyzerThresholds {
    fn default() -> Self {
        AnalyzerThresholds {
            fabric_default: FabricDemand::Preferred,
            hpc_family_threshold: 8,
            placement_group_threshold: 2,
            enhanced_networking: true,
        }
    }
}

/// How provisioning input reaches the engine: a job to analyze, or an
/// externally supplied plan that is authoritative as-is.
#[derive(Debug, Clone)]
pub enum ProvisioningInput {
    Analyzed(Job),
    Supplied(burst_model::ExecutionPlan),
}

/// The analyzer.
#[derive(Debug, Clone, Default)]
pub struct JobAnalyzer {
    thresholds: AnalyzerThresholds,
}

impl JobAnalyzer {
    pub fn new(thresholds: AnalyzerThresholds) -> Self {
        JobAnalyzer { thresholds }
    }

    /// Resolve either input arm to instance requirements. Downstream code
    /// consumes only the requirements.
    pub fn resolve(&self, input: ProvisioningInput) -> AnalyzerResult<InstanceRequirements> {
        match input {
            ProvisioningInput::Supplied(plan) => Ok(InstanceRequirements::from_plan(&plan)),
            ProvisioningInput::Analyzed(mut job) => self.analyze(&mut job),
        }
    }

    /// Classify a job and derive its instance requirements.
    ///
    /// Fills the job's derived fields (`tightly_coupled`, `process_count`,
    /// `topology`) as a side effect; the job is read-only afterwards.
    pub fn analyze(&self, job: &mut Job) -> AnalyzerResult<InstanceRequirements> {
        if job.resources.nodes == 0 {
            job.resources.nodes = job.node_list.len() as u32;
        }
        if job.resources.nodes == 0 {
            return Err(ClassificationError::NoNodes);
        }
        if job.resources.cpus_per_node == 0 {
            job.resources.cpus_per_node = 4;
        }

        let mut max_confidence = 0.0_f64;
        let mut topology = Topology::Any;
        for (name, detect) in DETECTORS {
            let d = detect(job);
            debug!(
                detector = name,
                positive = d.positive,
                confidence = d.confidence,
                "detector result"
            );
            if d.positive && d.confidence > max_confidence {
                max_confidence = d.confidence;
                topology = d.topology;
            }
        }

        job.tightly_coupled = max_confidence > 0.5;
        job.topology = topology;
        if job.tightly_coupled {
            // One process per CPU unless the script said otherwise.
            job.process_count = job.resources.nodes * job.resources.cpus_per_node;
        }

        let fabric = self.fabric_demand(job);
        let requirements = InstanceRequirements {
            min_cpus: job.resources.cpus_per_node,
            min_memory_mb: job.resources.memory_mb,
            gpus: job.resources.gpus,
            gpu_type: job.resources.gpu_type.clone(),
            fabric,
            topology: job.topology,
            placement_strategy: self.placement_strategy(job),
            instance_families: self.select_families(job, fabric),
            exclude_instances: job.constraints.exclude_nodes.clone(),
            hpc_optimized: job.tightly_coupled && self.prefers_hpc_families(job),
            enhanced_networking: job.tightly_coupled && self.thresholds.enhanced_networking,
            max_spot_price: job.constraints.max_spot_price,
            prefer_spot: job.constraints.max_spot_price > 0.0,
            allow_mixed_pricing: false,
            tightly_coupled: job.tightly_coupled,
            process_count: job.process_count,
        };

        if job.tightly_coupled {
            info!(
                job_id = %job.job_id,
                confidence = max_confidence,
                topology = ?job.topology,
                processes = job.process_count,
                fabric = ?fabric,
                "job classified as tightly coupled"
            );
        }

        Ok(requirements)
    }

    /// Fabric demand: explicit tokens first, then the configured policy,
    /// then scale-based thresholds. A `fabric-preferred` token can still
    /// be upgraded to required at large scale.
    fn fabric_demand(&self, job: &Job) -> FabricDemand {
        if job.has_feature("fabric-required") || job.has_feature("fabric") {
            return FabricDemand::Required;
        }
        if job.has_feature("no-fabric") || job.has_feature("fabric-disabled") {
            return FabricDemand::Disabled;
        }
        if job.has_feature("fabric-preferred") {
            return if self.scale_demand(job) == FabricDemand::Required {
                FabricDemand::Required
            } else {
                FabricDemand::Preferred
            };
        }

        if !job.tightly_coupled {
            return FabricDemand::Disabled;
        }
        match self.thresholds.fabric_default {
            FabricDemand::Required => FabricDemand::Required,
            FabricDemand::Disabled => FabricDemand::Disabled,
            _ => self.scale_demand(job),
        }
    }

    /// The scale-based demand chain.
    fn scale_demand(&self, job: &Job) -> FabricDemand {
        let nodes = job.resources.nodes;
        let processes = job.process_count;
        if nodes >= 16 || processes >= 64 {
            FabricDemand::Required
        } else if nodes >= 4 || processes >= 16 {
            FabricDemand::Preferred
        } else if nodes >= 2 {
            FabricDemand::Optional
        } else {
            FabricDemand::Disabled
        }
    }

    /// Placement strategy follows the job topology; single-node jobs get
    /// no placement group.
    fn placement_strategy(&self, job: &Job) -> Option<PlacementStrategy> {
        if job.resources.nodes < self.thresholds.placement_group_threshold {
            return None;
        }
        PlacementStrategy::from_topology(job.topology)
    }

    /// Ordered instance-family preference list.
    fn select_families(&self, job: &Job, fabric: FabricDemand) -> Vec<String> {
        let mut families: Vec<String> = Vec::new();

        if matches!(fabric, FabricDemand::Required | FabricDemand::Preferred) {
            if job.resources.nodes >= self.thresholds.hpc_family_threshold {
                families.extend(catalog::HPC_FAMILIES.iter().map(|f| f.name.to_string()));
            }
            let memory_per_cpu = job.resources.memory_mb / u64::from(job.resources.cpus_per_node);
            if memory_per_cpu <= 4096 {
                families.extend(
                    catalog::COMPUTE_FABRIC_FAMILIES
                        .iter()
                        .map(|f| f.name.to_string()),
                );
            } else {
                families.extend(
                    catalog::MEMORY_FABRIC_FAMILIES
                        .iter()
                        .map(|f| f.name.to_string()),
                );
            }
        } else {
            families.extend(catalog::GENERAL_FAMILIES.iter().map(|s| s.to_string()));
        }

        if job.resources.gpus > 0 {
            let mut with_gpus: Vec<String> = catalog::ACCELERATOR_FAMILIES
                .iter()
                .map(|s| s.to_string())
                .collect();
            with_gpus.extend(families);
            families = with_gpus;
        }

        families
    }

    fn prefers_hpc_families(&self, job: &Job) -> bool {
        if job.resources.nodes >= self.thresholds.hpc_family_threshold {
            return true;
        }
        detectors::DETECTORS
            .iter()
            .find(|(name, _)| *name == "known-application")
            .map(|(_, detect)| detect(job).positive)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burst_model::ResourceEnvelope;
    use std::collections::HashMap;

    fn make_job(script: &str, nodes: u32, cpus: u32, memory_mb: u64) -> Job {
        Job {
            job_id: "1001".to_string(),
            name: "test-job".to_string(),
            partition: "cloud".to_string(),
            script: script.to_string(),
            resources: ResourceEnvelope {
                nodes,
                cpus_per_node: cpus,
                memory_mb,
                ..ResourceEnvelope::default()
            },
            ..Job::default()
        }
    }

    #[test]
    fn climate_job_classified_tight_with_hpc_families() {
        // 32 nodes, explicit fabric token, parallel launcher in the script.
        let mut job = make_job("mpirun -np 512 ./climate-model", 32, 16, 65536);
        job.name = "climate-model".to_string();
        job.constraints.features = vec!["fabric-required".to_string()];

        let analyzer = JobAnalyzer::default();
        let req = analyzer.analyze(&mut job).unwrap();

        assert!(job.tightly_coupled);
        assert_eq!(req.fabric, FabricDemand::Required);
        assert!(req.instance_families.iter().any(|f| f == "hpc7a"));
        assert_eq!(req.placement_strategy, Some(PlacementStrategy::Cluster));
        assert!(req.requires_gang());
        assert_eq!(req.process_count, 512);
        assert!(req.hpc_optimized);
    }

    #[test]
    fn independent_job_gets_no_fabric_no_placement() {
        let mut job = make_job("./run.sh $TASK_ID", 8, 4, 8192);
        let analyzer = JobAnalyzer::default();
        let req = analyzer.analyze(&mut job).unwrap();

        assert!(!job.tightly_coupled);
        assert_eq!(req.fabric, FabricDemand::Disabled);
        assert_eq!(req.placement_strategy, None);
        assert!(!req.requires_gang());
        assert!(req.instance_families.iter().any(|f| f == "c6i"));
        assert!(!req.hpc_optimized);
    }

    #[test]
    fn tight_jobs_always_have_families() {
        for nodes in [2u32, 4, 8, 16, 32] {
            let mut job = make_job("mpirun ./app", nodes, 8, 16384);
            let req = JobAnalyzer::default().analyze(&mut job).unwrap();
            assert!(job.tightly_coupled);
            assert!(!req.instance_families.is_empty());
            if nodes >= 2 {
                assert!(req.placement_strategy.is_some());
            }
            if nodes >= 16 {
                assert_eq!(req.fabric, FabricDemand::Required);
            }
        }
    }

    #[test]
    fn single_node_no_fabric_token() {
        let mut job = make_job("mpirun ./app", 1, 8, 8192);
        job.constraints.features = vec!["no-fabric".to_string()];
        let req = JobAnalyzer::default().analyze(&mut job).unwrap();
        assert_eq!(req.fabric, FabricDemand::Disabled);
        assert_eq!(req.placement_strategy, None);
    }

    #[test]
    fn two_nodes_fabric_preferred_token() {
        let mut job = make_job("mpirun ./app", 2, 8, 8192);
        job.constraints.features = vec!["fabric-preferred".to_string()];
        let req = JobAnalyzer::default().analyze(&mut job).unwrap();
        assert_eq!(req.fabric, FabricDemand::Preferred);
        assert!(req.placement_strategy.is_some());
    }

    #[test]
    fn sixteen_nodes_upgrades_preferred_to_required() {
        let mut job = make_job("mpirun ./app", 16, 8, 8192);
        job.constraints.features = vec!["fabric-preferred".to_string()];
        let req = JobAnalyzer::default().analyze(&mut job).unwrap();
        assert_eq!(req.fabric, FabricDemand::Required);
    }

    #[test]
    fn hpc_preference_follows_scale_and_known_codes() {
        // Scale alone flips the preference for a large tight job.
        let mut large = make_job("mpirun ./app", 32, 16, 65536);
        let req = JobAnalyzer::default().analyze(&mut large).unwrap();
        assert!(req.hpc_optimized);

        // A small job running a known domain code also prefers HPC shapes.
        let mut known = make_job("mpirun gmx_mpi mdrun -deffnm prod", 4, 8, 16384);
        known.name = "gromacs-production".to_string();
        let req = JobAnalyzer::default().analyze(&mut known).unwrap();
        assert!(req.hpc_optimized);

        // A small independent job does not.
        let mut small = make_job("./run.sh $TASK_ID", 2, 4, 8192);
        let req = JobAnalyzer::default().analyze(&mut small).unwrap();
        assert!(!req.hpc_optimized);
    }

    #[test]
    fn memory_bound_jobs_get_memory_families() {
        // 8 GiB per CPU — above the 4 GiB per-CPU pivot.
        let mut job = make_job("mpirun ./app", 4, 4, 32768);
        let req = JobAnalyzer::default().analyze(&mut job).unwrap();
        assert!(req.instance_families.iter().any(|f| f == "r6i"));
        assert!(!req.instance_families.iter().any(|f| f == "c6in"));
    }

    #[test]
    fn cpu_bound_jobs_get_compute_families() {
        // 2 GiB per CPU.
        let mut job = make_job("mpirun ./app", 4, 8, 16384);
        let req = JobAnalyzer::default().analyze(&mut job).unwrap();
        assert!(req.instance_families.iter().any(|f| f == "c6in"));
    }

    #[test]
    fn gpu_jobs_lead_with_accelerator_families() {
        let mut job = make_job("python train.py", 2, 8, 16384);
        job.resources.gpus = 4;
        let req = JobAnalyzer::default().analyze(&mut job).unwrap();
        assert_eq!(req.instance_families[0], "p4d");
    }

    #[test]
    fn missing_cpus_defaults_to_four() {
        let mut job = make_job("./app", 4, 0, 8192);
        JobAnalyzer::default().analyze(&mut job).unwrap();
        assert_eq!(job.resources.cpus_per_node, 4);
    }

    #[test]
    fn zero_nodes_is_a_classification_error() {
        let mut job = make_job("./app", 0, 4, 8192);
        let err = JobAnalyzer::default().analyze(&mut job).unwrap_err();
        assert!(matches!(err, ClassificationError::NoNodes));
    }

    #[test]
    fn node_list_backfills_node_count() {
        let mut job = make_job("./app", 0, 4, 8192);
        job.node_list = vec!["cloud-cpu-001".into(), "cloud-cpu-002".into()];
        JobAnalyzer::default().analyze(&mut job).unwrap();
        assert_eq!(job.resources.nodes, 2);
    }

    #[test]
    fn supplied_plan_wins_over_analysis() {
        use burst_model::{ExecutionPlan, PricingMode};

        let mut plan = ExecutionPlan {
            should_provision: true,
            ..ExecutionPlan::default()
        };
        plan.instances.instance_types = vec!["hpc7a.2xlarge".to_string()];
        plan.instances.pricing_mode = PricingMode::OnDemand;
        plan.instances.subnet_ids = vec!["subnet-a".to_string()];
        plan.parallel.is_tight = true;
        plan.parallel.requires_gang = true;
        plan.parallel.fabric_required = true;
        plan.network.placement_strategy = Some(PlacementStrategy::Cluster);

        let analyzer = JobAnalyzer::default();
        let req = analyzer
            .resolve(ProvisioningInput::Supplied(plan))
            .unwrap();

        assert!(req.requires_gang());
        assert_eq!(req.instance_families, vec!["hpc7a.2xlarge"]);
        assert_eq!(req.placement_strategy, Some(PlacementStrategy::Cluster));
    }

    #[test]
    fn environment_detection_alone_is_tight() {
        let mut job = make_job("./app", 4, 8, 8192);
        let mut env = HashMap::new();
        env.insert("I_MPI_FABRICS".to_string(), "shm:ofi".to_string());
        job.environment = env;
        let req = JobAnalyzer::default().analyze(&mut job).unwrap();
        assert!(job.tightly_coupled);
        assert!(req.tightly_coupled);
    }
}
