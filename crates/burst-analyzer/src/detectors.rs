//! Tight-coupling detectors.
//!
//! Four independent heuristics, each returning a positive/negative verdict
//! with a confidence in [0, 1] and the topology it would ask for. They are
//! plain functions folded by maximum confidence — no dispatch machinery.

use burst_model::{Job, Topology};
use regex::Regex;

pub const CONFIDENCE_HIGH: f64 = 0.9;
pub const CONFIDENCE_MEDIUM: f64 = 0.6;
pub const CONFIDENCE_LOW: f64 = 0.3;

/// Outcome of one detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub positive: bool,
    pub confidence: f64,
    pub topology: Topology,
}

impl Detection {
    fn negative() -> Self {
        Detection {
            positive: false,
            confidence: 0.0,
            topology: Topology::Any,
        }
    }
}

/// All detectors in evaluation order, with their names for logging.
pub const DETECTORS: &[(&str, fn(&Job) -> Detection)] = &[
    ("task-count", task_count),
    ("script-content", script_content),
    ("known-application", known_application),
    ("environment", environment),
];

/// Task-count heuristic: more tasks than nodes, but no more than the
/// total CPU budget, points at a communicating parallel launch.
fn task_count(job: &Job) -> Detection {
    let nodes = job.resources.nodes;
    let total_cpus = nodes.saturating_mul(job.resources.cpus_per_node);

    let tasks = match extract_task_count(job) {
        Some(n) => n,
        None => return Detection::negative(),
    };

    if tasks > nodes && tasks <= total_cpus {
        let topology = if nodes >= 4 { Topology::Cluster } else { Topology::Any };
        return Detection {
            positive: true,
            confidence: CONFIDENCE_HIGH,
            topology,
        };
    }
    if tasks == nodes {
        // One task per node, likely an array of independent steps.
        return Detection {
            positive: false,
            confidence: 0.1,
            topology: Topology::Any,
        };
    }
    Detection::negative()
}

/// Pull a declared task count from batch directives or the environment.
fn extract_task_count(job: &Job) -> Option<u32> {
    let patterns = [r"#SBATCH\s+--ntasks[=\s](\d+)", r"#SBATCH\s+-n[=\s](\d+)"];
    for pattern in patterns {
        let re = Regex::new(pattern).expect("task-count pattern is valid");
        if let Some(caps) = re.captures(&job.script) {
            if let Ok(n) = caps[1].parse() {
                return Some(n);
            }
        }
    }
    job.environment
        .get("SLURM_NTASKS")
        .and_then(|v| v.parse().ok())
}

/// Script-content heuristic: parallel-launcher invocations and parallel
/// API headers are high confidence; runtime mentions are medium.
fn script_content(job: &Job) -> Detection {
    if job.script.is_empty() {
        return Detection::negative();
    }
    let script = job.script.to_lowercase();

    let high = [
        "mpirun",
        "mpiexec",
        r"srun.*-n\s+\d+",
        r"#include.*<mpi\.h>",
        "mpi_init",
        "mpi_finalize",
    ];
    for pattern in high {
        let re = Regex::new(pattern).expect("script pattern is valid");
        if re.is_match(&script) {
            return Detection {
                positive: true,
                confidence: CONFIDENCE_HIGH,
                topology: Topology::Cluster,
            };
        }
    }

    let medium = ["openmpi", "mpich", r"intel.*mpi", r"parallel.*computation"];
    for pattern in medium {
        let re = Regex::new(pattern).expect("script pattern is valid");
        if re.is_match(&script) {
            return Detection {
                positive: true,
                confidence: CONFIDENCE_MEDIUM,
                topology: Topology::Cluster,
            };
        }
    }

    Detection::negative()
}

/// Known parallel application codes with fixed per-entry confidence.
const KNOWN_APPLICATIONS: &[(&str, f64)] = &[
    ("gromacs", CONFIDENCE_HIGH),
    ("lammps", CONFIDENCE_HIGH),
    ("namd", CONFIDENCE_HIGH),
    ("quantum", CONFIDENCE_HIGH),
    ("espresso", CONFIDENCE_HIGH),
    ("abinit", CONFIDENCE_HIGH),
    ("vasp", CONFIDENCE_HIGH),
    ("amber", CONFIDENCE_MEDIUM),
    ("blast", CONFIDENCE_LOW),
];

/// Membership test of the job name and script against the domain-code table.
fn known_application(job: &Job) -> Detection {
    let script = job.script.to_lowercase();
    let name = job.name.to_lowercase();

    for (app, confidence) in KNOWN_APPLICATIONS {
        if script.contains(app) || name.contains(app) {
            return Detection {
                positive: true,
                confidence: *confidence,
                topology: Topology::Cluster,
            };
        }
    }
    Detection::negative()
}

/// Environment variables whose prefixes betray a parallel runtime.
const RUNTIME_ENV_PREFIXES: &[&str] = &["OMPI_", "MPI_", "I_MPI_", "MPICH_"];

fn environment(job: &Job) -> Detection {
    for key in job.environment.keys() {
        if RUNTIME_ENV_PREFIXES.iter().any(|p| key.starts_with(p)) {
            return Detection {
                positive: true,
                confidence: CONFIDENCE_MEDIUM,
                topology: Topology::Cluster,
            };
        }
    }
    Detection::negative()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burst_model::ResourceEnvelope;

    fn job_with_script(script: &str, nodes: u32, cpus: u32) -> Job {
        Job {
            script: script.to_string(),
            resources: ResourceEnvelope {
                nodes,
                cpus_per_node: cpus,
                memory_mb: 8192,
                ..ResourceEnvelope::default()
            },
            ..Job::default()
        }
    }

    #[test]
    fn task_count_flags_oversubscribed_nodes() {
        let job = job_with_script("#SBATCH --ntasks=32\n./solver", 8, 8);
        let d = task_count(&job);
        assert!(d.positive);
        assert_eq!(d.confidence, CONFIDENCE_HIGH);
        assert_eq!(d.topology, Topology::Cluster);
    }

    #[test]
    fn task_count_one_per_node_is_negative() {
        let job = job_with_script("#SBATCH --ntasks=8\n./solver", 8, 8);
        let d = task_count(&job);
        assert!(!d.positive);
        assert_eq!(d.confidence, 0.1);
    }

    #[test]
    fn task_count_reads_environment_fallback() {
        let mut job = job_with_script("./solver", 4, 8);
        job.environment
            .insert("SLURM_NTASKS".to_string(), "16".to_string());
        assert!(task_count(&job).positive);
    }

    #[test]
    fn task_count_ignores_counts_beyond_cpu_budget() {
        let job = job_with_script("#SBATCH --ntasks=1000\n./solver", 4, 8);
        assert!(!task_count(&job).positive);
    }

    #[test]
    fn script_content_spots_parallel_launchers() {
        let job = job_with_script("mpirun -np 512 ./climate", 32, 16);
        let d = script_content(&job);
        assert!(d.positive);
        assert_eq!(d.confidence, CONFIDENCE_HIGH);
    }

    #[test]
    fn script_content_spots_api_headers() {
        let job = job_with_script("#include <mpi.h>\nint main()", 2, 4);
        assert!(script_content(&job).positive);
    }

    #[test]
    fn script_content_runtime_mentions_are_medium() {
        let job = job_with_script("module load openmpi/4.1\n./app", 4, 8);
        let d = script_content(&job);
        assert!(d.positive);
        assert_eq!(d.confidence, CONFIDENCE_MEDIUM);
    }

    #[test]
    fn script_content_plain_script_is_negative() {
        let job = job_with_script("./run.sh $TASK_ID", 8, 4);
        assert!(!script_content(&job).positive);
    }

    #[test]
    fn known_application_matches_job_name() {
        let mut job = job_with_script("./md_production", 4, 8);
        job.name = "gromacs-equilibration".to_string();
        let d = known_application(&job);
        assert!(d.positive);
        assert_eq!(d.confidence, CONFIDENCE_HIGH);
    }

    #[test]
    fn known_application_low_confidence_entries() {
        let job = job_with_script("blastn -query seqs.fa", 2, 4);
        let d = known_application(&job);
        assert!(d.positive);
        assert_eq!(d.confidence, CONFIDENCE_LOW);
    }

    #[test]
    fn environment_prefixes_are_medium_confidence() {
        let mut job = job_with_script("./app", 4, 8);
        job.environment
            .insert("OMPI_MCA_btl".to_string(), "tcp".to_string());
        let d = environment(&job);
        assert!(d.positive);
        assert_eq!(d.confidence, CONFIDENCE_MEDIUM);
    }

    #[test]
    fn environment_unrelated_vars_are_negative() {
        let mut job = job_with_script("./app", 4, 8);
        job.environment
            .insert("HOME".to_string(), "/home/u".to_string());
        assert!(!environment(&job).positive);
    }
}
