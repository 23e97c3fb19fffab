//! Scheduler CLI client.
//!
//! All scheduler access goes through its own command-line tools, which
//! the engine treats as authoritative: `scontrol show hostnames` for
//! hostlist expansion, `scontrol update` for node mutations, `scontrol
//! show node -o` for state snapshots, and `squeue`/`scontrol show job`
//! for job discovery.

use std::collections::BTreeMap;

use regex::Regex;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use burst_config::SchedulerConfig;
use burst_model::{InstanceBinding, Job, ResourceEnvelope};

use crate::error::{SlurmError, SlurmResult};

/// Snapshot of one node's compound state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStateView {
    pub node_name: String,
    /// Raw compound state, e.g. `IDLE+CLOUD+POWER`.
    pub state: String,
    pub reason: Option<String>,
}

impl NodeStateView {
    /// The state split into its tokens.
    pub fn tokens(&self) -> Vec<&str> {
        if self.state.is_empty() {
            Vec::new()
        } else {
            self.state.split('+').collect()
        }
    }
}

/// The client.
#[derive(Debug, Clone)]
pub struct SlurmClient {
    bin_path: String,
}

impl SlurmClient {
    pub fn new(config: &SchedulerConfig) -> Self {
        SlurmClient {
            bin_path: config.bin_path.clone(),
        }
    }

    fn scontrol(&self) -> String {
        format!("{}scontrol", self.bin_path)
    }

    /// Expand a compact hostlist into individual node names.
    pub async fn expand_hostlist(&self, hostlist: &str) -> SlurmResult<Vec<String>> {
        let output = Command::new(self.scontrol())
            .args(["show", "hostnames", hostlist])
            .output()
            .await
            .map_err(|e| SlurmError::HostlistParse {
                hostlist: hostlist.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(SlurmError::HostlistParse {
                hostlist: hostlist.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let nodes = parse_hostnames_output(&String::from_utf8_lossy(&output.stdout));
        debug!(hostlist = %hostlist, count = nodes.len(), "expanded hostlist");
        Ok(nodes)
    }

    /// Whether the scheduler's tools respond at all.
    pub async fn available(&self) -> bool {
        Command::new(self.scontrol())
            .arg("--version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Update a node with `key=value` parameters.
    pub async fn update_node(&self, node: &str, parameters: &[(&str, &str)]) -> SlurmResult<()> {
        let mut command = Command::new(self.scontrol());
        command.arg("update").arg(format!("nodename={node}"));
        for (key, value) in parameters {
            command.arg(format!("{key}={value}"));
        }

        let output = command.output().await?;
        if !output.status.success() {
            return Err(SlurmError::SchedulerUpdate {
                node: node.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!(node = %node, "updated node");
        Ok(())
    }

    /// Push instance addresses to the scheduler, one node at a time.
    ///
    /// Per-node failures are logged and collected; the batch never
    /// aborts early. Returns the failed (node, message) pairs.
    pub async fn push_bindings(&self, bindings: &[InstanceBinding]) -> Vec<(String, String)> {
        let mut failures = Vec::new();
        for binding in bindings {
            let result = self
                .update_node(
                    &binding.node_name,
                    &[
                        ("NodeAddr", binding.private_ip.as_str()),
                        ("NodeHostname", binding.private_ip.as_str()),
                    ],
                )
                .await;
            match result {
                Ok(()) => info!(
                    node = %binding.node_name,
                    instance = %binding.instance_id,
                    address = %binding.private_ip,
                    "node bound to instance"
                ),
                Err(e) => {
                    error!(node = %binding.node_name, error = %e, "failed to update node");
                    failures.push((binding.node_name.clone(), e.to_string()));
                }
            }
        }
        failures
    }

    /// Read the compound state of a set of nodes.
    pub async fn node_states(&self, nodes: &[String]) -> SlurmResult<Vec<NodeStateView>> {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }

        let output = Command::new(self.scontrol())
            .args(["show", "node", &nodes.join(","), "-o"])
            .output()
            .await?;

        if !output.status.success() {
            return Err(SlurmError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(parse_node_state_output(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }

    /// Set a node's state, with an optional reason.
    pub async fn set_node_state(
        &self,
        node: &str,
        state: &str,
        reason: Option<&str>,
    ) -> SlurmResult<()> {
        let mut parameters = vec![("state", state)];
        if let Some(reason) = reason {
            parameters.push(("reason", reason));
        }
        self.update_node(node, &parameters).await?;
        info!(node = %node, state = %state, reason = reason.unwrap_or(""), "set node state");
        Ok(())
    }

    /// Find the job associated with a set of nodes and enrich it with
    /// its script where available.
    pub async fn job_for_nodes(&self, nodes: &[String]) -> SlurmResult<Job> {
        let output = Command::new(format!("{}squeue", self.bin_path))
            .args([
                "-w",
                &nodes.join(","),
                "-o",
                "%i,%j,%P,%D,%C,%m,%t,%S,%L",
                "--noheader",
            ])
            .output()
            .await?;

        if !output.status.success() {
            return Err(SlurmError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| SlurmError::Parse("no job found for nodes".to_string()))?;

        let mut job = parse_squeue_job(line, nodes)?;

        if let Ok(script) = self.job_script(&job.job_id).await {
            job.script = script;
            apply_script_directives(&mut job);
        }

        debug!(
            job_id = %job.job_id,
            name = %job.name,
            nodes = job.resources.nodes,
            cpus = job.resources.cpus_per_node,
            "retrieved job for nodes"
        );
        Ok(job)
    }

    /// Pull the submitted command out of `scontrol show job`.
    async fn job_script(&self, job_id: &str) -> SlurmResult<String> {
        let output = Command::new(self.scontrol())
            .args(["show", "job", job_id])
            .output()
            .await?;

        if !output.status.success() {
            return Err(SlurmError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            if let Some((_, command)) = line.split_once("Command=") {
                return Ok(command.trim().to_string());
            }
        }
        Err(SlurmError::Parse("job script not found".to_string()))
    }
}

/// Accounting-style overview of one job, from `scontrol show job`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobOverview {
    pub job_id: String,
    pub job_name: String,
    pub user: String,
    pub account: String,
    pub partition: String,
    pub state: String,
    pub node_count: u32,
    pub run_minutes: u64,
    pub comment: String,
}

impl SlurmClient {
    /// Read a job overview for the export path. Works for running and
    /// recently completed jobs while the scheduler still remembers them.
    pub async fn job_overview(&self, job_id: &str) -> SlurmResult<JobOverview> {
        let output = Command::new(self.scontrol())
            .args(["show", "job", job_id])
            .output()
            .await?;

        if !output.status.success() {
            return Err(SlurmError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let mut overview = parse_job_overview(&String::from_utf8_lossy(&output.stdout));
        if overview.job_id.is_empty() {
            overview.job_id = job_id.to_string();
        }
        Ok(overview)
    }
}

/// Parse `scontrol show job` output into an overview. Fields the
/// scheduler did not report stay at their defaults.
pub fn parse_job_overview(output: &str) -> JobOverview {
    let mut overview = JobOverview::default();
    for field in output.split_whitespace() {
        let Some((key, value)) = field.split_once('=') else {
            continue;
        };
        match key {
            "JobId" => overview.job_id = value.to_string(),
            "JobName" => overview.job_name = value.to_string(),
            // UserId comes as `name(uid)`.
            "UserId" => {
                overview.user = value.split('(').next().unwrap_or(value).to_string();
            }
            "Account" => overview.account = value.to_string(),
            "Partition" => overview.partition = value.to_string(),
            "JobState" => overview.state = value.to_string(),
            "NumNodes" => overview.node_count = value.parse().unwrap_or(0),
            "RunTime" => {
                overview.run_minutes = parse_wall_clock_minutes(value).unwrap_or(0);
            }
            "Comment" => overview.comment = value.to_string(),
            _ => {}
        }
    }
    overview
}

/// Parse `scontrol show hostnames` output: one name per line.
pub fn parse_hostnames_output(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Group node names by `(partition, node group)` using the
/// `{partition}-{nodegroup}-{id}` shape. Names that do not parse are
/// logged and skipped.
pub fn group_node_names(
    names: &[String],
) -> BTreeMap<String, BTreeMap<String, Vec<String>>> {
    let pattern =
        Regex::new(r"^([a-zA-Z0-9]+)-([a-zA-Z0-9]+)-([0-9]+)$").expect("node pattern is valid");
    let mut grouped: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();

    for name in names {
        match pattern.captures(name) {
            Some(caps) => {
                grouped
                    .entry(caps[1].to_string())
                    .or_default()
                    .entry(caps[2].to_string())
                    .or_default()
                    .push(name.clone());
            }
            None => warn!(node = %name, "invalid node name format, skipping"),
        }
    }
    grouped
}

/// Split one node name into `(partition, node group, id)`.
pub fn parse_node_name(name: &str) -> Option<(String, String, String)> {
    let pattern =
        Regex::new(r"^([a-zA-Z0-9]+)-([a-zA-Z0-9]+)-([0-9]+)$").expect("node pattern is valid");
    pattern
        .captures(name)
        .map(|caps| (caps[1].to_string(), caps[2].to_string(), caps[3].to_string()))
}

/// Parse `scontrol show node -o` output: one line per node with
/// `key=value` fields.
pub fn parse_node_state_output(output: &str) -> Vec<NodeStateView> {
    let mut nodes = Vec::new();
    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let mut view = NodeStateView {
            node_name: String::new(),
            state: String::new(),
            reason: None,
        };
        for field in line.split_whitespace() {
            if let Some((key, value)) = field.split_once('=') {
                match key {
                    "NodeName" => view.node_name = value.to_string(),
                    "State" => view.state = value.to_string(),
                    "Reason" => view.reason = Some(value.to_string()),
                    _ => {}
                }
            }
        }
        if !view.node_name.is_empty() {
            nodes.push(view);
        }
    }
    nodes
}

/// Parse one `squeue` line in the engine's field order:
/// `jobid,name,partition,nodes,cpus,memory,state,start,timelimit`.
pub fn parse_squeue_job(line: &str, nodes: &[String]) -> SlurmResult<Job> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 9 {
        return Err(SlurmError::Parse(format!(
            "unexpected squeue output: '{line}'"
        )));
    }

    let node_count: u32 = fields[3].parse().unwrap_or(0);
    let total_cpus: u32 = fields[4].parse().unwrap_or(0);
    let cpus_per_node = if node_count > 0 { total_cpus / node_count } else { 0 };

    Ok(Job {
        job_id: fields[0].to_string(),
        name: fields[1].to_string(),
        partition: fields[2].to_string(),
        node_list: nodes.to_vec(),
        resources: ResourceEnvelope {
            nodes: node_count,
            cpus_per_node,
            memory_mb: parse_memory_mb(fields[5]),
            ..ResourceEnvelope::default()
        },
        time_limit_minutes: parse_wall_clock_minutes(fields[8]).unwrap_or(0),
        ..Job::default()
    })
}

/// Fold batch directives from the job script into the job.
pub fn apply_script_directives(job: &mut Job) {
    if job.script.is_empty() {
        return;
    }

    let pattern = Regex::new(r"#SBATCH\s+--([a-zA-Z-]+)(?:[=\s]+(\S+))?")
        .expect("directive pattern is valid");
    let script = job.script.clone();

    for caps in pattern.captures_iter(&script) {
        let directive = &caps[1];
        let value = caps.get(2).map(|m| m.as_str()).unwrap_or("");

        match directive {
            "constraint" => {
                if !value.is_empty() {
                    job.constraints.features =
                        value.split('&').map(str::to_string).collect();
                }
            }
            "exclude" => {
                if !value.is_empty() {
                    job.constraints.exclude_nodes =
                        value.split(',').map(str::to_string).collect();
                }
            }
            "mem" | "mem-per-node" => {
                let memory = parse_memory_mb(value);
                if memory > 0 {
                    job.resources.memory_mb = memory;
                }
            }
            "gres" => {
                if value.contains("gpu") {
                    let parts: Vec<&str> = value.split(':').collect();
                    if let Some(count) = parts.last().and_then(|p| p.parse().ok()) {
                        job.resources.gpus = count;
                    }
                    if parts.len() >= 3 {
                        job.resources.gpu_type = Some(parts[1].to_string());
                    }
                }
            }
            "time" => {
                if let Some(minutes) = parse_wall_clock_minutes(value) {
                    job.time_limit_minutes = minutes;
                }
            }
            _ => {}
        }
    }
}

/// Parse a memory amount like `16GB`, `2048M`, `4096` into MiB.
pub fn parse_memory_mb(text: &str) -> u64 {
    let text = text.trim().to_uppercase();
    if text.is_empty() {
        return 0;
    }

    let pattern = Regex::new(r"^(\d+)([KMGT]?B?)").expect("memory pattern is valid");
    let Some(caps) = pattern.captures(&text) else {
        return 0;
    };
    let Ok(value) = caps[1].parse::<u64>() else {
        return 0;
    };

    match &caps[2] {
        "KB" | "K" => value / 1024,
        "GB" | "G" => value * 1024,
        "TB" | "T" => value * 1024 * 1024,
        _ => value,
    }
}

/// Parse a wall-clock limit like `02:00:00`, `120:00`, or `120` (minutes).
pub fn parse_wall_clock_minutes(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("UNLIMITED") {
        return None;
    }

    if text.contains(':') {
        let parts: Vec<&str> = text.split(':').collect();
        let (hours, minutes, seconds) = match parts.len() {
            2 => (
                parts[0].parse().unwrap_or(0),
                parts[1].parse().unwrap_or(0),
                0u64,
            ),
            3 => (
                parts[0].parse().unwrap_or(0),
                parts[1].parse().unwrap_or(0),
                parts[2].parse().unwrap_or(0),
            ),
            _ => return None,
        };
        return Some(hours * 60 + minutes + seconds / 60);
    }

    text.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostnames_output_is_one_name_per_line() {
        let nodes = parse_hostnames_output("cloud-cpu-001\ncloud-cpu-002\n\n");
        assert_eq!(nodes, vec!["cloud-cpu-001", "cloud-cpu-002"]);
    }

    #[test]
    fn grouping_follows_partition_and_group() {
        let names = vec![
            "cloud-cpu-001".to_string(),
            "cloud-cpu-002".to_string(),
            "cloud-gpu-001".to_string(),
            "onprem-cpu-001".to_string(),
            "not_a_cloud_node".to_string(),
        ];
        let grouped = group_node_names(&names);

        assert_eq!(grouped["cloud"]["cpu"].len(), 2);
        assert_eq!(grouped["cloud"]["gpu"], vec!["cloud-gpu-001"]);
        assert_eq!(grouped["onprem"]["cpu"], vec!["onprem-cpu-001"]);
        // The malformed name is skipped entirely.
        assert_eq!(grouped.len(), 2);
    }

    #[test]
    fn node_name_parses_into_three_parts() {
        assert_eq!(
            parse_node_name("cloud-hpc-007"),
            Some(("cloud".to_string(), "hpc".to_string(), "007".to_string()))
        );
        assert_eq!(parse_node_name("cloud-hpc"), None);
        assert_eq!(parse_node_name("cloud-hpc-xyz"), None);
    }

    #[test]
    fn node_state_lines_parse_key_value_fields() {
        let output = "NodeName=cloud-cpu-001 Arch=x86_64 State=IDLE+CLOUD+POWER Reason=none\n\
                      NodeName=cloud-cpu-002 State=DOWN*+CLOUD\n";
        let views = parse_node_state_output(output);
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].node_name, "cloud-cpu-001");
        assert_eq!(views[0].tokens(), vec!["IDLE", "CLOUD", "POWER"]);
        assert_eq!(views[0].reason.as_deref(), Some("none"));
        assert_eq!(views[1].tokens(), vec!["DOWN*", "CLOUD"]);
    }

    #[test]
    fn squeue_line_maps_to_a_job() {
        let nodes = vec!["cloud-cpu-001".to_string(), "cloud-cpu-002".to_string()];
        let job =
            parse_squeue_job("1234,climate,cloud,2,32,64G,R,2024-05-01T10:00:00,02:00:00", &nodes)
                .unwrap();
        assert_eq!(job.job_id, "1234");
        assert_eq!(job.name, "climate");
        assert_eq!(job.partition, "cloud");
        assert_eq!(job.resources.nodes, 2);
        assert_eq!(job.resources.cpus_per_node, 16);
        assert_eq!(job.resources.memory_mb, 64 * 1024);
        assert_eq!(job.time_limit_minutes, 120);
        assert_eq!(job.node_list, nodes);
    }

    #[test]
    fn short_squeue_lines_are_rejected() {
        assert!(parse_squeue_job("1234,climate,cloud", &[]).is_err());
    }

    #[test]
    fn memory_suffixes_convert_to_mib() {
        assert_eq!(parse_memory_mb("16GB"), 16 * 1024);
        assert_eq!(parse_memory_mb("16G"), 16 * 1024);
        assert_eq!(parse_memory_mb("2048M"), 2048);
        assert_eq!(parse_memory_mb("2048"), 2048);
        assert_eq!(parse_memory_mb("1T"), 1024 * 1024);
        assert_eq!(parse_memory_mb("2048K"), 2);
        assert_eq!(parse_memory_mb(""), 0);
        assert_eq!(parse_memory_mb("lots"), 0);
    }

    #[test]
    fn wall_clock_formats_parse_to_minutes() {
        assert_eq!(parse_wall_clock_minutes("02:00:00"), Some(120));
        assert_eq!(parse_wall_clock_minutes("90:30"), Some(5430));
        assert_eq!(parse_wall_clock_minutes("45"), Some(45));
        assert_eq!(parse_wall_clock_minutes("UNLIMITED"), None);
        assert_eq!(parse_wall_clock_minutes(""), None);
    }

    #[test]
    fn script_directives_enrich_the_job() {
        let mut job = Job {
            script: "#!/bin/bash\n\
                     #SBATCH --constraint=fabric-required&ssd\n\
                     #SBATCH --exclude=cloud-cpu-003,cloud-cpu-004\n\
                     #SBATCH --mem=32GB\n\
                     #SBATCH --gres=gpu:a100:4\n\
                     #SBATCH --time=04:00:00\n\
                     mpirun ./model\n"
                .to_string(),
            ..Job::default()
        };
        apply_script_directives(&mut job);

        assert_eq!(job.constraints.features, vec!["fabric-required", "ssd"]);
        assert_eq!(
            job.constraints.exclude_nodes,
            vec!["cloud-cpu-003", "cloud-cpu-004"]
        );
        assert_eq!(job.resources.memory_mb, 32 * 1024);
        assert_eq!(job.resources.gpus, 4);
        assert_eq!(job.resources.gpu_type.as_deref(), Some("a100"));
        assert_eq!(job.time_limit_minutes, 240);
    }

    #[test]
    fn job_overview_picks_the_documented_fields() {
        let output = "JobId=4242 JobName=climate-model UserId=alice(1000) GroupId=hpc(200)\n\
                      Priority=100 Account=nsf123 QOS=normal JobState=COMPLETED Reason=None\n\
                      Partition=cloud NumNodes=4 NumCPUs=64 RunTime=02:30:00 TimeLimit=04:00:00\n\
                      Comment=cloud_meta:{\"cost\":12.45}\n";
        let overview = parse_job_overview(output);
        assert_eq!(overview.job_id, "4242");
        assert_eq!(overview.job_name, "climate-model");
        assert_eq!(overview.user, "alice");
        assert_eq!(overview.account, "nsf123");
        assert_eq!(overview.partition, "cloud");
        assert_eq!(overview.state, "COMPLETED");
        assert_eq!(overview.node_count, 4);
        assert_eq!(overview.run_minutes, 150);
        assert!(overview.comment.starts_with("cloud_meta:"));
    }

    #[test]
    fn empty_scripts_change_nothing() {
        let mut job = Job::default();
        apply_script_directives(&mut job);
        assert_eq!(job.resources.memory_mb, 0);
    }
}
