//! Declarative YAML configuration.
//!
//! One file drives every entry point: cloud credentials and region, the
//! scheduler's partition/node-group layout, advisor integration, pricing
//! feature toggles, and logging. Loading applies defaults, validates, and
//! normalizes (bin paths get a trailing slash) before anything else runs.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub cloud: CloudConfig,
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub advisor: AdvisorConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cloud provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Which compute backend to bind. `simulated` is the in-process
    /// backend used by tests, dry runs, and integration rehearsal.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_retry_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_mode")]
    pub retry_mode: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        CloudConfig {
            region: String::new(),
            profile: None,
            provider: default_provider(),
            retry_max_attempts: default_retry_attempts(),
            retry_mode: default_retry_mode(),
        }
    }
}

fn default_provider() -> String {
    "simulated".to_string()
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_mode() -> String {
    "adaptive".to_string()
}

/// Scheduler integration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_bin_path")]
    pub bin_path: String,
    #[serde(default = "default_scheduler_conf")]
    pub config_path: String,
    /// Must be `CLOUD` so power-save nodes stay visible to queries.
    #[serde(default = "default_private_data")]
    pub private_data: String,
    #[serde(default = "default_rate")]
    pub resume_rate: u32,
    #[serde(default = "default_rate")]
    pub suspend_rate: u32,
    #[serde(default = "default_resume_timeout")]
    pub resume_timeout_secs: u64,
    #[serde(default = "default_suspend_time")]
    pub suspend_time_secs: u64,
    #[serde(default)]
    pub partitions: Vec<PartitionConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            bin_path: default_bin_path(),
            config_path: default_scheduler_conf(),
            private_data: default_private_data(),
            resume_rate: default_rate(),
            suspend_rate: default_rate(),
            resume_timeout_secs: default_resume_timeout(),
            suspend_time_secs: default_suspend_time(),
            partitions: Vec::new(),
        }
    }
}

fn default_bin_path() -> String {
    "/usr/bin/".to_string()
}

fn default_scheduler_conf() -> String {
    "/etc/slurm/slurm.conf".to_string()
}

fn default_private_data() -> String {
    "CLOUD".to_string()
}

fn default_rate() -> u32 {
    100
}

fn default_resume_timeout() -> u64 {
    300
}

fn default_suspend_time() -> u64 {
    350
}

/// One scheduler partition and its cloud-backed node groups.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PartitionConfig {
    pub partition_name: String,
    pub node_groups: Vec<NodeGroupConfig>,
    #[serde(default)]
    pub partition_options: HashMap<String, String>,
}

/// A homogeneous group of cloud nodes within a partition.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeGroupConfig {
    pub node_group_name: String,
    pub max_nodes: u32,
    /// `spot` or `on-demand`.
    pub purchasing_option: String,
    #[serde(default)]
    pub launch_template: LaunchTemplateConfig,
    pub instance_type_overrides: Vec<InstanceTypeOverride>,
    pub subnet_ids: Vec<String>,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    #[serde(default)]
    pub instance_profile: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// Launch template handle in configuration form.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LaunchTemplateConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_template_version")]
    pub version: String,
}

fn default_template_version() -> String {
    "$Latest".to_string()
}

/// Shape override row for a node group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceTypeOverride {
    pub instance_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot_price: Option<String>,
    #[serde(default = "default_weight")]
    pub weighted_capacity: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// Advisor integration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorConfig {
    /// `auto-detect`, `true`, or `false`.
    #[serde(default = "default_advisor_enabled")]
    pub enabled: String,
    #[serde(default = "default_advisor_command")]
    pub command: String,
    #[serde(default)]
    pub config_path: String,
    #[serde(default = "default_advisor_timeout")]
    pub timeout_secs: u64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        AdvisorConfig {
            enabled: default_advisor_enabled(),
            command: default_advisor_command(),
            config_path: String::new(),
            timeout_secs: default_advisor_timeout(),
        }
    }
}

fn default_advisor_enabled() -> String {
    "auto-detect".to_string()
}

fn default_advisor_command() -> String {
    "burst-advisor".to_string()
}

fn default_advisor_timeout() -> u64 {
    30
}

/// Pricing and classification feature toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Fabric demand assumed when a job carries no explicit token:
    /// `required`, `preferred`, `optional`, or `disabled`.
    #[serde(default = "default_fabric_default")]
    pub fabric_default: String,
    /// Node count at which HPC-optimized families are preferred.
    #[serde(default = "default_hpc_threshold")]
    pub hpc_family_threshold: u32,
    /// Node count at which a placement group is created.
    #[serde(default = "default_pg_threshold")]
    pub placement_group_threshold: u32,
    #[serde(default = "default_true")]
    pub enable_enhanced_networking: bool,
    /// Interruption-monitor polling interval.
    #[serde(default = "default_poll_secs")]
    pub interruption_poll_secs: u64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        PricingConfig {
            fabric_default: default_fabric_default(),
            hpc_family_threshold: default_hpc_threshold(),
            placement_group_threshold: default_pg_threshold(),
            enable_enhanced_networking: true,
            interruption_poll_secs: default_poll_secs(),
        }
    }
}

fn default_fabric_default() -> String {
    "preferred".to_string()
}

fn default_hpc_threshold() -> u32 {
    8
}

fn default_pg_threshold() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

fn default_poll_secs() -> u64 {
    30
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `json` or `text`.
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
            file: String::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Config {
    /// Load, validate, and normalize a configuration file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a configuration from YAML text.
    pub fn from_yaml(content: &str) -> ConfigResult<Self> {
        let mut config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        config.normalize();
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.cloud.region.is_empty() {
            return Err(ConfigError::Invalid("cloud.region is required".into()));
        }
        if self.scheduler.bin_path.is_empty() {
            return Err(ConfigError::Invalid("scheduler.bin_path is required".into()));
        }
        if self.scheduler.private_data != "CLOUD" {
            return Err(ConfigError::Invalid(
                "scheduler.private_data must be 'CLOUD' for power-save nodes to be visible".into(),
            ));
        }
        validate_rate("scheduler.resume_rate", self.scheduler.resume_rate)?;
        validate_rate("scheduler.suspend_rate", self.scheduler.suspend_rate)?;
        if self.scheduler.resume_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.resume_timeout_secs must be positive".into(),
            ));
        }
        if self.scheduler.suspend_time_secs == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.suspend_time_secs must be positive".into(),
            ));
        }
        if self.scheduler.partitions.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one partition must be configured".into(),
            ));
        }
        for (i, partition) in self.scheduler.partitions.iter().enumerate() {
            validate_partition(partition, i)?;
        }

        match self.pricing.fabric_default.as_str() {
            "required" | "preferred" | "optional" | "disabled" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "pricing.fabric_default must be one of required, preferred, optional, disabled (got '{other}')"
                )))
            }
        }
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "logging.level must be one of trace, debug, info, warn, error (got '{other}')"
                )))
            }
        }
        Ok(())
    }

    /// Normalize path-shaped fields: bin directories get a trailing slash.
    pub fn normalize(&mut self) {
        if !self.scheduler.bin_path.is_empty() && !self.scheduler.bin_path.ends_with('/') {
            self.scheduler.bin_path.push('/');
        }
    }

    /// Node name for `(partition, node group, id)`: `{p}-{g}-{id}`.
    pub fn node_name(&self, partition: &str, node_group: &str, node_id: &str) -> String {
        if node_id.is_empty() {
            format!("{partition}-{node_group}")
        } else {
            format!("{partition}-{node_group}-{node_id}")
        }
    }

    /// Compact node range for a whole group: `{p}-{g}-[0-N]`.
    pub fn node_range(&self, partition: &str, node_group: &str, max_nodes: u32) -> String {
        if max_nodes > 1 {
            format!("{partition}-{node_group}-[0-{}]", max_nodes - 1)
        } else {
            format!("{partition}-{node_group}-0")
        }
    }

    /// Find a node group by partition and group name.
    pub fn find_node_group(&self, partition: &str, node_group: &str) -> Option<&NodeGroupConfig> {
        self.scheduler
            .partitions
            .iter()
            .find(|p| p.partition_name == partition)?
            .node_groups
            .iter()
            .find(|g| g.node_group_name == node_group)
    }
}

fn validate_rate(field: &str, value: u32) -> ConfigResult<()> {
    if value == 0 || value > 1000 {
        return Err(ConfigError::Invalid(format!(
            "{field} must be between 1 and 1000"
        )));
    }
    Ok(())
}

fn validate_partition(partition: &PartitionConfig, index: usize) -> ConfigResult<()> {
    if partition.partition_name.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "partitions[{index}].partition_name is required"
        )));
    }
    if !is_alphanumeric(&partition.partition_name) {
        return Err(ConfigError::Invalid(format!(
            "partitions[{index}].partition_name must contain only alphanumeric characters"
        )));
    }
    if partition.node_groups.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "partitions[{index}].node_groups cannot be empty"
        )));
    }
    for (j, group) in partition.node_groups.iter().enumerate() {
        validate_node_group(group, index, j)?;
    }
    Ok(())
}

fn validate_node_group(group: &NodeGroupConfig, pi: usize, gi: usize) -> ConfigResult<()> {
    let at = format!("partitions[{pi}].node_groups[{gi}]");
    if group.node_group_name.is_empty() {
        return Err(ConfigError::Invalid(format!("{at}.node_group_name is required")));
    }
    if !is_alphanumeric(&group.node_group_name) {
        return Err(ConfigError::Invalid(format!(
            "{at}.node_group_name must contain only alphanumeric characters"
        )));
    }
    if group.max_nodes == 0 {
        return Err(ConfigError::Invalid(format!("{at}.max_nodes must be positive")));
    }
    if group.purchasing_option != "spot" && group.purchasing_option != "on-demand" {
        return Err(ConfigError::Invalid(format!(
            "{at}.purchasing_option must be 'spot' or 'on-demand'"
        )));
    }
    if group.launch_template.name.is_empty() && group.launch_template.id.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "{at}.launch_template requires a name or an id"
        )));
    }
    if group.instance_type_overrides.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "{at}.instance_type_overrides cannot be empty"
        )));
    }
    if group.subnet_ids.is_empty() {
        return Err(ConfigError::Invalid(format!("{at}.subnet_ids cannot be empty")));
    }
    Ok(())
}

fn is_alphanumeric(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
cloud:
  region: us-east-1
scheduler:
  bin_path: /usr/local/bin
  partitions:
    - partition_name: cloud
      node_groups:
        - node_group_name: cpu
          max_nodes: 16
          purchasing_option: spot
          launch_template:
            name: burst-template
          instance_type_overrides:
            - instance_type: c6i.xlarge
            - instance_type: c5.xlarge
          subnet_ids: [subnet-aaa, subnet-bbb]
"#;

    #[test]
    fn minimal_config_loads_with_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.cloud.region, "us-east-1");
        assert_eq!(config.cloud.retry_max_attempts, 3);
        assert_eq!(config.scheduler.private_data, "CLOUD");
        assert_eq!(config.scheduler.resume_rate, 100);
        assert_eq!(config.pricing.hpc_family_threshold, 8);
        assert_eq!(config.pricing.placement_group_threshold, 2);
        assert_eq!(config.advisor.enabled, "auto-detect");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn bin_path_gets_trailing_slash() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.scheduler.bin_path, "/usr/local/bin/");
    }

    #[test]
    fn region_is_required() {
        let yaml = MINIMAL.replace("region: us-east-1", "region: \"\"");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("cloud.region"));
    }

    #[test]
    fn partition_names_must_be_alphanumeric() {
        let yaml = MINIMAL.replace("partition_name: cloud", "partition_name: cloud-x");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("alphanumeric"));
    }

    #[test]
    fn node_group_purchasing_option_is_checked() {
        let yaml = MINIMAL.replace("purchasing_option: spot", "purchasing_option: mixed");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("purchasing_option"));
    }

    #[test]
    fn launch_template_requires_name_or_id() {
        let yaml = MINIMAL.replace("name: burst-template", "name: \"\"");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("launch_template"));
    }

    #[test]
    fn empty_subnets_rejected() {
        let yaml = MINIMAL.replace("subnet_ids: [subnet-aaa, subnet-bbb]", "subnet_ids: []");
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn node_naming_follows_pattern() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.node_name("cloud", "cpu", "007"), "cloud-cpu-007");
        assert_eq!(config.node_range("cloud", "cpu", 16), "cloud-cpu-[0-15]");
        assert_eq!(config.node_range("cloud", "cpu", 1), "cloud-cpu-0");
    }

    #[test]
    fn find_node_group_matches_both_names() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert!(config.find_node_group("cloud", "cpu").is_some());
        assert!(config.find_node_group("cloud", "gpu").is_none());
        assert!(config.find_node_group("onprem", "cpu").is_none());
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        assert!(matches!(
            Config::from_yaml("cloud: ["),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn private_data_must_be_cloud() {
        let yaml = MINIMAL.replace(
            "bin_path: /usr/local/bin",
            "bin_path: /usr/local/bin\n  private_data: NONE",
        );
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("private_data"));
    }
}
