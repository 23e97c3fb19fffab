//! Bindings between logical scheduler nodes and launched cloud instances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A live mapping from a logical node name to a concrete cloud instance.
///
/// Created by the fleet provisioner after the instance reaches running
/// state; the node binder pushes the address side to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceBinding {
    pub node_name: String,
    pub instance_id: String,
    pub private_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    pub state: String,
    pub launch_time: DateTime<Utc>,
}

/// An instance slot the cloud declined to fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FailedInstance {
    #[serde(default)]
    pub instance_type: String,
    #[serde(default)]
    pub subnet_id: String,
    #[serde(default)]
    pub error_code: String,
    #[serde(default)]
    pub error_message: String,
}
