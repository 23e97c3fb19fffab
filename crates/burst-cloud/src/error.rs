//! Cloud control-plane error types.

use thiserror::Error;

/// Errors from fleet provisioning and the surrounding control plane.
#[derive(Debug, Error)]
pub enum CloudError {
    /// A provider API call failed. The recoverable flag informs the
    /// caller's retry policy.
    #[error("provider error: {message}")]
    Provider { message: String, recoverable: bool },

    /// Pre-flight found no (shape, subnet) pair with any offering.
    #[error("insufficient capacity in target subnets for the candidate shapes")]
    InsufficientCapacity,

    /// Instances did not reach running state in time.
    #[error("launch timed out with {} instance(s) still pending", .0.len())]
    LaunchTimeout(Vec<String>),

    /// No candidate shape is priced within the spot ceiling and
    /// on-demand fallback is disabled.
    #[error("no candidate shape within the spot price ceiling and fallback is disabled")]
    PriceCeilingExceeded,

    /// An atomic provision failed; all partial instances were terminated
    /// before this surfaced.
    #[error("gang provisioning failed: {0}")]
    GangFailed(String),
}

impl CloudError {
    pub fn provider(message: impl Into<String>, recoverable: bool) -> Self {
        CloudError::Provider {
            message: message.into(),
            recoverable,
        }
    }
}

pub type CloudResult<T> = Result<T, CloudError>;
