//! Scheduler integration errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlurmError {
    #[error("failed to expand hostlist '{hostlist}': {message}")]
    HostlistParse { hostlist: String, message: String },

    #[error("scheduler command failed: {0}")]
    CommandFailed(String),

    #[error("failed to update node {node}: {message}")]
    SchedulerUpdate { node: String, message: String },

    #[error("failed to parse scheduler output: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type SlurmResult<T> = Result<T, SlurmError>;
