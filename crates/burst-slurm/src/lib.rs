//! Scheduler integration.
//!
//! The engine never links against the scheduler; it drives the
//! scheduler's own CLI and parses the documented output formats. This
//! crate owns hostlist expansion, node-name parsing, binding pushes,
//! job discovery, and the periodic state reconciler.

pub mod client;
pub mod error;
pub mod reconciler;

pub use client::{
    group_node_names, parse_job_overview, parse_node_name, JobOverview, NodeStateView,
    SlurmClient,
};
pub use error::{SlurmError, SlurmResult};
pub use reconciler::{plan_transition, StateReconciler, SweepReport};
