//! Shared data model for the cloudburst provisioning engine.
//!
//! Everything here is plain data: jobs as the scheduler sees them, the
//! instance requirements derived from them, externally supplied execution
//! plans, and the bindings that tie logical node names to launched cloud
//! instances. The model is a DAG — job → requirements → fleet request →
//! bindings — with no back-references; the scheduler's node table is
//! external state, not part of the model.

pub mod binding;
pub mod catalog;
pub mod job;
pub mod performance;
pub mod plan;
pub mod requirements;

pub use binding::{FailedInstance, InstanceBinding};
pub use job::{Job, JobConstraints, ResourceEnvelope, Topology};
pub use plan::{
    CostConstraints, ExecutionPlan, InstanceSpec, LaunchTemplateRef, NetworkConfig,
    ParallelConfig, PlanMetadata, PricingMode,
};
pub use requirements::{FabricDemand, InstanceRequirements, PlacementStrategy};
