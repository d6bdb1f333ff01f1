//! Core domain types and traits for the Gantry build scheduler.
//!
//! This crate contains:
//! - Build identifiers, builds and build inputs
//! - Step configuration and job configuration
//! - Resources and resource types
//! - The compiled plan tree and its id factory
//! - The execution engine trait

pub mod build;
pub mod engine;
pub mod error;
pub mod id;
pub mod job;
pub mod plan;
pub mod resource;
pub mod step;

pub use build::{Build, BuildInput, BuildStatus};
pub use engine::{Engine, EngineBuild};
pub use error::{Error, Result};
pub use id::BuildId;
pub use job::JobConfig;
pub use plan::{Plan, PlanFactory, PlanId, PlanStep};
pub use resource::{SchedulerResource, SchedulerResources, VersionedResourceType, VersionedResourceTypes};
pub use step::StepConfig;
