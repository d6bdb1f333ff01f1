//! Repository traits and implementations.

pub mod build;
pub mod component;
pub mod pipeline;

pub use build::{BuildRecord, BuildRepo, PgBuildRepo};
pub use component::{BUILD_TRACKER, Component, ComponentRepo, PgComponentRepo, SCHEDULER};
pub use pipeline::{JobRecord, PgPipelineRepo, PipelineRepo, SerialGroupRepo};
