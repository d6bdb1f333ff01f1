//! KDL configuration parsing for Gantry.
//!
//! This crate handles parsing of:
//! - Pipeline definitions (resource types, resources, jobs and their step trees)
//! - System configuration (loop intervals and concurrency)

mod duration;
pub mod error;
mod nodes;
pub mod pipeline;
pub mod system;

pub use duration::{format_duration, parse_duration};
pub use error::{ConfigError, ConfigResult};
pub use pipeline::{PipelineConfig, load_pipeline, parse_pipeline};
pub use system::{SystemConfig, load_system_config, parse_system_config};
