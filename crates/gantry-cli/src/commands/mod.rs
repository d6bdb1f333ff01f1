//! CLI command implementations.

pub mod plan;
pub mod web;

use anyhow::{Context, Result};
use gantry_config::load_pipeline;
use std::path::Path;

pub fn validate(path: &Path) -> Result<()> {
    let pipeline = load_pipeline(path)
        .with_context(|| format!("Failed to parse pipeline config: {}", path.display()))?;
    pipeline
        .validate()
        .with_context(|| format!("Invalid pipeline config: {}", path.display()))?;

    println!(
        "Configuration is valid ({} resource types, {} resources, {} jobs)",
        pipeline.resource_types.len(),
        pipeline.resources.iter().count(),
        pipeline.jobs.len()
    );
    Ok(())
}
