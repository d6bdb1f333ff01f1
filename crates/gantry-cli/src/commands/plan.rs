//! Compile a job's build plan without touching the database.

use anyhow::{Context, Result};
use gantry_config::{PipelineConfig, load_pipeline};
use gantry_core::resource::Version;
use gantry_core::{BuildInput, JobConfig, PlanFactory};
use gantry_scheduler::Planner;
use std::path::Path;
use std::sync::Arc;

pub fn run(path: &Path, job_name: &str, inputs: Option<&Path>) -> Result<()> {
    let pipeline = load_pipeline(path)
        .with_context(|| format!("Failed to parse pipeline config: {}", path.display()))?;
    let job = pipeline
        .job(job_name)
        .with_context(|| format!("Job '{job_name}' not found in {}", path.display()))?;

    let inputs = match inputs {
        Some(inputs_path) => {
            let content = std::fs::read_to_string(inputs_path)
                .with_context(|| format!("Failed to read inputs: {}", inputs_path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse inputs: {}", inputs_path.display()))?
        }
        None => default_inputs(&pipeline, job),
    };

    let planner = Planner::new(Arc::new(PlanFactory::new(0)));
    let plan = planner
        .create(
            &job.step_config(),
            &pipeline.resources,
            &pipeline.resource_types,
            &inputs,
        )
        .with_context(|| format!("Failed to create plan for job '{job_name}'"))?;

    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

/// One input per get step, at the resource's pinned version or an empty one.
fn default_inputs(pipeline: &PipelineConfig, job: &JobConfig) -> Vec<BuildInput> {
    job.inputs()
        .into_iter()
        .map(|get| {
            let version = pipeline
                .resources
                .lookup(get.resource_name())
                .and_then(|r| r.pinned_version.clone())
                .unwrap_or_else(Version::new);

            BuildInput {
                name: get.name.clone(),
                resource: get.resource_name().to_string(),
                version,
                ..Default::default()
            }
        })
        .collect()
}
