//! Pipeline configuration parsing.
//!
//! A pipeline file declares resource types, resources and jobs:
//!
//! ```kdl
//! resource-type "git-lfs" type="registry-image" {
//!     source { repository "example/git-lfs-resource" }
//!     defaults { lfs #true }
//! }
//!
//! resource "repo" type="git-lfs" check-every="1m" {
//!     source { uri "https://example.com/repo.git" }
//! }
//!
//! job "unit" serial=#true {
//!     plan {
//!         get "repo" trigger=#true
//!         task "test" file="repo/ci/test.yml" timeout="30m" attempts=2
//!     }
//!     on-failure {
//!         put "notify"
//!     }
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;

use gantry_core::step::{
    AcrossStep, AcrossVarConfig, ContainerLimits, GetStep, HookKind, InParallelStep,
    InputsKeyword, LoadVarStep, MaxInFlight, PutInputs, PutStep, RetryStep, SetPipelineStep,
    TaskStep, TimeoutStep,
};
use gantry_core::{
    JobConfig, SchedulerResource, SchedulerResources, StepConfig, VersionedResourceType,
    VersionedResourceTypes,
};
use kdl::{KdlDocument, KdlNode, KdlValue};

use crate::duration::parse_duration;
use crate::nodes::{
    get_all_string_args, get_args, get_bool_prop, get_duration_prop, get_first_string_arg,
    get_map_block, get_string_list_prop, get_string_map_block, get_string_prop, get_u32_prop,
    value_to_json,
};
use crate::{ConfigError, ConfigResult};

/// Everything the scheduler needs to know about one pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineConfig {
    pub resource_types: VersionedResourceTypes,
    pub resources: SchedulerResources,
    pub jobs: Vec<JobConfig>,
}

impl PipelineConfig {
    pub fn job(&self, name: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|j| j.name == name)
    }

    /// Check the references between jobs, resources and resource types.
    ///
    /// Every get and put must name a declared resource, every `passed`
    /// constraint a declared job, and resource types must not be defined in
    /// terms of each other in a loop.
    pub fn validate(&self) -> ConfigResult<()> {
        let job_names: HashSet<&str> = self.jobs.iter().map(|j| j.name.as_str()).collect();

        for job in &self.jobs {
            let mut errors = Vec::new();

            job.step_config().each(&mut |step| match step {
                StepConfig::Get(get) => {
                    if self.resources.lookup(get.resource_name()).is_none() {
                        errors.push(format!(
                            "job '{}' gets unknown resource '{}'",
                            job.name,
                            get.resource_name()
                        ));
                    }
                    for upstream in &get.passed {
                        if !job_names.contains(upstream.as_str()) {
                            errors.push(format!(
                                "job '{}' expects '{}' to have passed unknown job '{}'",
                                job.name, get.name, upstream
                            ));
                        }
                    }
                }
                StepConfig::Put(put) => {
                    if self.resources.lookup(put.resource_name()).is_none() {
                        errors.push(format!(
                            "job '{}' puts to unknown resource '{}'",
                            job.name,
                            put.resource_name()
                        ));
                    }
                }
                _ => {}
            });

            if let Some(first) = errors.into_iter().next() {
                return Err(ConfigError::InvalidReference(first));
            }
        }

        if let Err(cycle) = detect_cycle(&self.resource_types) {
            return Err(ConfigError::CycleDetected(cycle));
        }

        Ok(())
    }
}

/// Read and parse a pipeline file.
pub fn load_pipeline(path: &Path) -> ConfigResult<PipelineConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_pipeline(&content)
}

/// Parse a pipeline configuration from KDL text.
pub fn parse_pipeline(kdl: &str) -> ConfigResult<PipelineConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut resource_types = Vec::new();
    let mut resources = Vec::new();
    let mut jobs = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "resource-type" => resource_types.push(parse_resource_type(node)?),
            "resource" => resources.push(parse_resource(node)?),
            "job" => jobs.push(parse_job(node)?),
            other => {
                return Err(ConfigError::invalid(
                    "pipeline",
                    format!("unknown node '{other}'"),
                ));
            }
        }
    }

    check_unique("resource type", resource_types.iter().map(|t| t.name.as_str()))?;
    check_unique("resource", resources.iter().map(|r| r.name.as_str()))?;
    check_unique("job", jobs.iter().map(|j| j.name.as_str()))?;

    Ok(PipelineConfig {
        resource_types: VersionedResourceTypes::new(resource_types),
        resources: SchedulerResources::new(resources),
        jobs,
    })
}

fn check_unique<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> ConfigResult<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ConfigError::Duplicate(format!("{kind} '{name}'")));
        }
    }
    Ok(())
}

fn unknown_child(parent: &str, child: &str) -> ConfigError {
    ConfigError::invalid(parent, format!("unknown child node '{child}'"))
}

fn parse_resource_type(node: &KdlNode) -> ConfigResult<VersionedResourceType> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("resource-type name".to_string()))?;
    let type_ = get_string_prop(node, "type")
        .ok_or_else(|| ConfigError::MissingField(format!("type for resource type '{name}'")))?;

    let mut resource_type = VersionedResourceType {
        privileged: get_bool_prop(node, "privileged").unwrap_or(false),
        check_every: get_duration_prop(node, "check-every")?,
        name,
        type_,
        ..Default::default()
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "source" => resource_type.source = get_map_block(child),
                "defaults" => resource_type.defaults = get_map_block(child),
                "params" => resource_type.params = get_map_block(child),
                "version" => resource_type.version = Some(get_string_map_block(child)?),
                "tags" => resource_type.tags = get_all_string_args(child),
                other => return Err(unknown_child("resource-type", other)),
            }
        }
    }

    Ok(resource_type)
}

fn parse_resource(node: &KdlNode) -> ConfigResult<SchedulerResource> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("resource name".to_string()))?;
    let type_ = get_string_prop(node, "type")
        .ok_or_else(|| ConfigError::MissingField(format!("type for resource '{name}'")))?;

    let mut resource = SchedulerResource {
        check_every: get_duration_prop(node, "check-every")?,
        check_timeout: get_duration_prop(node, "check-timeout")?,
        expose_build_created_by: get_bool_prop(node, "expose-build-created-by").unwrap_or(false),
        name,
        type_,
        ..Default::default()
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "source" => resource.source = get_map_block(child),
                "version" => resource.pinned_version = Some(get_string_map_block(child)?),
                "tags" => resource.tags = get_all_string_args(child),
                other => return Err(unknown_child("resource", other)),
            }
        }
    }

    Ok(resource)
}

fn parse_job(node: &KdlNode) -> ConfigResult<JobConfig> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("job name".to_string()))?;

    let mut job = JobConfig {
        serial: get_bool_prop(node, "serial").unwrap_or(false),
        serial_groups: get_string_list_prop(node, "serial-groups"),
        raw_max_in_flight: get_u32_prop(node, "max-in-flight")?.unwrap_or(0),
        public: get_bool_prop(node, "public").unwrap_or(false),
        disable_manual_trigger: get_bool_prop(node, "disable-manual-trigger").unwrap_or(false),
        name,
        ..Default::default()
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let child_name = child.name().value();
            if let Some(kind) = hook_kind(child_name) {
                let hook = Some(single_step(child)?);
                match kind {
                    HookKind::OnSuccess => job.on_success = hook,
                    HookKind::OnFailure => job.on_failure = hook,
                    HookKind::OnAbort => job.on_abort = hook,
                    HookKind::OnError => job.on_error = hook,
                    HookKind::Ensure => job.ensure = hook,
                }
                continue;
            }

            match child_name {
                "plan" => job.plan = steps_in(child, &[])?,
                "serial-groups" => {}
                other => return Err(unknown_child("job", other)),
            }
        }
    }

    if job.plan.is_empty() {
        return Err(ConfigError::MissingField(format!("plan for job '{}'", job.name)));
    }

    Ok(job)
}

const HOOK_NODES: [&str; 5] = ["on-success", "on-failure", "on-abort", "on-error", "ensure"];

fn hook_kind(name: &str) -> Option<HookKind> {
    match name {
        "on-success" => Some(HookKind::OnSuccess),
        "on-failure" => Some(HookKind::OnFailure),
        "on-abort" => Some(HookKind::OnAbort),
        "on-error" => Some(HookKind::OnError),
        "ensure" => Some(HookKind::Ensure),
        _ => None,
    }
}

fn hook_node(kind: HookKind) -> &'static str {
    match kind {
        HookKind::OnSuccess => "on-success",
        HookKind::OnFailure => "on-failure",
        HookKind::OnAbort => "on-abort",
        HookKind::OnError => "on-error",
        HookKind::Ensure => "ensure",
    }
}

/// Parse every child of `node` as a step, except the named ones.
fn steps_in(node: &KdlNode, skip: &[&str]) -> ConfigResult<Vec<StepConfig>> {
    let Some(children) = node.children() else {
        return Ok(Vec::new());
    };

    children
        .nodes()
        .iter()
        .filter(|child| !skip.contains(&child.name().value()))
        .map(parse_step)
        .collect()
}

/// The steps in `node` as one step; several are run in sequence.
fn single_step(node: &KdlNode) -> ConfigResult<StepConfig> {
    let steps = steps_in(node, &[])?;
    one_step(node, steps)
}

fn one_step(node: &KdlNode, mut steps: Vec<StepConfig>) -> ConfigResult<StepConfig> {
    match steps.len() {
        0 => Err(ConfigError::MissingField(format!(
            "step in '{}'",
            node.name().value()
        ))),
        1 => Ok(steps.remove(0)),
        _ => Ok(StepConfig::Do(steps)),
    }
}

fn parse_step(node: &KdlNode) -> ConfigResult<StepConfig> {
    let step = match node.name().value() {
        "get" => StepConfig::Get(parse_get(node)?),
        "put" => StepConfig::Put(parse_put(node)?),
        "task" => StepConfig::Task(parse_task(node)?),
        "set-pipeline" => StepConfig::SetPipeline(parse_set_pipeline(node)?),
        "load-var" => StepConfig::LoadVar(parse_load_var(node)?),
        "do" => StepConfig::Do(steps_in(node, &HOOK_NODES)?),
        "in-parallel" => StepConfig::InParallel(InParallelStep {
            steps: steps_in(node, &HOOK_NODES)?,
            limit: get_u32_prop(node, "limit")?.unwrap_or(0),
            fail_fast: get_bool_prop(node, "fail-fast").unwrap_or(false),
        }),
        "across" => StepConfig::Across(parse_across(node)?),
        "try" => StepConfig::Try(Box::new(one_step(node, steps_in(node, &HOOK_NODES)?)?)),
        other => {
            return Err(ConfigError::invalid("step", format!("unknown step type '{other}'")));
        }
    };

    with_modifiers(node, step)
}

/// Wrap `step` in the timeout, retry and hooks declared on `node`, innermost
/// first.
fn with_modifiers(node: &KdlNode, mut step: StepConfig) -> ConfigResult<StepConfig> {
    if let Some(duration) = get_string_prop(node, "timeout") {
        if parse_duration(&duration).is_none() {
            return Err(ConfigError::invalid(
                "timeout",
                format!("invalid duration '{duration}'"),
            ));
        }
        step = StepConfig::Timeout(TimeoutStep {
            step: Box::new(step),
            duration,
        });
    }

    if let Some(attempts) = get_u32_prop(node, "attempts")? {
        if attempts == 0 {
            return Err(ConfigError::invalid("attempts", "must be at least 1"));
        }
        step = StepConfig::Retry(RetryStep {
            step: Box::new(step),
            attempts,
        });
    }

    if let Some(children) = node.children() {
        for kind in HookKind::ALL {
            if let Some(hook) = children.get(hook_node(kind)) {
                step = step.with_hook(kind, single_step(hook)?);
            }
        }
    }

    Ok(step)
}

fn step_name(node: &KdlNode) -> ConfigResult<String> {
    get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField(format!("{} name", node.name().value())))
}

fn parse_get(node: &KdlNode) -> ConfigResult<GetStep> {
    let mut get = GetStep {
        name: step_name(node)?,
        resource: get_string_prop(node, "resource"),
        passed: get_string_list_prop(node, "passed"),
        trigger: get_bool_prop(node, "trigger").unwrap_or(false),
        ..Default::default()
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "params" => get.params = get_map_block(child),
                "tags" => get.tags = get_all_string_args(child),
                "passed" => {}
                name if hook_kind(name).is_some() => {}
                other => return Err(unknown_child("get", other)),
            }
        }
    }

    Ok(get)
}

fn parse_put_inputs(raw: &str) -> ConfigResult<PutInputs> {
    match raw {
        "all" => Ok(PutInputs::Keyword(InputsKeyword::All)),
        "detect" => Ok(PutInputs::Keyword(InputsKeyword::Detect)),
        other => Err(ConfigError::invalid(
            "inputs",
            format!("expected \"all\" or \"detect\", got '{other}'"),
        )),
    }
}

fn parse_put(node: &KdlNode) -> ConfigResult<PutStep> {
    let mut put = PutStep {
        name: step_name(node)?,
        resource: get_string_prop(node, "resource"),
        inputs: get_string_prop(node, "inputs")
            .map(|raw| parse_put_inputs(&raw))
            .transpose()?,
        ..Default::default()
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "params" => put.params = get_map_block(child),
                "get-params" => put.get_params = get_map_block(child),
                "inputs" => put.inputs = Some(PutInputs::Only(get_all_string_args(child))),
                "tags" => put.tags = get_all_string_args(child),
                name if hook_kind(name).is_some() => {}
                other => return Err(unknown_child("put", other)),
            }
        }
    }

    Ok(put)
}

fn parse_task(node: &KdlNode) -> ConfigResult<TaskStep> {
    let mut task = TaskStep {
        name: step_name(node)?,
        privileged: get_bool_prop(node, "privileged").unwrap_or(false),
        config_path: get_string_prop(node, "file"),
        image_artifact_name: get_string_prop(node, "image"),
        ..Default::default()
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "config" => {
                    task.config = Some(serde_json::Value::Object(
                        get_map_block(child).into_iter().collect(),
                    ));
                }
                "vars" => task.vars = get_map_block(child),
                "params" => task.params = get_map_block(child),
                "input-mapping" => task.input_mapping = get_string_map_block(child)?,
                "output-mapping" => task.output_mapping = get_string_map_block(child)?,
                "container-limits" => {
                    task.container_limits = Some(ContainerLimits {
                        cpu: get_u32_prop(child, "cpu")?.map(u64::from),
                        memory: get_u32_prop(child, "memory")?.map(u64::from),
                    });
                }
                "tags" => task.tags = get_all_string_args(child),
                name if hook_kind(name).is_some() => {}
                other => return Err(unknown_child("task", other)),
            }
        }
    }

    if task.config_path.is_none() && task.config.is_none() {
        return Err(ConfigError::MissingField(format!(
            "file or config for task '{}'",
            task.name
        )));
    }

    Ok(task)
}

fn parse_set_pipeline(node: &KdlNode) -> ConfigResult<SetPipelineStep> {
    let name = step_name(node)?;
    let file = get_string_prop(node, "file")
        .ok_or_else(|| ConfigError::MissingField(format!("file for set-pipeline '{name}'")))?;

    let mut set_pipeline = SetPipelineStep {
        name,
        file,
        team: get_string_prop(node, "team"),
        ..Default::default()
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "vars" => set_pipeline.vars = get_map_block(child),
                "var-files" => set_pipeline.var_files = get_all_string_args(child),
                "instance-vars" => set_pipeline.instance_vars = get_map_block(child),
                name if hook_kind(name).is_some() => {}
                other => return Err(unknown_child("set-pipeline", other)),
            }
        }
    }

    Ok(set_pipeline)
}

fn parse_load_var(node: &KdlNode) -> ConfigResult<LoadVarStep> {
    let name = step_name(node)?;
    let file = get_string_prop(node, "file")
        .ok_or_else(|| ConfigError::MissingField(format!("file for load-var '{name}'")))?;

    Ok(LoadVarStep {
        name,
        file,
        format: get_string_prop(node, "format"),
        reveal: get_bool_prop(node, "reveal").unwrap_or(false),
    })
}

fn parse_across_max_in_flight(node: &KdlNode) -> ConfigResult<Option<MaxInFlight>> {
    match node.get("max-in-flight") {
        None => Ok(None),
        Some(KdlValue::String(s)) if s == "all" => Ok(Some(MaxInFlight::All)),
        Some(value) => value
            .as_integer()
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0)
            .map(|n| Some(MaxInFlight::Limit(n)))
            .ok_or_else(|| {
                ConfigError::invalid(
                    "max-in-flight",
                    format!("expected \"all\" or a positive integer, got {value}"),
                )
            }),
    }
}

fn parse_across(node: &KdlNode) -> ConfigResult<AcrossStep> {
    let mut vars = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes().iter().filter(|c| c.name().value() == "var") {
            let name = step_name(child)?;
            let values: Vec<_> = get_args(child)
                .into_iter()
                .skip(1)
                .map(value_to_json)
                .collect();

            if values.is_empty() {
                return Err(ConfigError::invalid(
                    format!("across var '{name}'"),
                    "must have at least one value",
                ));
            }

            vars.push(AcrossVarConfig {
                var: name,
                values,
                max_in_flight: parse_across_max_in_flight(child)?,
            });
        }
    }

    if vars.is_empty() {
        return Err(ConfigError::MissingField("var for across".to_string()));
    }

    let mut skip = HOOK_NODES.to_vec();
    skip.push("var");
    let step = one_step(node, steps_in(node, &skip)?)?;

    Ok(AcrossStep {
        step: Box::new(step),
        vars,
        fail_fast: get_bool_prop(node, "fail-fast").unwrap_or(false),
    })
}

/// Detect resource types defined in terms of each other using DFS.
///
/// A type that names itself resolves to the base type of the same name and
/// is not a cycle.
fn detect_cycle(resource_types: &VersionedResourceTypes) -> Result<(), String> {
    let parents: HashMap<&str, &str> = resource_types
        .iter()
        .filter(|t| t.name != t.type_)
        .map(|t| (t.name.as_str(), t.type_.as_str()))
        .collect();

    let mut visited = HashSet::new();
    for resource_type in resource_types.iter() {
        let mut chain: Vec<&str> = Vec::new();
        let mut current = resource_type.name.as_str();

        loop {
            if visited.contains(current) {
                break;
            }
            if let Some(start) = chain.iter().position(|name| *name == current) {
                let mut cycle = chain[start..].to_vec();
                cycle.push(current);
                return Err(cycle.join(" -> "));
            }
            chain.push(current);

            match parents.get(current) {
                Some(parent) if resource_types.lookup(parent).is_some() => current = *parent,
                _ => break,
            }
        }

        visited.extend(chain);
    }

    Ok(())
}
