//! Declarative step configuration of a job.
//!
//! A job's plan is a tree of [`StepConfig`] values. The set of step kinds is
//! closed: every consumer matches exhaustively, so adding a kind is a compile
//! error everywhere it has not been handled yet.

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::resource::{Params, Tags};

/// One node of a job's step configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum StepConfig {
    Get(GetStep),
    Put(PutStep),
    Task(TaskStep),
    SetPipeline(SetPipelineStep),
    LoadVar(LoadVarStep),
    Do(Vec<StepConfig>),
    InParallel(InParallelStep),
    Across(AcrossStep),
    Try(Box<StepConfig>),
    Timeout(TimeoutStep),
    Retry(RetryStep),
    OnSuccess(HookStep),
    OnFailure(HookStep),
    OnAbort(HookStep),
    OnError(HookStep),
    Ensure(HookStep),
}

impl StepConfig {
    /// Call `f` on this step and every step nested inside it, hooks included.
    pub fn each<'a>(&'a self, f: &mut dyn FnMut(&'a StepConfig)) {
        f(self);

        match self {
            StepConfig::Get(_)
            | StepConfig::Put(_)
            | StepConfig::Task(_)
            | StepConfig::SetPipeline(_)
            | StepConfig::LoadVar(_) => {}
            StepConfig::Do(steps) => {
                for step in steps {
                    step.each(f);
                }
            }
            StepConfig::InParallel(in_parallel) => {
                for step in &in_parallel.steps {
                    step.each(f);
                }
            }
            StepConfig::Across(across) => across.step.each(f),
            StepConfig::Try(step) => step.each(f),
            StepConfig::Timeout(timeout) => timeout.step.each(f),
            StepConfig::Retry(retry) => retry.step.each(f),
            StepConfig::OnSuccess(hook)
            | StepConfig::OnFailure(hook)
            | StepConfig::OnAbort(hook)
            | StepConfig::OnError(hook)
            | StepConfig::Ensure(hook) => {
                hook.step.each(f);
                hook.hook.each(f);
            }
        }
    }

    /// Wrap this step so `hook` runs depending on its outcome.
    pub fn with_hook(self, kind: HookKind, hook: StepConfig) -> StepConfig {
        let hooked = HookStep {
            step: Box::new(self),
            hook: Box::new(hook),
        };

        match kind {
            HookKind::OnSuccess => StepConfig::OnSuccess(hooked),
            HookKind::OnFailure => StepConfig::OnFailure(hooked),
            HookKind::OnAbort => StepConfig::OnAbort(hooked),
            HookKind::OnError => StepConfig::OnError(hooked),
            HookKind::Ensure => StepConfig::Ensure(hooked),
        }
    }
}

/// Hooks in the order they wrap a step, innermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    OnSuccess,
    OnFailure,
    OnAbort,
    OnError,
    Ensure,
}

impl HookKind {
    pub const ALL: [HookKind; 5] = [
        HookKind::OnSuccess,
        HookKind::OnFailure,
        HookKind::OnAbort,
        HookKind::OnError,
        HookKind::Ensure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::OnSuccess => "on_success",
            HookKind::OnFailure => "on_failure",
            HookKind::OnAbort => "on_abort",
            HookKind::OnError => "on_error",
            HookKind::Ensure => "ensure",
        }
    }
}

/// Fetch a version of a resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetStep {
    /// The name the fetched artifact is known by inside the build.
    pub name: String,
    /// The pipeline resource to fetch; defaults to `name`.
    pub resource: Option<String>,
    pub params: Params,
    pub tags: Tags,
    /// Upstream jobs a version must have passed through.
    pub passed: Vec<String>,
    pub trigger: bool,
}

impl GetStep {
    pub fn resource_name(&self) -> &str {
        self.resource.as_deref().unwrap_or(&self.name)
    }
}

/// Push to a resource, producing a new version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PutStep {
    pub name: String,
    /// The pipeline resource to push to; defaults to `name`.
    pub resource: Option<String>,
    pub params: Params,
    /// Params for the implicit get of the produced version.
    pub get_params: Params,
    pub inputs: Option<PutInputs>,
    pub tags: Tags,
}

impl PutStep {
    pub fn resource_name(&self) -> &str {
        self.resource.as_deref().unwrap_or(&self.name)
    }
}

/// Which build artifacts a put step's container receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PutInputs {
    Keyword(InputsKeyword),
    Only(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputsKeyword {
    All,
    Detect,
}

/// Run a task in a container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskStep {
    pub name: String,
    pub privileged: bool,
    pub config_path: Option<String>,
    pub config: Option<serde_json::Value>,
    pub container_limits: Option<ContainerLimits>,
    pub vars: Params,
    pub params: Params,
    pub tags: Tags,
    pub input_mapping: BTreeMap<String, String>,
    pub output_mapping: BTreeMap<String, String>,
    /// Artifact to use as the task's image instead of the one in its config.
    pub image_artifact_name: Option<String>,
}

/// Resource limits applied to a task container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,
}

/// Configure a pipeline from a file produced by the build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetPipelineStep {
    pub name: String,
    pub file: String,
    pub team: Option<String>,
    pub vars: Params,
    pub var_files: Vec<String>,
    pub instance_vars: Params,
}

/// Load a value from a file into a build-local var.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadVarStep {
    pub name: String,
    pub file: String,
    pub format: Option<String>,
    pub reveal: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InParallelStep {
    pub steps: Vec<StepConfig>,
    /// Maximum concurrently running steps; 0 means unbounded.
    pub limit: u32,
    pub fail_fast: bool,
}

/// Run a step once for every combination of the given vars.
#[derive(Debug, Clone, PartialEq)]
pub struct AcrossStep {
    pub step: Box<StepConfig>,
    pub vars: Vec<AcrossVarConfig>,
    pub fail_fast: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcrossVarConfig {
    pub var: String,
    pub values: Vec<serde_json::Value>,
    /// Defaults to one combination at a time along this axis.
    pub max_in_flight: Option<MaxInFlight>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutStep {
    pub step: Box<StepConfig>,
    pub duration: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryStep {
    pub step: Box<StepConfig>,
    pub attempts: u32,
}

/// A primary step paired with a conditional (or, for ensure, unconditional) hook.
#[derive(Debug, Clone, PartialEq)]
pub struct HookStep {
    pub step: Box<StepConfig>,
    pub hook: Box<StepConfig>,
}

/// How many instances may run at once: a fixed count, or all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxInFlight {
    All,
    Limit(u32),
}

impl Default for MaxInFlight {
    fn default() -> Self {
        MaxInFlight::Limit(1)
    }
}

impl fmt::Display for MaxInFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxInFlight::All => f.write_str("all"),
            MaxInFlight::Limit(n) => write!(f, "{n}"),
        }
    }
}

impl Serialize for MaxInFlight {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MaxInFlight::All => serializer.serialize_str("all"),
            MaxInFlight::Limit(n) => serializer.serialize_u32(*n),
        }
    }
}

impl<'de> Deserialize<'de> for MaxInFlight {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MaxInFlightVisitor;

        impl Visitor<'_> for MaxInFlightVisitor {
            type Value = MaxInFlight;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("\"all\" or a positive integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<MaxInFlight, E> {
                if v == "all" {
                    Ok(MaxInFlight::All)
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(v), &self))
                }
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<MaxInFlight, E> {
                u32::try_from(v)
                    .map(MaxInFlight::Limit)
                    .map_err(|_| E::invalid_value(de::Unexpected::Unsigned(v), &self))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<MaxInFlight, E> {
                u32::try_from(v)
                    .map(MaxInFlight::Limit)
                    .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
            }
        }

        deserializer.deserialize_any(MaxInFlightVisitor)
    }
}
