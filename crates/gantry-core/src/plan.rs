//! Compiled build plans.
//!
//! A [`Plan`] is the executable form of a job's step configuration: a tree of
//! typed nodes, each with an id that is unique within the build. Plans are
//! handed to the execution engine as-is, and the engine may serialize them to
//! JSON for transport, so field names here are part of the wire contract.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::resource::{Params, Source, Tags, Version, VersionedResourceTypes};
use crate::step::{ContainerLimits, MaxInFlight, PutInputs};

/// Identifier of a plan node.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(transparent)]
pub struct PlanId(String);

impl PlanId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id of a synthetic sub-plan derived from this one, e.g. `7/image-get`.
    pub fn child(&self, suffix: &str) -> Self {
        Self(format!("{}/{}", self.0, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Hands out plan ids from a monotonically increasing counter.
///
/// Ids are rendered in lowercase hex. A factory shared between compilations
/// never hands out the same id twice.
#[derive(Debug)]
pub struct PlanFactory {
    current: AtomicU64,
}

impl PlanFactory {
    pub fn new(start: u64) -> Self {
        Self {
            current: AtomicU64::new(start),
        }
    }

    pub fn next_id(&self) -> PlanId {
        let id = self.current.fetch_add(1, Ordering::Relaxed) + 1;
        PlanId(format!("{id:x}"))
    }

    pub fn new_plan(&self, step: PlanStep) -> Plan {
        Plan {
            id: self.next_id(),
            step,
        }
    }
}

/// A node of the compiled plan tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    #[serde(flatten)]
    pub step: PlanStep,
}

/// The single populated variant of a plan node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStep {
    Get(GetPlan),
    Put(PutPlan),
    Check(CheckPlan),
    Task(TaskPlan),
    SetPipeline(SetPipelinePlan),
    LoadVar(LoadVarPlan),

    Do(Vec<Plan>),
    InParallel(InParallelPlan),
    Across(AcrossPlan),

    OnSuccess(OnSuccessPlan),
    OnFailure(OnFailurePlan),
    OnAbort(OnAbortPlan),
    OnError(OnErrorPlan),
    Ensure(EnsurePlan),

    Try(TryPlan),
    Timeout(TimeoutPlan),
    Retry(Vec<Plan>),
}

impl Plan {
    /// Call `f` on this plan and every plan nested inside it, including
    /// hook plans and image check/get plans.
    pub fn each<'a>(&'a self, f: &mut dyn FnMut(&'a Plan)) {
        f(self);
        for child in self.children() {
            child.each(f);
        }
    }

    /// Mutable counterpart of [`Plan::each`].
    pub fn each_mut(&mut self, f: &mut dyn FnMut(&mut Plan)) {
        f(self);
        for child in self.children_mut() {
            child.each_mut(f);
        }
    }

    /// Direct sub-plans of this node.
    pub fn children(&self) -> Vec<&Plan> {
        match &self.step {
            PlanStep::Get(get) => get.type_image.plans().collect(),
            PlanStep::Put(put) => put.type_image.plans().collect(),
            PlanStep::Check(check) => check.type_image.plans().collect(),
            PlanStep::Task(_) | PlanStep::SetPipeline(_) | PlanStep::LoadVar(_) => Vec::new(),
            PlanStep::Do(plans) | PlanStep::Retry(plans) => plans.iter().collect(),
            PlanStep::InParallel(in_parallel) => in_parallel.steps.iter().collect(),
            PlanStep::Across(across) => across.steps.iter().map(|s| &s.step).collect(),
            PlanStep::OnSuccess(p) => vec![&*p.step, &*p.next],
            PlanStep::OnFailure(p) => vec![&*p.step, &*p.next],
            PlanStep::OnAbort(p) => vec![&*p.step, &*p.next],
            PlanStep::OnError(p) => vec![&*p.step, &*p.next],
            PlanStep::Ensure(p) => vec![&*p.step, &*p.next],
            PlanStep::Try(p) => vec![&*p.step],
            PlanStep::Timeout(p) => vec![&*p.step],
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Plan> {
        match &mut self.step {
            PlanStep::Get(get) => get.type_image.plans_mut(),
            PlanStep::Put(put) => put.type_image.plans_mut(),
            PlanStep::Check(check) => check.type_image.plans_mut(),
            PlanStep::Task(_) | PlanStep::SetPipeline(_) | PlanStep::LoadVar(_) => Vec::new(),
            PlanStep::Do(plans) | PlanStep::Retry(plans) => plans.iter_mut().collect(),
            PlanStep::InParallel(in_parallel) => in_parallel.steps.iter_mut().collect(),
            PlanStep::Across(across) => across.steps.iter_mut().map(|s| &mut s.step).collect(),
            PlanStep::OnSuccess(p) => vec![&mut *p.step, &mut *p.next],
            PlanStep::OnFailure(p) => vec![&mut *p.step, &mut *p.next],
            PlanStep::OnAbort(p) => vec![&mut *p.step, &mut *p.next],
            PlanStep::OnError(p) => vec![&mut *p.step, &mut *p.next],
            PlanStep::Ensure(p) => vec![&mut *p.step, &mut *p.next],
            PlanStep::Try(p) => vec![&mut *p.step],
            PlanStep::Timeout(p) => vec![&mut *p.step],
        }
    }
}

/// How the container image for a resource step is obtained: either a base
/// type provided by workers, or check/get plans for a custom type's image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeImage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_type: Option<String>,
    #[serde(rename = "image_check_plan", skip_serializing_if = "Option::is_none")]
    pub check_plan: Option<Box<Plan>>,
    #[serde(rename = "image_get_plan", skip_serializing_if = "Option::is_none")]
    pub get_plan: Option<Box<Plan>>,
    /// Whether the parent resource type runs privileged.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub privileged: bool,
}

impl TypeImage {
    pub fn base(base_type: impl Into<String>) -> Self {
        Self {
            base_type: Some(base_type.into()),
            ..Default::default()
        }
    }

    fn plans(&self) -> impl Iterator<Item = &Plan> {
        self.check_plan
            .as_deref()
            .into_iter()
            .chain(self.get_plan.as_deref())
    }

    fn plans_mut(&mut self) -> Vec<&mut Plan> {
        self.check_plan
            .as_deref_mut()
            .into_iter()
            .chain(self.get_plan.as_deref_mut())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetPlan {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub source: Source,
    #[serde(skip_serializing_if = "VersionedResourceTypes::is_empty")]
    pub resource_types: VersionedResourceTypes,
    #[serde(flatten)]
    pub type_image: TypeImage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_from: Option<PlanId>,
    #[serde(skip_serializing_if = "Params::is_empty")]
    pub params: Params,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PutPlan {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub source: Source,
    #[serde(skip_serializing_if = "VersionedResourceTypes::is_empty")]
    pub resource_types: VersionedResourceTypes,
    #[serde(flatten)]
    pub type_image: TypeImage,
    #[serde(skip_serializing_if = "Params::is_empty")]
    pub params: Params,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<PutInputs>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Tags,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub expose_build_created_by: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckPlan {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub source: Source,
    #[serde(skip_serializing_if = "VersionedResourceTypes::is_empty")]
    pub resource_types: VersionedResourceTypes,
    #[serde(flatten)]
    pub type_image: TypeImage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_version: Option<Version>,
    /// Pipeline resource the checked versions are saved against.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource: String,
    /// Pipeline resource type the checked versions are saved against.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub interval: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPlan {
    pub name: String,
    pub privileged: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Tags,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_limits: Option<ContainerLimits>,
    #[serde(rename = "image", skip_serializing_if = "String::is_empty")]
    pub image_artifact_name: String,
    #[serde(skip_serializing_if = "Params::is_empty")]
    pub vars: Params,
    #[serde(skip_serializing_if = "Params::is_empty")]
    pub params: Params,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub input_mapping: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub output_mapping: BTreeMap<String, String>,
    /// Available for fetching the task's own image.
    #[serde(skip_serializing_if = "VersionedResourceTypes::is_empty")]
    pub resource_types: VersionedResourceTypes,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetPipelinePlan {
    pub name: String,
    pub file: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub team: String,
    #[serde(skip_serializing_if = "Params::is_empty")]
    pub vars: Params,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub var_files: Vec<String>,
    #[serde(skip_serializing_if = "Params::is_empty")]
    pub instance_vars: Params,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadVarPlan {
    pub name: String,
    pub file: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub format: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub reveal: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InParallelPlan {
    pub steps: Vec<Plan>,
    #[serde(skip_serializing_if = "is_zero")]
    pub limit: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fail_fast: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcrossPlan {
    pub vars: Vec<AcrossVar>,
    pub steps: Vec<VarScopedPlan>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fail_fast: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcrossVar {
    #[serde(rename = "name")]
    pub var: String,
    pub values: Vec<serde_json::Value>,
    pub max_in_flight: MaxInFlight,
}

/// One combination of across values and the plan compiled for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarScopedPlan {
    pub step: Plan,
    pub values: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnSuccessPlan {
    pub step: Box<Plan>,
    #[serde(rename = "on_success")]
    pub next: Box<Plan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnFailurePlan {
    pub step: Box<Plan>,
    #[serde(rename = "on_failure")]
    pub next: Box<Plan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnAbortPlan {
    pub step: Box<Plan>,
    #[serde(rename = "on_abort")]
    pub next: Box<Plan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnErrorPlan {
    pub step: Box<Plan>,
    #[serde(rename = "on_error")]
    pub next: Box<Plan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsurePlan {
    pub step: Box<Plan>,
    #[serde(rename = "ensure")]
    pub next: Box<Plan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TryPlan {
    pub step: Box<Plan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutPlan {
    pub step: Box<Plan>,
    pub duration: String,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}
