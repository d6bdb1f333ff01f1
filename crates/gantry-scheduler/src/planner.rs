//! Compiles a job's step configuration into an executable plan.

use std::sync::Arc;

use gantry_core::plan::{
    AcrossPlan, AcrossVar, EnsurePlan, GetPlan, InParallelPlan, LoadVarPlan, OnAbortPlan,
    OnErrorPlan, OnFailurePlan, OnSuccessPlan, PutPlan, SetPipelinePlan, TaskPlan, TimeoutPlan,
    TryPlan, VarScopedPlan,
};
use gantry_core::step::{
    AcrossStep, AcrossVarConfig, GetStep, HookStep, InParallelStep, LoadVarStep, PutStep,
    RetryStep, SetPipelineStep, TaskStep,
};
use gantry_core::{
    BuildInput, Plan, PlanFactory, PlanStep, SchedulerResource, SchedulerResources, StepConfig,
    VersionedResourceTypes,
};
use serde_json::Value;

use crate::error::PlanError;
use crate::image::resolve_type_image;

/// Turns step configuration into plans.
///
/// Holds no state besides the id factory, which is shared by every
/// compilation so no two plans ever carry the same id.
#[derive(Debug, Clone)]
pub struct Planner {
    factory: Arc<PlanFactory>,
}

impl Planner {
    pub fn new(factory: Arc<PlanFactory>) -> Self {
        Self { factory }
    }

    pub fn create(
        &self,
        step: &StepConfig,
        resources: &SchedulerResources,
        resource_types: &VersionedResourceTypes,
        inputs: &[BuildInput],
    ) -> Result<Plan, PlanError> {
        let compiler = Compiler {
            factory: &self.factory,
            resources,
            resource_types,
            inputs,
        };
        compiler.visit(step)
    }
}

struct Compiler<'a> {
    factory: &'a PlanFactory,
    resources: &'a SchedulerResources,
    resource_types: &'a VersionedResourceTypes,
    inputs: &'a [BuildInput],
}

impl Compiler<'_> {
    fn visit(&self, step: &StepConfig) -> Result<Plan, PlanError> {
        match step {
            StepConfig::Get(get) => self.visit_get(get),
            StepConfig::Put(put) => self.visit_put(put),
            StepConfig::Task(task) => Ok(self.visit_task(task)),
            StepConfig::SetPipeline(set_pipeline) => Ok(self.visit_set_pipeline(set_pipeline)),
            StepConfig::LoadVar(load_var) => Ok(self.visit_load_var(load_var)),
            StepConfig::Do(steps) => {
                let plans = self.visit_all(steps)?;
                Ok(self.factory.new_plan(PlanStep::Do(plans)))
            }
            StepConfig::InParallel(in_parallel) => self.visit_in_parallel(in_parallel),
            StepConfig::Across(across) => self.visit_across(across),
            StepConfig::Try(inner) => {
                let plan = self.visit(inner)?;
                Ok(self.factory.new_plan(PlanStep::Try(TryPlan {
                    step: Box::new(plan),
                })))
            }
            StepConfig::Timeout(timeout) => {
                let plan = self.visit(&timeout.step)?;
                Ok(self.factory.new_plan(PlanStep::Timeout(TimeoutPlan {
                    step: Box::new(plan),
                    duration: timeout.duration.clone(),
                })))
            }
            StepConfig::Retry(retry) => self.visit_retry(retry),
            StepConfig::OnSuccess(hook) => {
                let (step, next) = self.visit_hook(hook)?;
                Ok(self
                    .factory
                    .new_plan(PlanStep::OnSuccess(OnSuccessPlan { step, next })))
            }
            StepConfig::OnFailure(hook) => {
                let (step, next) = self.visit_hook(hook)?;
                Ok(self
                    .factory
                    .new_plan(PlanStep::OnFailure(OnFailurePlan { step, next })))
            }
            StepConfig::OnAbort(hook) => {
                let (step, next) = self.visit_hook(hook)?;
                Ok(self
                    .factory
                    .new_plan(PlanStep::OnAbort(OnAbortPlan { step, next })))
            }
            StepConfig::OnError(hook) => {
                let (step, next) = self.visit_hook(hook)?;
                Ok(self
                    .factory
                    .new_plan(PlanStep::OnError(OnErrorPlan { step, next })))
            }
            StepConfig::Ensure(hook) => {
                let (step, next) = self.visit_hook(hook)?;
                Ok(self.factory.new_plan(PlanStep::Ensure(EnsurePlan { step, next })))
            }
        }
    }

    fn visit_all(&self, steps: &[StepConfig]) -> Result<Vec<Plan>, PlanError> {
        steps.iter().map(|step| self.visit(step)).collect()
    }

    fn visit_hook(&self, hook: &HookStep) -> Result<(Box<Plan>, Box<Plan>), PlanError> {
        let step = self.visit(&hook.step)?;
        let next = self.visit(&hook.hook)?;
        Ok((Box::new(step), Box::new(next)))
    }

    fn resource(&self, name: &str) -> Result<SchedulerResource, PlanError> {
        let mut resource = self
            .resources
            .lookup(name)
            .cloned()
            .ok_or_else(|| PlanError::UnknownResource {
                resource: name.to_string(),
            })?;
        resource.apply_source_defaults(self.resource_types);
        Ok(resource)
    }

    fn visit_get(&self, step: &GetStep) -> Result<Plan, PlanError> {
        let resource_name = step.resource_name();
        let resource = self.resource(resource_name)?;

        let version = self
            .inputs
            .iter()
            .find(|input| input.name == step.name)
            .map(|input| input.version.clone())
            .ok_or_else(|| PlanError::VersionNotProvided {
                input: step.name.clone(),
            })?;

        let id = self.factory.next_id();
        let type_image = resolve_type_image(&id, &resource.type_, self.resource_types, &step.tags)?;

        Ok(Plan {
            id,
            step: PlanStep::Get(GetPlan {
                name: step.name.clone(),
                type_: resource.type_,
                source: resource.source,
                resource_types: self.resource_types.clone(),
                type_image,
                version: Some(version),
                version_from: None,
                params: step.params.clone(),
                resource: resource_name.to_string(),
                tags: step.tags.clone(),
            }),
        })
    }

    fn visit_put(&self, step: &PutStep) -> Result<Plan, PlanError> {
        let resource_name = step.resource_name();
        let resource = self.resource(resource_name)?;

        let put_id = self.factory.next_id();
        let put = Plan {
            step: PlanStep::Put(PutPlan {
                name: step.name.clone(),
                type_: resource.type_.clone(),
                source: resource.source.clone(),
                resource_types: self.resource_types.clone(),
                type_image: resolve_type_image(
                    &put_id,
                    &resource.type_,
                    self.resource_types,
                    &step.tags,
                )?,
                params: step.params.clone(),
                inputs: step.inputs.clone(),
                resource: resource_name.to_string(),
                tags: step.tags.clone(),
                expose_build_created_by: resource.expose_build_created_by,
            }),
            id: put_id.clone(),
        };

        // The version the put produced is fetched so later steps can use it.
        let get_id = self.factory.next_id();
        let get = Plan {
            step: PlanStep::Get(GetPlan {
                name: step.name.clone(),
                type_: resource.type_.clone(),
                source: resource.source,
                resource_types: self.resource_types.clone(),
                type_image: resolve_type_image(
                    &get_id,
                    &resource.type_,
                    self.resource_types,
                    &step.tags,
                )?,
                version: None,
                version_from: Some(put_id),
                params: step.get_params.clone(),
                resource: resource_name.to_string(),
                tags: step.tags.clone(),
            }),
            id: get_id,
        };

        Ok(self.factory.new_plan(PlanStep::OnSuccess(OnSuccessPlan {
            step: Box::new(put),
            next: Box::new(get),
        })))
    }

    fn visit_task(&self, step: &TaskStep) -> Plan {
        self.factory.new_plan(PlanStep::Task(TaskPlan {
            name: step.name.clone(),
            privileged: step.privileged,
            tags: step.tags.clone(),
            config_path: step.config_path.clone().unwrap_or_default(),
            config: step.config.clone(),
            container_limits: step.container_limits.clone(),
            image_artifact_name: step.image_artifact_name.clone().unwrap_or_default(),
            vars: step.vars.clone(),
            params: step.params.clone(),
            input_mapping: step.input_mapping.clone(),
            output_mapping: step.output_mapping.clone(),
            resource_types: self.resource_types.clone(),
        }))
    }

    fn visit_set_pipeline(&self, step: &SetPipelineStep) -> Plan {
        self.factory.new_plan(PlanStep::SetPipeline(SetPipelinePlan {
            name: step.name.clone(),
            file: step.file.clone(),
            team: step.team.clone().unwrap_or_default(),
            vars: step.vars.clone(),
            var_files: step.var_files.clone(),
            instance_vars: step.instance_vars.clone(),
        }))
    }

    fn visit_load_var(&self, step: &LoadVarStep) -> Plan {
        self.factory.new_plan(PlanStep::LoadVar(LoadVarPlan {
            name: step.name.clone(),
            file: step.file.clone(),
            format: step.format.clone().unwrap_or_default(),
            reveal: step.reveal,
        }))
    }

    fn visit_in_parallel(&self, step: &InParallelStep) -> Result<Plan, PlanError> {
        let steps = self.visit_all(&step.steps)?;
        Ok(self.factory.new_plan(PlanStep::InParallel(InParallelPlan {
            steps,
            limit: step.limit,
            fail_fast: step.fail_fast,
        })))
    }

    fn visit_across(&self, step: &AcrossStep) -> Result<Plan, PlanError> {
        let vars = step
            .vars
            .iter()
            .map(|var| AcrossVar {
                var: var.var.clone(),
                values: var.values.clone(),
                max_in_flight: var.max_in_flight.unwrap_or_default(),
            })
            .collect();

        let steps = cartesian_product(&step.vars)
            .into_iter()
            .map(|values| {
                Ok(VarScopedPlan {
                    step: self.visit(&step.step)?,
                    values,
                })
            })
            .collect::<Result<Vec<_>, PlanError>>()?;

        Ok(self.factory.new_plan(PlanStep::Across(AcrossPlan {
            vars,
            steps,
            fail_fast: step.fail_fast,
        })))
    }

    fn visit_retry(&self, step: &RetryStep) -> Result<Plan, PlanError> {
        let attempts = (0..step.attempts)
            .map(|_| self.visit(&step.step))
            .collect::<Result<Vec<_>, PlanError>>()?;
        Ok(self.factory.new_plan(PlanStep::Retry(attempts)))
    }
}

/// Every combination of the vars' values, with later vars varying fastest.
fn cartesian_product(vars: &[AcrossVarConfig]) -> Vec<Vec<Value>> {
    vars.iter().fold(vec![Vec::new()], |combinations, var| {
        combinations
            .iter()
            .flat_map(|prefix| {
                var.values.iter().map(move |value| {
                    let mut combination = prefix.clone();
                    combination.push(value.clone());
                    combination
                })
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::VersionedResourceType;
    use gantry_core::plan::PlanId;
    use gantry_core::resource::{Source, Version};
    use gantry_core::step::{HookKind, MaxInFlight, PutInputs, TimeoutStep};
    use serde_json::json;
    use std::collections::{BTreeMap, HashSet};

    fn resources() -> SchedulerResources {
        SchedulerResources::new(vec![SchedulerResource {
            name: "some-resource".to_string(),
            type_: "some-resource-type".to_string(),
            source: Source::from([("some".to_string(), json!("source"))]),
            ..Default::default()
        }])
    }

    fn resource_types() -> VersionedResourceTypes {
        VersionedResourceTypes::new(vec![VersionedResourceType {
            name: "some-resource-type".to_string(),
            type_: "some-base-resource-type".to_string(),
            source: Source::from([("some".to_string(), json!("type-source"))]),
            defaults: Source::from([("default-key".to_string(), json!("default-value"))]),
            version: Some(Version::from([(
                "some".to_string(),
                "type-version".to_string(),
            )])),
            ..Default::default()
        }])
    }

    fn resource_types_json() -> Value {
        json!([{
            "name": "some-resource-type",
            "type": "some-base-resource-type",
            "source": {"some": "type-source"},
            "defaults": {"default-key": "default-value"},
            "version": {"some": "type-version"}
        }])
    }

    fn image_get_json(id: &str) -> Value {
        json!({
            "id": id,
            "get": {
                "name": "some-resource-type",
                "type": "some-base-resource-type",
                "source": {"some": "type-source"},
                "base_type": "some-base-resource-type",
                "version": {"some": "type-version"},
                "tags": ["tag-1"]
            }
        })
    }

    fn input(name: &str) -> BuildInput {
        BuildInput {
            name: name.to_string(),
            resource: "some-resource".to_string(),
            version: Version::from([("some".to_string(), "version".to_string())]),
            ..Default::default()
        }
    }

    fn load_var(name: &str) -> StepConfig {
        StepConfig::LoadVar(LoadVarStep {
            name: name.to_string(),
            file: "some-file".to_string(),
            ..Default::default()
        })
    }

    fn planner() -> Planner {
        Planner::new(Arc::new(PlanFactory::new(0)))
    }

    fn compile(step: &StepConfig, inputs: &[BuildInput]) -> Result<Plan, PlanError> {
        planner().create(step, &resources(), &resource_types(), inputs)
    }

    fn ids(plan: &Plan) -> Vec<PlanId> {
        let mut ids = Vec::new();
        plan.each(&mut |p| ids.push(p.id.clone()));
        ids
    }

    fn assert_unique_ids(plan: &Plan) {
        let mut seen = HashSet::new();
        for id in ids(plan) {
            assert!(!id.is_empty());
            assert!(seen.insert(id.clone()), "duplicate plan id {id}");
        }
    }

    fn without_ids(mut plan: Plan) -> Value {
        assert_unique_ids(&plan);
        plan.each_mut(&mut |p| p.id = PlanId::new("(unique)"));
        serde_json::to_value(&plan).unwrap()
    }

    #[test]
    fn test_get_step() {
        let step = StepConfig::Get(GetStep {
            name: "some-name".to_string(),
            resource: Some("some-resource".to_string()),
            params: BTreeMap::from([("some".to_string(), json!("params"))]),
            tags: vec!["tag-1".to_string()],
            ..Default::default()
        });

        let plan = compile(&step, &[input("some-name")]).unwrap();

        assert_eq!(
            serde_json::to_value(&plan).unwrap(),
            json!({
                "id": "1",
                "get": {
                    "name": "some-name",
                    "type": "some-resource-type",
                    "resource": "some-resource",
                    "source": {"some": "source", "default-key": "default-value"},
                    "base_type": "some-base-resource-type",
                    "params": {"some": "params"},
                    "version": {"some": "version"},
                    "tags": ["tag-1"],
                    "resource_types": resource_types_json(),
                    "image_get_plan": image_get_json("1/image-get")
                }
            })
        );
    }

    #[test]
    fn test_get_step_resource_defaults_to_name() {
        let step = StepConfig::Get(GetStep {
            name: "some-resource".to_string(),
            ..Default::default()
        });

        let plan = compile(&step, &[input("some-resource")]).unwrap();

        let PlanStep::Get(get) = plan.step else {
            panic!("expected get plan");
        };
        assert_eq!(get.resource, "some-resource");
    }

    #[test]
    fn test_get_step_without_input_fails() {
        let step = StepConfig::Get(GetStep {
            name: "x".to_string(),
            resource: Some("some-resource".to_string()),
            ..Default::default()
        });

        let err = compile(&step, &[input("y")]).unwrap_err();

        assert_eq!(
            err,
            PlanError::VersionNotProvided {
                input: "x".to_string()
            }
        );
    }

    #[test]
    fn test_get_step_unknown_resource_fails() {
        let step = StepConfig::Get(GetStep {
            name: "some-name".to_string(),
            resource: Some("bogus".to_string()),
            ..Default::default()
        });

        let err = compile(&step, &[input("some-name")]).unwrap_err();

        assert_eq!(
            err,
            PlanError::UnknownResource {
                resource: "bogus".to_string()
            }
        );
    }

    #[test]
    fn test_put_step_unknown_resource_fails() {
        let step = StepConfig::Put(PutStep {
            name: "bogus".to_string(),
            ..Default::default()
        });

        let err = compile(&step, &[]).unwrap_err();

        assert_eq!(
            err,
            PlanError::UnknownResource {
                resource: "bogus".to_string()
            }
        );
    }

    #[test]
    fn test_put_step_fetches_what_it_produced() {
        let step = StepConfig::Put(PutStep {
            name: "some-name".to_string(),
            resource: Some("some-resource".to_string()),
            params: BTreeMap::from([("some".to_string(), json!("params"))]),
            get_params: BTreeMap::from([("some".to_string(), json!("get-params"))]),
            inputs: Some(PutInputs::Only(vec!["some-input".to_string()])),
            tags: vec!["tag-1".to_string()],
        });

        let plan = compile(&step, &[]).unwrap();

        assert_eq!(
            serde_json::to_value(&plan).unwrap(),
            json!({
                "id": "3",
                "on_success": {
                    "step": {
                        "id": "1",
                        "put": {
                            "name": "some-name",
                            "type": "some-resource-type",
                            "resource": "some-resource",
                            "source": {"some": "source", "default-key": "default-value"},
                            "base_type": "some-base-resource-type",
                            "params": {"some": "params"},
                            "inputs": ["some-input"],
                            "tags": ["tag-1"],
                            "resource_types": resource_types_json(),
                            "image_get_plan": image_get_json("1/image-get")
                        }
                    },
                    "on_success": {
                        "id": "2",
                        "get": {
                            "name": "some-name",
                            "type": "some-resource-type",
                            "resource": "some-resource",
                            "source": {"some": "source", "default-key": "default-value"},
                            "base_type": "some-base-resource-type",
                            "params": {"some": "get-params"},
                            "version_from": "1",
                            "tags": ["tag-1"],
                            "resource_types": resource_types_json(),
                            "image_get_plan": image_get_json("2/image-get")
                        }
                    }
                }
            })
        );
    }

    #[test]
    fn test_task_step() {
        let step = StepConfig::Task(TaskStep {
            name: "some-task".to_string(),
            privileged: true,
            config_path: Some("some/config/path.yml".to_string()),
            params: BTreeMap::from([("some".to_string(), json!("params"))]),
            tags: vec!["tag-1".to_string()],
            input_mapping: BTreeMap::from([("repo".to_string(), "some-name".to_string())]),
            image_artifact_name: Some("some-image".to_string()),
            ..Default::default()
        });

        let plan = compile(&step, &[]).unwrap();

        assert_eq!(
            serde_json::to_value(&plan).unwrap(),
            json!({
                "id": "1",
                "task": {
                    "name": "some-task",
                    "privileged": true,
                    "config_path": "some/config/path.yml",
                    "params": {"some": "params"},
                    "tags": ["tag-1"],
                    "input_mapping": {"repo": "some-name"},
                    "image": "some-image",
                    "resource_types": resource_types_json()
                }
            })
        );
    }

    #[test]
    fn test_set_pipeline_and_load_var_steps() {
        let step = StepConfig::Do(vec![
            StepConfig::SetPipeline(SetPipelineStep {
                name: "some-pipeline".to_string(),
                file: "some-file".to_string(),
                team: Some("some-team".to_string()),
                var_files: vec!["vars.yml".to_string()],
                ..Default::default()
            }),
            StepConfig::LoadVar(LoadVarStep {
                name: "some-var".to_string(),
                file: "some-file".to_string(),
                format: Some("json".to_string()),
                reveal: true,
            }),
        ]);

        let plan = compile(&step, &[]).unwrap();

        assert_eq!(
            without_ids(plan),
            json!({
                "id": "(unique)",
                "do": [
                    {
                        "id": "(unique)",
                        "set_pipeline": {
                            "name": "some-pipeline",
                            "file": "some-file",
                            "team": "some-team",
                            "var_files": ["vars.yml"]
                        }
                    },
                    {
                        "id": "(unique)",
                        "load_var": {
                            "name": "some-var",
                            "file": "some-file",
                            "format": "json",
                            "reveal": true
                        }
                    }
                ]
            })
        );
    }

    #[test]
    fn test_in_parallel_try_and_timeout() {
        let step = StepConfig::InParallel(InParallelStep {
            steps: vec![
                StepConfig::Try(Box::new(load_var("a"))),
                StepConfig::Timeout(TimeoutStep {
                    step: Box::new(load_var("b")),
                    duration: "1h".to_string(),
                }),
            ],
            limit: 2,
            fail_fast: true,
        });

        let plan = compile(&step, &[]).unwrap();

        assert_eq!(
            without_ids(plan),
            json!({
                "id": "(unique)",
                "in_parallel": {
                    "steps": [
                        {
                            "id": "(unique)",
                            "try": {
                                "step": {"id": "(unique)", "load_var": {"name": "a", "file": "some-file"}}
                            }
                        },
                        {
                            "id": "(unique)",
                            "timeout": {
                                "step": {"id": "(unique)", "load_var": {"name": "b", "file": "some-file"}},
                                "duration": "1h"
                            }
                        }
                    ],
                    "limit": 2,
                    "fail_fast": true
                }
            })
        );
    }

    #[test]
    fn test_retry_compiles_each_attempt() {
        let step = StepConfig::Retry(RetryStep {
            step: Box::new(load_var("some-var")),
            attempts: 3,
        });

        let plan = compile(&step, &[]).unwrap();

        assert_eq!(plan.id, PlanId::new("4"));
        let PlanStep::Retry(attempts) = &plan.step else {
            panic!("expected retry plan");
        };
        let attempt_ids: Vec<_> = attempts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(attempt_ids, vec!["1", "2", "3"]);
        assert!(attempts.iter().all(|p| p.step == attempts[0].step));
    }

    #[test]
    fn test_across_visits_every_combination() {
        let step = StepConfig::Across(AcrossStep {
            step: Box::new(load_var("some-var")),
            vars: vec![
                AcrossVarConfig {
                    var: "v1".to_string(),
                    values: vec![json!("a1"), json!("a2")],
                    max_in_flight: None,
                },
                AcrossVarConfig {
                    var: "v2".to_string(),
                    values: vec![json!("b1"), json!("b2")],
                    max_in_flight: Some(MaxInFlight::All),
                },
            ],
            fail_fast: true,
        });

        let plan = compile(&step, &[]).unwrap();
        assert_unique_ids(&plan);

        let PlanStep::Across(across) = &plan.step else {
            panic!("expected across plan");
        };
        let combinations: Vec<_> = across.steps.iter().map(|s| s.values.clone()).collect();
        assert_eq!(
            combinations,
            vec![
                vec![json!("a1"), json!("b1")],
                vec![json!("a1"), json!("b2")],
                vec![json!("a2"), json!("b1")],
                vec![json!("a2"), json!("b2")],
            ]
        );
        assert_eq!(across.vars[0].max_in_flight, MaxInFlight::Limit(1));
        assert_eq!(across.vars[1].max_in_flight, MaxInFlight::All);
        assert!(across.fail_fast);
    }

    #[test]
    fn test_hooks_pair_step_with_hook() {
        for kind in HookKind::ALL {
            let step = load_var("primary").with_hook(kind, load_var("hook"));

            let plan = compile(&step, &[]).unwrap();

            assert_eq!(
                without_ids(plan),
                json!({
                    "id": "(unique)",
                    kind.as_str(): {
                        "step": {"id": "(unique)", "load_var": {"name": "primary", "file": "some-file"}},
                        kind.as_str(): {"id": "(unique)", "load_var": {"name": "hook", "file": "some-file"}}
                    }
                }),
                "hook {}",
                kind.as_str()
            );
        }
    }

    #[test]
    fn test_errors_abort_the_whole_compile() {
        let step = StepConfig::Do(vec![
            load_var("fine"),
            StepConfig::Put(PutStep {
                name: "bogus".to_string(),
                ..Default::default()
            }),
        ]);

        assert!(matches!(
            compile(&step, &[]),
            Err(PlanError::UnknownResource { .. })
        ));
    }

    #[test]
    fn test_ids_are_unique_across_a_deep_tree() {
        let get = StepConfig::Get(GetStep {
            name: "some-resource".to_string(),
            ..Default::default()
        });
        let put = StepConfig::Put(PutStep {
            name: "some-resource".to_string(),
            ..Default::default()
        });
        let step = StepConfig::Across(AcrossStep {
            step: Box::new(StepConfig::Retry(RetryStep {
                step: Box::new(StepConfig::InParallel(InParallelStep {
                    steps: vec![get, put],
                    ..Default::default()
                })),
                attempts: 2,
            })),
            vars: vec![AcrossVarConfig {
                var: "v".to_string(),
                values: vec![json!(1), json!(2)],
                max_in_flight: None,
            }],
            fail_fast: false,
        })
        .with_hook(HookKind::Ensure, load_var("cleanup"));

        let plan = compile(&step, &[input("some-resource")]).unwrap();

        assert_unique_ids(&plan);
    }

    #[test]
    fn test_separate_compiles_never_share_ids() {
        let planner = planner();
        let step = load_var("some-var");

        let first = planner
            .create(&step, &resources(), &resource_types(), &[])
            .unwrap();
        let second = planner
            .create(&step, &resources(), &resource_types(), &[])
            .unwrap();

        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_job_hooks_wrap_the_whole_plan() {
        let job = gantry_core::JobConfig {
            name: "some-job".to_string(),
            plan: vec![load_var("a"), load_var("b")],
            on_failure: Some(load_var("alert")),
            ensure: Some(load_var("cleanup")),
            ..Default::default()
        };

        let plan = compile(&job.step_config(), &[]).unwrap();

        let value = without_ids(plan);
        assert_eq!(
            value["ensure"]["ensure"]["load_var"]["name"],
            json!("cleanup")
        );
        assert_eq!(
            value["ensure"]["step"]["on_failure"]["on_failure"]["load_var"]["name"],
            json!("alert")
        );
        assert_eq!(
            value["ensure"]["step"]["on_failure"]["step"]["do"]
                .as_array()
                .map(Vec::len),
            Some(2)
        );
    }
}
