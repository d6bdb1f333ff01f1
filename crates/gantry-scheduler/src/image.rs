//! Resolution of the container image a resource step runs in.

use gantry_core::plan::{CheckPlan, GetPlan, TypeImage};
use std::time::Duration;

use gantry_config::format_duration;
use gantry_core::resource::{Tags, VersionedResourceTypes};
use gantry_core::{Plan, PlanId, PlanStep};

use crate::error::PlanError;

/// How often an unpinned custom type's image is checked when the type sets
/// no `check-every`.
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Work out how to obtain the image for a step of type `type_name`.
///
/// Base types resolve to themselves. A custom type produces a get plan for
/// its own image, preceded by a check plan unless its version is already
/// known. The base type at the bottom of the chain is reported on every
/// level so engines can pick a worker for it. The custom type is removed from the candidate set before its own
/// parent is resolved, so a type may shadow a base type of the same name.
pub(crate) fn resolve_type_image(
    plan_id: &PlanId,
    type_name: &str,
    resource_types: &VersionedResourceTypes,
    step_tags: &Tags,
) -> Result<TypeImage, PlanError> {
    resolve(plan_id, type_name, resource_types, step_tags, &[])
}

fn resolve(
    plan_id: &PlanId,
    type_name: &str,
    candidates: &VersionedResourceTypes,
    step_tags: &Tags,
    chain: &[String],
) -> Result<TypeImage, PlanError> {
    let Some(resource_type) = candidates.lookup(type_name) else {
        // A name already on the chain has been consumed further up. Only the
        // type directly above us may share the name, as a shadowed base type.
        if let Some(pos) = chain.iter().position(|name| name == type_name) {
            if pos + 1 != chain.len() {
                let mut cycle = chain[pos..].to_vec();
                cycle.push(type_name.to_string());
                return Err(PlanError::CyclicResourceType {
                    chain: cycle.join(" -> "),
                });
            }
        }
        return Ok(TypeImage::base(type_name));
    };

    let remaining = candidates.without(&resource_type.name);
    let mut chain = chain.to_vec();
    chain.push(resource_type.name.clone());

    let tags = if resource_type.tags.is_empty() {
        step_tags.clone()
    } else {
        resource_type.tags.clone()
    };

    let get_id = plan_id.child("image-get");
    let mut get = GetPlan {
        name: resource_type.name.clone(),
        type_: resource_type.type_.clone(),
        source: resource_type.source.clone(),
        resource_types: remaining.clone(),
        type_image: resolve(&get_id, &resource_type.type_, &remaining, &tags, &chain)?,
        version: resource_type.version.clone(),
        params: resource_type.params.clone(),
        tags: tags.clone(),
        ..Default::default()
    };

    let check_plan = match resource_type.version {
        Some(_) => None,
        None => {
            let check_id = plan_id.child("image-check");
            let check = CheckPlan {
                name: resource_type.name.clone(),
                type_: resource_type.type_.clone(),
                source: resource_type.source.clone(),
                resource_types: remaining.clone(),
                type_image: resolve(&check_id, &resource_type.type_, &remaining, &tags, &chain)?,
                resource_type: resource_type.name.clone(),
                interval: format_duration(
                    resource_type.check_every.unwrap_or(DEFAULT_CHECK_INTERVAL),
                ),
                tags,
                ..Default::default()
            };
            get.version_from = Some(check_id.clone());

            Some(Box::new(Plan {
                id: check_id,
                step: PlanStep::Check(check),
            }))
        }
    };

    Ok(TypeImage {
        base_type: get.type_image.base_type.clone(),
        check_plan,
        get_plan: Some(Box::new(Plan {
            id: get_id,
            step: PlanStep::Get(get),
        })),
        privileged: resource_type.privileged,
    })
}
