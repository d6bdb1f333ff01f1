//! Resources and resource types as seen by the scheduler.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Arbitrary configuration handed to a resource type's scripts.
pub type Source = BTreeMap<String, serde_json::Value>;

/// Step parameters (get params, put params, task vars).
pub type Params = BTreeMap<String, serde_json::Value>;

/// A concrete version of a resource.
pub type Version = BTreeMap<String, String>;

/// Worker tags used for container placement.
pub type Tags = Vec<String>;

/// A pipeline resource, resolved for scheduling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerResource {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub source: Source,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Tags,
    /// Version pinned by the pipeline config or an operator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_version: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_every: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub expose_build_created_by: bool,
}

impl SchedulerResource {
    /// Merge the defaults of this resource's type underneath its own source.
    ///
    /// Keys already present in the resource's source are left untouched.
    pub fn apply_source_defaults(&mut self, resource_types: &VersionedResourceTypes) {
        if let Some(parent) = resource_types.lookup(&self.type_) {
            for (key, value) in &parent.defaults {
                self.source
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }
    }
}

/// The resources visible to one pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchedulerResources(pub Vec<SchedulerResource>);

impl SchedulerResources {
    pub fn new(resources: Vec<SchedulerResource>) -> Self {
        Self(resources)
    }

    pub fn lookup(&self, name: &str) -> Option<&SchedulerResource> {
        self.0.iter().find(|r| r.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SchedulerResource> {
        self.0.iter()
    }
}

/// A custom resource type declared by a pipeline, together with the
/// version of its image that checking last produced (if any).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionedResourceType {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub source: Source,
    #[serde(default, skip_serializing_if = "Source::is_empty")]
    pub defaults: Source,
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub params: Params,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub privileged: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Tags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_every: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
}

/// The resource types visible to one build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionedResourceTypes(pub Vec<VersionedResourceType>);

impl VersionedResourceTypes {
    pub fn new(types: Vec<VersionedResourceType>) -> Self {
        Self(types)
    }

    pub fn lookup(&self, name: &str) -> Option<&VersionedResourceType> {
        self.0.iter().find(|t| t.name == name)
    }

    /// A copy of the set with the named type removed.
    pub fn without(&self, name: &str) -> Self {
        Self(self.0.iter().filter(|t| t.name != name).cloned().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VersionedResourceType> {
        self.0.iter()
    }
}
