//! Builds and their resolved inputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::id::BuildId;
use crate::resource::Version;

/// Lifecycle status of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    /// Queued, not yet claimed by a scheduler.
    Pending,
    /// Claimed by exactly one scheduler pass, not yet handed to the engine.
    Scheduled,
    Started,
    Succeeded,
    Failed,
    Errored,
    Aborted,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Scheduled => "scheduled",
            BuildStatus::Started => "started",
            BuildStatus::Succeeded => "succeeded",
            BuildStatus::Failed => "failed",
            BuildStatus::Errored => "errored",
            BuildStatus::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Succeeded | BuildStatus::Failed | BuildStatus::Errored | BuildStatus::Aborted
        )
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "pending" => Ok(BuildStatus::Pending),
            "scheduled" => Ok(BuildStatus::Scheduled),
            "started" => Ok(BuildStatus::Started),
            "succeeded" => Ok(BuildStatus::Succeeded),
            "failed" => Ok(BuildStatus::Failed),
            "errored" => Ok(BuildStatus::Errored),
            "aborted" => Ok(BuildStatus::Aborted),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown build status: {other}"
            ))),
        }
    }
}

/// A build of a job (or a one-off build).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub id: BuildId,
    /// Build number within its job, e.g. "42" or "42.1" for a rerun.
    pub name: String,
    pub team_name: String,
    pub pipeline_name: Option<String>,
    pub job_name: Option<String>,
    pub status: BuildStatus,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Build {
    pub fn is_one_off(&self) -> bool {
        self.job_name.is_none()
    }
}

/// A resolved version for one of a job's inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildInput {
    /// Name of the get step the version is for.
    pub name: String,
    pub resource: String,
    pub version: Version,
    /// Whether this version had not been used by the job before.
    #[serde(default)]
    pub first_occurrence: bool,
    /// The upstream build that produced this version, if it came through `passed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_build_id: Option<BuildId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            BuildStatus::Pending,
            BuildStatus::Scheduled,
            BuildStatus::Started,
            BuildStatus::Succeeded,
            BuildStatus::Failed,
            BuildStatus::Errored,
            BuildStatus::Aborted,
        ] {
            assert_eq!(status.as_str().parse::<BuildStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<BuildStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!BuildStatus::Pending.is_terminal());
        assert!(!BuildStatus::Scheduled.is_terminal());
        assert!(!BuildStatus::Started.is_terminal());
        assert!(BuildStatus::Errored.is_terminal());
        assert!(BuildStatus::Aborted.is_terminal());
    }
}
