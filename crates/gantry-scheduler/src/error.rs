//! Scheduler error types.

use gantry_db::DbError;
use thiserror::Error;

/// Why a job's step configuration could not be compiled into a plan.
///
/// These are configuration problems: retrying without a config change
/// fails the same way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("unknown resource: {resource}")]
    UnknownResource { resource: String },

    #[error("version for input {input} not provided")]
    VersionNotProvided { input: String },

    #[error("resource types form a cycle: {chain}")]
    CyclicResourceType { chain: String },
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("engine error: {0}")]
    Engine(#[from] gantry_core::Error),
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
