//! Build scheduling for Gantry.
//!
//! Compiles job step trees into build plans, starts pending builds under
//! serial-group and max-in-flight limits, and resumes started builds across
//! restarts and hand-offs between instances.

pub mod build_starter;
pub mod error;
mod image;
pub mod max_in_flight;
pub mod planner;
pub mod resumes;
pub mod scheduler;
pub mod tracker;
pub mod tracker_runner;

#[cfg(test)]
mod testing;

pub use build_starter::BuildStarter;
pub use error::{PlanError, SchedulerError, SchedulerResult};
pub use max_in_flight::MaxInFlightUpdater;
pub use planner::Planner;
pub use resumes::Resumes;
pub use scheduler::SchedulerRunner;
pub use tracker::Tracker;
pub use tracker_runner::TrackerRunner;
