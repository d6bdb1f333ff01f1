//! Decides whether a job may start another build right now.

use std::sync::Arc;

use gantry_core::{BuildId, JobConfig};
use gantry_db::{DbResult, SerialGroupRepo};
use tracing::{debug, warn};

pub struct MaxInFlightUpdater {
    repo: Arc<dyn SerialGroupRepo>,
}

impl MaxInFlightUpdater {
    pub fn new(repo: Arc<dyn SerialGroupRepo>) -> Self {
        Self { repo }
    }

    /// Whether the job's in-flight limit stops `build_id` from starting.
    ///
    /// The outcome is always recorded against the job.
    pub async fn update_max_in_flight_reached(
        &self,
        job: &JobConfig,
        build_id: BuildId,
    ) -> DbResult<bool> {
        let reached = self.is_max_in_flight_reached(job, build_id).await?;
        self.repo
            .set_max_in_flight_reached(&job.name, reached)
            .await?;
        Ok(reached)
    }

    async fn is_max_in_flight_reached(&self, job: &JobConfig, build_id: BuildId) -> DbResult<bool> {
        let max_in_flight = job.max_in_flight();
        if max_in_flight == 0 {
            return Ok(false);
        }

        let serial_groups = job.serial_groups();
        let running = self
            .repo
            .running_builds_by_serial_group(&job.name, &serial_groups)
            .await?;

        if running.len() >= max_in_flight as usize {
            debug!(job = %job.name, running = running.len(), max_in_flight, "max in flight reached");
            return Ok(true);
        }

        let Some(next) = self
            .repo
            .next_pending_build_by_serial_group(&job.name, &serial_groups)
            .await?
        else {
            warn!(job = %job.name, build_id = %build_id, "next pending build in serial group not found");
            return Ok(true);
        };

        if next.id != build_id {
            debug!(job = %job.name, build_id = %build_id, next = %next.id, "another build is next in line");
            return Ok(true);
        }

        Ok(false)
    }
}
