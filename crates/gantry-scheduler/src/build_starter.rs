//! Starts a job's pending builds, one at a time, for as long as it can.

use std::sync::Arc;

use dashmap::DashMap;
use gantry_core::{
    Build, BuildId, BuildInput, BuildStatus, Engine, JobConfig, SchedulerResources,
    VersionedResourceTypes,
};
use gantry_db::{PipelineRepo, SerialGroupRepo};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::SchedulerResult;
use crate::max_in_flight::MaxInFlightUpdater;
use crate::planner::Planner;
use crate::resumes::Resumes;

/// Engine hand-offs tried for one scheduled build before it is errored.
pub const DEFAULT_MAX_ENGINE_ATTEMPTS: u32 = 5;

/// What became of a claimed build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handoff {
    Started,
    /// The plan could not be compiled and the build was errored.
    Errored,
    /// The engine refused it; the build is still scheduled.
    EngineFailed,
}

pub struct BuildStarter {
    pipeline: Arc<dyn PipelineRepo>,
    max_in_flight: MaxInFlightUpdater,
    planner: Planner,
    engine: Arc<dyn Engine>,
    resumes: Resumes,
    engine_failures: DashMap<BuildId, u32>,
    max_engine_attempts: u32,
}

impl BuildStarter {
    pub fn new(
        pipeline: Arc<dyn PipelineRepo>,
        serial_groups: Arc<dyn SerialGroupRepo>,
        planner: Planner,
        engine: Arc<dyn Engine>,
    ) -> Self {
        Self {
            pipeline,
            max_in_flight: MaxInFlightUpdater::new(serial_groups),
            planner,
            engine,
            resumes: Resumes::new(),
            engine_failures: DashMap::new(),
            max_engine_attempts: DEFAULT_MAX_ENGINE_ATTEMPTS,
        }
    }

    /// Share the tracker's set of resumed builds, so a build started here is
    /// not adopted a second time when its start is announced.
    pub fn with_resumes(mut self, resumes: Resumes) -> Self {
        self.resumes = resumes;
        self
    }

    /// Error a scheduled build once the engine has refused it this many
    /// times. Zero retries forever.
    pub fn with_max_engine_attempts(mut self, attempts: u32) -> Self {
        self.max_engine_attempts = attempts;
        self
    }

    pub fn pipeline_name(&self) -> &str {
        self.pipeline.pipeline_name()
    }

    /// Start pending builds of `job` in order until one cannot be started.
    ///
    /// Builds left scheduled by an earlier engine failure are handed to the
    /// engine again first. Stops quietly when there is nothing to start, the
    /// job is gated, or another scheduler claimed the build first. Database
    /// errors end the pass and are returned.
    pub async fn try_start_all_pending_builds(
        &self,
        job: &JobConfig,
        resources: &SchedulerResources,
        resource_types: &VersionedResourceTypes,
    ) -> SchedulerResult<()> {
        self.retry_scheduled_builds(job, resources, resource_types)
            .await?;

        while self
            .try_start_next_pending_build(job, resources, resource_types)
            .await?
        {}

        Ok(())
    }

    /// Hand builds that were claimed but never started to the engine again.
    ///
    /// Runs under the job's scheduling lock, so a scheduled build seen here
    /// is not mid-hand-off in another instance.
    async fn retry_scheduled_builds(
        &self,
        job: &JobConfig,
        resources: &SchedulerResources,
        resource_types: &VersionedResourceTypes,
    ) -> SchedulerResult<()> {
        let builds = self.pipeline.scheduled_builds(&job.name).await?;
        if builds.is_empty() {
            return Ok(());
        }

        if self.pipeline.is_paused().await? || self.pipeline.get_job(&job.name).await?.paused {
            debug!(job = %job.name, "paused, not retrying scheduled builds");
            return Ok(());
        }

        for build in builds {
            if self.resumes.contains(build.id) {
                continue;
            }

            let inputs = self.pipeline.build_inputs(build.id).await?;
            info!(job = %job.name, build_id = %build.id, "retrying scheduled build");

            let handoff = self
                .hand_off(job, &build, &inputs, resources, resource_types)
                .await;
            if handoff == Handoff::EngineFailed {
                break;
            }
        }

        Ok(())
    }

    /// Returns whether the loop should move on to the next pending build.
    async fn try_start_next_pending_build(
        &self,
        job: &JobConfig,
        resources: &SchedulerResources,
        resource_types: &VersionedResourceTypes,
    ) -> SchedulerResult<bool> {
        let Some(build) = self.pipeline.next_pending_build(&job.name).await? else {
            debug!(job = %job.name, "no pending build");
            return Ok(false);
        };

        if self
            .max_in_flight
            .update_max_in_flight_reached(job, build.id)
            .await?
        {
            debug!(job = %job.name, build_id = %build.id, "max in flight reached");
            return Ok(false);
        }

        let Some(inputs) = self.pipeline.next_build_inputs(&job.name).await? else {
            debug!(job = %job.name, build_id = %build.id, "next build inputs not determined");
            return Ok(false);
        };

        if self.pipeline.is_paused().await? {
            debug!(job = %job.name, pipeline = %self.pipeline.pipeline_name(), "pipeline is paused");
            return Ok(false);
        }

        if self.pipeline.get_job(&job.name).await?.paused {
            debug!(job = %job.name, "job is paused");
            return Ok(false);
        }

        if !self.pipeline.update_build_to_scheduled(build.id).await? {
            debug!(job = %job.name, build_id = %build.id, "build already scheduled elsewhere");
            return Ok(false);
        }

        self.pipeline.use_inputs_for_build(build.id, &inputs).await?;

        self.hand_off(job, &build, &inputs, resources, resource_types)
            .await;
        Ok(true)
    }

    /// Compile the plan of a scheduled build and give it to the engine.
    async fn hand_off(
        &self,
        job: &JobConfig,
        build: &Build,
        inputs: &[BuildInput],
        resources: &SchedulerResources,
        resource_types: &VersionedResourceTypes,
    ) -> Handoff {
        let plan = match self
            .planner
            .create(&job.step_config(), resources, resource_types, inputs)
        {
            Ok(plan) => plan,
            Err(e) => {
                error!(job = %job.name, build_id = %build.id, error = %e, "failed to create build plan");
                self.error_build(build.id).await;
                return Handoff::Errored;
            }
        };

        // Claimed before the engine announces the start, so the tracker
        // cannot adopt the build in between.
        let claim = self.resumes.claim(build.id);

        let engine_build = match self.engine.create_build(build, plan).await {
            Ok(engine_build) => engine_build,
            Err(e) => {
                error!(job = %job.name, build_id = %build.id, error = %e, "failed to create engine build");
                self.record_engine_failure(build.id).await;
                return Handoff::EngineFailed;
            }
        };
        self.engine_failures.remove(&build.id);

        info!(job = %job.name, build_id = %build.id, build = %build.name, "started build");

        let Some(claim) = claim else {
            debug!(build_id = %build.id, "build is already being resumed");
            return Handoff::Started;
        };

        let span = info_span!(
            "resume",
            pipeline = %self.pipeline.pipeline_name(),
            job = %job.name,
            build_id = %build.id,
        );
        tokio::spawn(
            async move {
                let _claim = claim;
                engine_build.resume().await;
            }
            .instrument(span),
        );

        Handoff::Started
    }

    /// The build stays scheduled and is retried on a later pass until it
    /// runs out of attempts. Attempts are counted per process, so a restart
    /// grants a fresh set.
    async fn record_engine_failure(&self, id: BuildId) {
        let attempts = {
            let mut failures = self.engine_failures.entry(id).or_insert(0);
            *failures += 1;
            *failures
        };

        if self.max_engine_attempts == 0 || attempts < self.max_engine_attempts {
            return;
        }

        warn!(build_id = %id, attempts, "engine refused build too many times, erroring it");
        self.engine_failures.remove(&id);
        self.error_build(id).await;
    }

    async fn error_build(&self, id: BuildId) {
        if let Err(e) = self.pipeline.finish_build(id, BuildStatus::Errored).await {
            error!(build_id = %id, error = %e, "failed to mark build as errored");
        }
    }
}
