//! Periodically starts pending builds for every job in a pipeline.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashSet;
use futures::StreamExt;
use gantry_config::PipelineConfig;
use gantry_core::JobConfig;
use gantry_db::{ComponentRepo, LockFactory, LockId, SCHEDULER};
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::build_starter::BuildStarter;

pub struct SchedulerRunner {
    pipeline: Arc<PipelineConfig>,
    starter: BuildStarter,
    components: Arc<dyn ComponentRepo>,
    locks: Arc<dyn LockFactory>,
    concurrency: usize,
    interval: Duration,
    /// Jobs this process is scheduling right now.
    scheduling: DashSet<String>,
}

/// Drops a job from the in-process scheduling set.
struct Scheduling<'a> {
    job: &'a str,
    scheduling: &'a DashSet<String>,
}

impl Drop for Scheduling<'_> {
    fn drop(&mut self) {
        self.scheduling.remove(self.job);
    }
}

impl SchedulerRunner {
    pub fn new(
        pipeline: Arc<PipelineConfig>,
        starter: BuildStarter,
        components: Arc<dyn ComponentRepo>,
        locks: Arc<dyn LockFactory>,
        concurrency: usize,
        interval: Duration,
    ) -> Self {
        Self {
            pipeline,
            starter,
            components,
            locks,
            concurrency,
            interval,
            scheduling: DashSet::new(),
        }
    }

    /// Schedule on every tick until `shutdown` completes.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            pipeline = %self.starter.pipeline_name(),
            jobs = self.pipeline.jobs.len(),
            interval = ?self.interval,
            "scheduler running"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => self.tick().await,
            }
        }

        info!("scheduler stopped");
    }

    /// One scheduling pass, gated on the scheduler component.
    pub async fn tick(&self) {
        let component = match self.components.find_component(SCHEDULER).await {
            Ok(Some(component)) => component,
            Ok(None) => {
                warn!(component = SCHEDULER, "component not found");
                return;
            }
            Err(e) => {
                error!(component = SCHEDULER, error = %e, "failed to look up component");
                return;
            }
        };

        if component.paused {
            debug!(component = SCHEDULER, "component is paused");
            return;
        }

        if !component.interval_elapsed(Utc::now()) {
            debug!(component = SCHEDULER, "interval not elapsed");
            return;
        }

        self.schedule_all().await;

        if let Err(e) = self.components.update_last_ran(SCHEDULER, Utc::now()).await {
            error!(component = SCHEDULER, error = %e, "failed to update last ran");
        }
    }

    async fn schedule_all(&self) {
        futures::stream::iter(&self.pipeline.jobs)
            .for_each_concurrent(self.concurrency, |job| {
                let span = info_span!(
                    "schedule",
                    pipeline = %self.starter.pipeline_name(),
                    job = %job.name,
                );
                self.schedule_job(job).instrument(span)
            })
            .await;
    }

    async fn schedule_job(&self, job: &JobConfig) {
        if !self.scheduling.insert(job.name.clone()) {
            debug!("job already being scheduled");
            return;
        }
        let _scheduling = Scheduling {
            job: &job.name,
            scheduling: &self.scheduling,
        };

        let lock_id = LockId::job_scheduling(self.starter.pipeline_name(), &job.name);
        let lock = match self.locks.acquire(lock_id).await {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                debug!("job scheduling lock held elsewhere");
                return;
            }
            Err(e) => {
                error!(error = %e, "failed to acquire job scheduling lock");
                return;
            }
        };

        if let Err(e) = self
            .starter
            .try_start_all_pending_builds(
                job,
                &self.pipeline.resources,
                &self.pipeline.resource_types,
            )
            .await
        {
            error!(error = %e, "failed to schedule job");
        }

        if let Err(e) = lock.release().await {
            warn!(error = %e, "failed to release job scheduling lock");
        }
    }
}
