//! An engine for executors that run outside the orchestrator process.
//!
//! Creating a build stores its plan and marks it started; the executor picks
//! it up from there. Resuming only watches the build until it finishes, so
//! the tracker knows when to let go of it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gantry_core::{Build, BuildId, Engine, EngineBuild, Plan};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::notifications::{BUILD_STARTED, Notifications};
use crate::repo::BuildRepo;

pub struct HandoffEngine {
    builds: Arc<dyn BuildRepo>,
    notifications: Arc<dyn Notifications>,
    poll_interval: Duration,
    released: watch::Sender<bool>,
}

impl HandoffEngine {
    pub fn new(
        builds: Arc<dyn BuildRepo>,
        notifications: Arc<dyn Notifications>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            builds,
            notifications,
            poll_interval,
            released: watch::Sender::new(false),
        }
    }

    fn handle(&self, id: BuildId) -> HandoffBuild {
        HandoffBuild {
            id,
            builds: Arc::clone(&self.builds),
            poll_interval: self.poll_interval,
            released: self.released.subscribe(),
        }
    }
}

#[async_trait]
impl Engine for HandoffEngine {
    fn name(&self) -> &'static str {
        "handoff"
    }

    async fn create_build(&self, build: &Build, plan: Plan) -> gantry_core::Result<Box<dyn EngineBuild>> {
        if !self.builds.start_build(build.id, &plan).await? {
            return Err(gantry_core::Error::Conflict(format!(
                "build {} is no longer scheduled",
                build.id
            )));
        }
        info!(build_id = %build.id, plan_id = %plan.id, "handed off build");

        if let Err(e) = self.notifications.notify(BUILD_STARTED).await {
            warn!(build_id = %build.id, error = %e, "failed to announce started build");
        }

        Ok(Box::new(self.handle(build.id)))
    }

    fn new_build(&self, build: Build) -> Box<dyn EngineBuild> {
        Box::new(self.handle(build.id))
    }

    async fn release_all(&self) {
        self.released.send_replace(true);
    }
}

struct HandoffBuild {
    id: BuildId,
    builds: Arc<dyn BuildRepo>,
    poll_interval: Duration,
    released: watch::Receiver<bool>,
}

#[async_trait]
impl EngineBuild for HandoffBuild {
    fn build_id(&self) -> BuildId {
        self.id
    }

    async fn resume(&self) {
        let mut released = self.released.clone();

        loop {
            if *released.borrow_and_update() {
                debug!(build_id = %self.id, "engine released");
                return;
            }

            match self.builds.find_build(self.id).await {
                Ok(Some(build)) if build.status.is_terminal() => {
                    debug!(build_id = %self.id, status = %build.status, "build finished");
                    return;
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    warn!(build_id = %self.id, "build disappeared");
                    return;
                }
                Err(e) => warn!(build_id = %self.id, error = %e, "failed to look up build"),
            }

            tokio::select! {
                changed = released.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
