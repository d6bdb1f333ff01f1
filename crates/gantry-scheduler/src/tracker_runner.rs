//! The long-running loop that drives the build tracker.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gantry_db::{
    ATC_SHUTDOWN, BUILD_STARTED, BUILD_TRACKER, ComponentRepo, LockFactory, LockId, Notifications,
};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::SchedulerResult;
use crate::tracker::Tracker;

/// What woke the runner up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Tick,
    Notification,
}

pub struct TrackerRunner {
    tracker: Tracker,
    notifications: Arc<dyn Notifications>,
    components: Arc<dyn ComponentRepo>,
    locks: Arc<dyn LockFactory>,
    interval: Duration,
}

impl TrackerRunner {
    pub fn new(
        tracker: Tracker,
        notifications: Arc<dyn Notifications>,
        components: Arc<dyn ComponentRepo>,
        locks: Arc<dyn LockFactory>,
        interval: Duration,
    ) -> Self {
        Self {
            tracker,
            notifications,
            components,
            locks,
            interval,
        }
    }

    /// Track on every tick and on every `atc_shutdown` or `build_started`
    /// notification until `shutdown` completes.
    ///
    /// On shutdown, tracked builds are released and peers are told to take
    /// over.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> SchedulerResult<()> {
        let mut peer_shutdowns = self.notifications.listen(ATC_SHUTDOWN).await?;
        let mut builds_started = self.notifications.listen(BUILD_STARTED).await?;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval = ?self.interval, "build tracker running");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => self.try_track(Trigger::Tick).await,
                Some(_) = peer_shutdowns.recv() => {
                    debug!("peer shutting down");
                    self.try_track(Trigger::Notification).await;
                }
                Some(_) = builds_started.recv() => {
                    self.try_track(Trigger::Notification).await;
                }
            }
        }

        info!("releasing tracked builds");
        self.tracker.release().await;
        if let Err(e) = self.notifications.notify(ATC_SHUTDOWN).await {
            warn!(error = %e, "failed to notify peers of shutdown");
        }

        Ok(())
    }

    async fn try_track(&self, trigger: Trigger) {
        let lock = match self.locks.acquire(lock_name()).await {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                debug!("build tracker lock held elsewhere");
                return;
            }
            Err(e) => {
                error!(error = %e, "failed to acquire build tracker lock");
                return;
            }
        };

        self.track_if_due(trigger).await;

        if let Err(e) = lock.release().await {
            warn!(lock = %lock_name(), error = %e, "failed to release lock");
        }
    }

    async fn track_if_due(&self, trigger: Trigger) {
        let component = match self.components.find_component(BUILD_TRACKER).await {
            Ok(Some(component)) => component,
            Ok(None) => {
                warn!(component = BUILD_TRACKER, "component not found");
                return;
            }
            Err(e) => {
                error!(component = BUILD_TRACKER, error = %e, "failed to look up component");
                return;
            }
        };

        if component.paused {
            debug!(component = BUILD_TRACKER, "component is paused");
            return;
        }

        if trigger == Trigger::Tick && !component.interval_elapsed(Utc::now()) {
            debug!(component = BUILD_TRACKER, "interval not elapsed");
            return;
        }

        if let Err(e) = self.tracker.track().await {
            error!(error = %e, "failed to track builds");
            return;
        }

        if let Err(e) = self.components.update_last_ran(BUILD_TRACKER, Utc::now()).await {
            error!(component = BUILD_TRACKER, error = %e, "failed to update last ran");
        }
    }
}

fn lock_name() -> LockId {
    LockId::task(BUILD_TRACKER)
}
