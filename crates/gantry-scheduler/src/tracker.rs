//! Resumes builds that are already running.

use std::sync::Arc;

use gantry_core::Engine;
use gantry_db::{BuildRepo, DbResult};
use tracing::{Instrument, debug, info_span};

use crate::resumes::Resumes;

pub struct Tracker {
    builds: Arc<dyn BuildRepo>,
    engine: Arc<dyn Engine>,
    resumes: Resumes,
}

impl Tracker {
    pub fn new(builds: Arc<dyn BuildRepo>, engine: Arc<dyn Engine>) -> Self {
        Self {
            builds,
            engine,
            resumes: Resumes::new(),
        }
    }

    /// The set of builds being resumed, to share with the build starter.
    pub fn resumes(&self) -> Resumes {
        self.resumes.clone()
    }

    /// Resume every started build that is not already being resumed.
    ///
    /// Returns once the resumes are dispatched.
    pub async fn track(&self) -> DbResult<()> {
        let builds = self.builds.all_started_builds().await?;

        for build in builds {
            let Some(claim) = self.resumes.claim(build.id) else {
                continue;
            };
            let span = info_span!(
                "resume",
                build_id = %build.id,
                pipeline = build.pipeline_name.as_deref().unwrap_or_default(),
                job = build.job_name.as_deref().unwrap_or_default(),
            );
            let engine = Arc::clone(&self.engine);

            debug!(build_id = %build.id, "tracking build");
            tokio::spawn(
                async move {
                    let _claim = claim;
                    engine.new_build(build).resume().await;
                }
                .instrument(span),
            );
        }

        Ok(())
    }

    /// Stop driving builds without aborting them.
    pub async fn release(&self) {
        self.engine.release_all().await;
    }

    /// Number of builds currently being resumed.
    pub fn in_flight(&self) -> usize {
        self.resumes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBuildRepo, FakeEngine, build};
    use gantry_core::{BuildId, BuildStatus};
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn tracker(builds: Vec<i64>) -> (Tracker, Arc<FakeBuildRepo>, Arc<FakeEngine>, UnboundedReceiver<BuildId>) {
        let repo = Arc::new(FakeBuildRepo::with_started(
            builds
                .into_iter()
                .map(|id| build(id, "some-job", BuildStatus::Started))
                .collect(),
        ));
        let (engine, resumed) = FakeEngine::new();
        let engine = Arc::new(engine);
        let tracker = Tracker::new(repo.clone(), engine.clone());
        (tracker, repo, engine, resumed)
    }

    async fn settle(tracker: &Tracker) {
        while tracker.in_flight() > 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_resumes_every_started_build() {
        let (tracker, _repo, engine, mut resumed) = tracker(vec![1, 2]);

        tracker.track().await.unwrap();

        let mut ids = vec![resumed.recv().await.unwrap(), resumed.recv().await.unwrap()];
        ids.sort();
        assert_eq!(ids, vec![BuildId::new(1), BuildId::new(2)]);

        settle(&tracker).await;
        let mut created = engine.new_builds.lock().unwrap().clone();
        created.sort();
        assert_eq!(created, vec![BuildId::new(1), BuildId::new(2)]);
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_resumed_once() {
        let (tracker, _repo, engine, mut resumed) = tracker(vec![1, 1]);
        engine.hold_resumes(true);

        tracker.track().await.unwrap();
        assert_eq!(resumed.recv().await, Some(BuildId::new(1)));
        tokio::task::yield_now().await;

        assert_eq!(*engine.new_builds.lock().unwrap(), vec![BuildId::new(1)]);
        assert_eq!(tracker.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_builds_are_not_adopted_again() {
        let (tracker, _repo, engine, mut resumed) = tracker(vec![1]);
        engine.hold_resumes(true);

        tracker.track().await.unwrap();
        assert_eq!(resumed.recv().await, Some(BuildId::new(1)));
        tracker.track().await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(engine.new_builds.lock().unwrap().len(), 1);

        engine.hold_resumes(false);
        settle(&tracker).await;

        tracker.track().await.unwrap();
        assert_eq!(resumed.recv().await, Some(BuildId::new(1)));
        assert_eq!(engine.new_builds.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_returned() {
        let (tracker, repo, engine, _resumed) = tracker(vec![1]);
        repo.fail.store(true, Ordering::SeqCst);

        assert!(tracker.track().await.is_err());
        assert!(engine.new_builds.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_releases_the_engine() {
        let (tracker, _repo, engine, _resumed) = tracker(vec![]);

        tracker.release().await;

        assert_eq!(engine.releases.load(Ordering::SeqCst), 1);
    }
}
