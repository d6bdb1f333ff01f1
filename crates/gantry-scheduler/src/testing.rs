//! Hand-written fakes for the persistence and engine traits.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gantry_core::{Build, BuildId, BuildInput, BuildStatus, Engine, EngineBuild, Plan};
use gantry_db::{
    BuildRepo, Component, ComponentRepo, DbError, DbResult, JobRecord, PipelineRepo,
    SerialGroupRepo,
};
use tokio::sync::{mpsc, watch};

pub(crate) fn build(id: i64, job: &str, status: BuildStatus) -> Build {
    Build {
        id: BuildId::new(id),
        name: id.to_string(),
        team_name: "main".to_string(),
        pipeline_name: Some("some-pipeline".to_string()),
        job_name: Some(job.to_string()),
        status,
        create_time: Utc::now(),
        start_time: None,
        end_time: None,
    }
}

fn unavailable() -> DbError {
    DbError::InvalidData("database unavailable".to_string())
}

#[derive(Default)]
pub(crate) struct FakeSerialGroupRepo {
    pub running: Vec<Build>,
    pub next_pending: Option<Build>,
    pub running_calls: Mutex<Vec<Vec<String>>>,
    pub next_pending_calls: Mutex<usize>,
    pub reached: Mutex<Vec<(String, bool)>>,
}

#[async_trait]
impl SerialGroupRepo for FakeSerialGroupRepo {
    async fn running_builds_by_serial_group(
        &self,
        _job: &str,
        groups: &[String],
    ) -> DbResult<Vec<Build>> {
        self.running_calls.lock().unwrap().push(groups.to_vec());
        Ok(self.running.clone())
    }

    async fn next_pending_build_by_serial_group(
        &self,
        _job: &str,
        _groups: &[String],
    ) -> DbResult<Option<Build>> {
        *self.next_pending_calls.lock().unwrap() += 1;
        Ok(self.next_pending.clone())
    }

    async fn set_max_in_flight_reached(&self, job: &str, reached: bool) -> DbResult<()> {
        self.reached.lock().unwrap().push((job.to_string(), reached));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct PipelineState {
    pub pending: Vec<Build>,
    /// `None` while inputs are undetermined.
    pub inputs: Option<Vec<BuildInput>>,
    pub paused: bool,
    pub job_paused: bool,
    /// Another scheduler claims every build first.
    pub lose_claims: bool,
    pub fail_inputs_lookup: bool,
    /// Jobs whose pending-build lookup fails.
    pub failing_jobs: Vec<String>,
    pub fail_finish: bool,
    pub scheduled: Vec<BuildId>,
    /// Claimed builds; they count as started once the engine created them.
    pub claimed: Vec<Build>,
    pub used_inputs: Vec<BuildId>,
    pub recorded_inputs: Vec<(BuildId, Vec<BuildInput>)>,
    pub finished: Vec<(BuildId, BuildStatus)>,
}

#[derive(Default)]
pub(crate) struct FakePipelineRepo {
    pub state: Mutex<PipelineState>,
    engine: Option<Arc<FakeEngine>>,
}

impl FakePipelineRepo {
    pub fn with_state(state: PipelineState) -> Self {
        Self {
            state: Mutex::new(state),
            engine: None,
        }
    }

    /// Treat builds `engine` created as started, like the handoff engine
    /// does in the database.
    pub fn started_by(mut self, engine: Arc<FakeEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    fn engine_started(&self) -> Vec<BuildId> {
        self.engine
            .as_ref()
            .map(|engine| engine.created.lock().unwrap().iter().map(|(id, _)| *id).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PipelineRepo for FakePipelineRepo {
    fn pipeline_name(&self) -> &str {
        "some-pipeline"
    }

    async fn next_pending_build(&self, job: &str) -> DbResult<Option<Build>> {
        let state = self.state.lock().unwrap();
        if state.failing_jobs.iter().any(|j| j == job) {
            return Err(unavailable());
        }
        Ok(state
            .pending
            .iter()
            .find(|b| b.job_name.as_deref() == Some(job))
            .cloned())
    }

    async fn next_build_inputs(&self, _job: &str) -> DbResult<Option<Vec<BuildInput>>> {
        let state = self.state.lock().unwrap();
        if state.fail_inputs_lookup {
            return Err(unavailable());
        }
        Ok(state.inputs.clone())
    }

    async fn is_paused(&self) -> DbResult<bool> {
        Ok(self.state.lock().unwrap().paused)
    }

    async fn get_job(&self, job: &str) -> DbResult<JobRecord> {
        Ok(JobRecord {
            name: job.to_string(),
            paused: self.state.lock().unwrap().job_paused,
            max_in_flight_reached: false,
        })
    }

    async fn update_build_to_scheduled(&self, id: BuildId) -> DbResult<bool> {
        let mut state = self.state.lock().unwrap();
        let claimed = state.pending.iter().find(|b| b.id == id).cloned();
        state.pending.retain(|b| b.id != id);
        if state.lose_claims {
            return Ok(false);
        }
        state.scheduled.push(id);
        if let Some(build) = claimed {
            state.claimed.push(Build {
                status: BuildStatus::Scheduled,
                ..build
            });
        }
        Ok(true)
    }

    async fn use_inputs_for_build(&self, id: BuildId, inputs: &[BuildInput]) -> DbResult<()> {
        let mut state = self.state.lock().unwrap();
        state.used_inputs.push(id);
        state.recorded_inputs.push((id, inputs.to_vec()));
        Ok(())
    }

    async fn scheduled_builds(&self, job: &str) -> DbResult<Vec<Build>> {
        let started = self.engine_started();
        let state = self.state.lock().unwrap();
        Ok(state
            .claimed
            .iter()
            .filter(|b| b.job_name.as_deref() == Some(job))
            .filter(|b| !started.contains(&b.id))
            .filter(|b| !state.finished.iter().any(|(id, _)| *id == b.id))
            .cloned()
            .collect())
    }

    async fn build_inputs(&self, id: BuildId) -> DbResult<Vec<BuildInput>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .recorded_inputs
            .iter()
            .rev()
            .find(|(build, _)| *build == id)
            .map(|(_, inputs)| inputs.clone())
            .unwrap_or_default())
    }

    async fn finish_build(&self, id: BuildId, status: BuildStatus) -> DbResult<()> {
        let mut state = self.state.lock().unwrap();
        state.finished.push((id, status));
        if state.fail_finish {
            return Err(unavailable());
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeBuildRepo {
    pub started: Mutex<Vec<Build>>,
    pub fail: AtomicBool,
}

impl FakeBuildRepo {
    pub fn with_started(builds: Vec<Build>) -> Self {
        Self {
            started: Mutex::new(builds),
            ..Default::default()
        }
    }
}

#[async_trait]
impl BuildRepo for FakeBuildRepo {
    async fn all_started_builds(&self) -> DbResult<Vec<Build>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self.started.lock().unwrap().clone())
    }

    async fn find_build(&self, id: BuildId) -> DbResult<Option<Build>> {
        Ok(self
            .started
            .lock()
            .unwrap()
            .iter()
            .find(|b| b.id == id)
            .cloned())
    }

    async fn start_build(&self, _id: BuildId, _plan: &Plan) -> DbResult<bool> {
        Ok(true)
    }

    async fn finish_build(&self, _id: BuildId, _status: BuildStatus) -> DbResult<()> {
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeComponentRepo {
    pub component: Mutex<Option<Component>>,
    pub fail: AtomicBool,
    pub last_ran_updates: Mutex<Vec<DateTime<Utc>>>,
}

impl FakeComponentRepo {
    pub fn with_component(component: Component) -> Self {
        Self {
            component: Mutex::new(Some(component)),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ComponentRepo for FakeComponentRepo {
    async fn find_component(&self, _name: &str) -> DbResult<Option<Component>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self.component.lock().unwrap().clone())
    }

    async fn register_component(&self, name: &str, interval: Duration) -> DbResult<Component> {
        let mut component = self.component.lock().unwrap();
        let registered = component.get_or_insert_with(|| Component {
            name: name.to_string(),
            paused: false,
            interval,
            last_ran: None,
        });
        registered.interval = interval;
        Ok(registered.clone())
    }

    async fn update_last_ran(&self, _name: &str, at: DateTime<Utc>) -> DbResult<()> {
        self.last_ran_updates.lock().unwrap().push(at);
        if let Some(component) = self.component.lock().unwrap().as_mut() {
            component.last_ran = Some(at);
        }
        Ok(())
    }
}

/// An engine that records what it was asked to do.
///
/// Resumes report their build id on a channel and then wait while resumes
/// are held.
pub(crate) struct FakeEngine {
    pub fail_create: AtomicBool,
    pub created: Mutex<Vec<(BuildId, Plan)>>,
    pub new_builds: Mutex<Vec<BuildId>>,
    pub releases: AtomicUsize,
    resumed: mpsc::UnboundedSender<BuildId>,
    hold: watch::Sender<bool>,
}

impl FakeEngine {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BuildId>) {
        let (resumed, rx) = mpsc::unbounded_channel();
        let engine = Self {
            fail_create: AtomicBool::new(false),
            created: Mutex::new(Vec::new()),
            new_builds: Mutex::new(Vec::new()),
            releases: AtomicUsize::new(0),
            resumed,
            hold: watch::Sender::new(false),
        };
        (engine, rx)
    }

    pub fn hold_resumes(&self, hold: bool) {
        self.hold.send_replace(hold);
    }

    fn handle(&self, id: BuildId) -> Box<dyn EngineBuild> {
        Box::new(FakeEngineBuild {
            id,
            resumed: self.resumed.clone(),
            hold: self.hold.subscribe(),
        })
    }
}

#[async_trait]
impl Engine for FakeEngine {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create_build(
        &self,
        build: &Build,
        plan: Plan,
    ) -> gantry_core::Result<Box<dyn EngineBuild>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(gantry_core::Error::EngineUnavailable(
                "no workers".to_string(),
            ));
        }
        self.created.lock().unwrap().push((build.id, plan));
        Ok(self.handle(build.id))
    }

    fn new_build(&self, build: Build) -> Box<dyn EngineBuild> {
        self.new_builds.lock().unwrap().push(build.id);
        self.handle(build.id)
    }

    async fn release_all(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeEngineBuild {
    id: BuildId,
    resumed: mpsc::UnboundedSender<BuildId>,
    hold: watch::Receiver<bool>,
}

#[async_trait]
impl EngineBuild for FakeEngineBuild {
    fn build_id(&self) -> BuildId {
        self.id
    }

    async fn resume(&self) {
        let _ = self.resumed.send(self.id);
        let mut hold = self.hold.clone();
        let _ = hold.wait_for(|held| !held).await;
    }
}
