//! Run the scheduler and the build tracker until asked to stop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Args;
use gantry_config::{SystemConfig, load_pipeline, load_system_config, parse_duration};
use gantry_core::{Engine, PlanFactory};
use gantry_db::{
    BUILD_TRACKER, BuildRepo, ComponentRepo, HandoffEngine, LockFactory, Notifications,
    PgBuildRepo, PgComponentRepo, PgLockFactory, PgNotifications, PgPipelineRepo, SCHEDULER,
    create_pool,
};
use gantry_scheduler::build_starter::DEFAULT_MAX_ENGINE_ATTEMPTS;
use gantry_scheduler::{BuildStarter, Planner, SchedulerRunner, Tracker, TrackerRunner};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

fn duration(raw: &str) -> Result<Duration, String> {
    parse_duration(raw).ok_or_else(|| format!("invalid duration '{raw}'"))
}

#[derive(Args)]
pub struct WebArgs {
    /// PostgreSQL connection URL
    #[arg(long, env = "GANTRY_DATABASE_URL")]
    database_url: String,

    /// Maximum database connections
    #[arg(long, env = "GANTRY_MAX_CONNECTIONS", default_value = "10")]
    max_connections: u32,

    /// Team owning the pipeline
    #[arg(long, env = "GANTRY_TEAM", default_value = "main")]
    team: String,

    /// Name of the pipeline to schedule
    #[arg(long, env = "GANTRY_PIPELINE")]
    pipeline: String,

    /// Pipeline configuration file
    #[arg(long, env = "GANTRY_PIPELINE_CONFIG")]
    pipeline_config: PathBuf,

    /// System configuration file
    #[arg(long, env = "GANTRY_SYSTEM_CONFIG")]
    system_config: Option<PathBuf>,

    /// Overrides the scheduler interval from the system configuration
    #[arg(long, env = "GANTRY_SCHEDULER_INTERVAL", value_parser = duration)]
    scheduler_interval: Option<Duration>,

    /// Overrides the number of jobs scheduled at once
    #[arg(long, env = "GANTRY_SCHEDULER_CONCURRENCY")]
    scheduler_concurrency: Option<usize>,

    /// Overrides the tracker interval from the system configuration
    #[arg(long, env = "GANTRY_TRACKER_INTERVAL", value_parser = duration)]
    tracker_interval: Option<Duration>,

    /// Overrides the minimum interval between component runs
    #[arg(long, env = "GANTRY_COMPONENT_INTERVAL", value_parser = duration)]
    component_interval: Option<Duration>,

    /// Engine hand-offs tried for a scheduled build before it is errored; 0 retries forever
    #[arg(long, env = "GANTRY_MAX_ENGINE_ATTEMPTS", default_value_t = DEFAULT_MAX_ENGINE_ATTEMPTS)]
    max_engine_attempts: u32,

    /// How often a handed-off build is checked for completion
    #[arg(long, env = "GANTRY_ENGINE_POLL_INTERVAL", value_parser = duration, default_value = "5s")]
    engine_poll_interval: Duration,
}

impl WebArgs {
    fn system_config(&self) -> Result<SystemConfig> {
        let mut config = match &self.system_config {
            Some(path) => load_system_config(path)
                .with_context(|| format!("Failed to load system config: {}", path.display()))?,
            None => SystemConfig::default(),
        };

        if let Some(interval) = self.scheduler_interval {
            config.scheduler_interval = interval;
        }
        if let Some(concurrency) = self.scheduler_concurrency {
            config.scheduler_concurrency = concurrency;
        }
        if let Some(interval) = self.tracker_interval {
            config.tracker_interval = interval;
        }
        if let Some(interval) = self.component_interval {
            config.component_interval = interval;
        }

        Ok(config)
    }
}

pub async fn run(args: WebArgs) -> Result<()> {
    let pipeline = load_pipeline(&args.pipeline_config).with_context(|| {
        format!(
            "Failed to parse pipeline config: {}",
            args.pipeline_config.display()
        )
    })?;
    pipeline.validate().context("Invalid pipeline config")?;
    let system = args.system_config()?;

    info!("Connecting to database...");
    let pool = create_pool(&args.database_url, args.max_connections).await?;
    info!("Database connected");

    let notifications: Arc<dyn Notifications> = Arc::new(PgNotifications::new(pool.clone()));
    let locks: Arc<dyn LockFactory> = Arc::new(PgLockFactory::new(pool.clone()));
    let components: Arc<dyn ComponentRepo> = Arc::new(PgComponentRepo::new(pool.clone()));
    let builds: Arc<dyn BuildRepo> = Arc::new(PgBuildRepo::new(pool.clone()));
    let pipeline_repo = Arc::new(
        PgPipelineRepo::find(pool.clone(), &args.team, &args.pipeline)
            .await
            .with_context(|| format!("Pipeline {}/{} not found", args.team, args.pipeline))?,
    );

    for name in [SCHEDULER, BUILD_TRACKER] {
        components
            .register_component(name, system.component_interval)
            .await?;
    }

    let engine: Arc<dyn Engine> = Arc::new(HandoffEngine::new(
        builds.clone(),
        notifications.clone(),
        args.engine_poll_interval,
    ));
    let planner = Planner::new(Arc::new(PlanFactory::new(plan_id_seed())));

    let tracker = Tracker::new(builds, engine.clone());
    let starter = BuildStarter::new(pipeline_repo.clone(), pipeline_repo, planner, engine)
        .with_resumes(tracker.resumes())
        .with_max_engine_attempts(args.max_engine_attempts);

    let scheduler = SchedulerRunner::new(
        Arc::new(pipeline),
        starter,
        components.clone(),
        locks.clone(),
        system.scheduler_concurrency,
        system.scheduler_interval,
    );
    let tracker = TrackerRunner::new(
        tracker,
        notifications,
        components,
        locks,
        system.tracker_interval,
    );

    let (stop, stopped) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(wait_for_stop(stopped.clone())));
    let tracker_task = tokio::spawn(tracker.run(wait_for_stop(stopped)));

    info!(team = %args.team, pipeline = %args.pipeline, "gantry running");
    shutdown_signal().await;
    stop.send_replace(true);

    scheduler_task.await?;
    if let Err(e) = tracker_task.await? {
        error!(error = %e, "build tracker failed");
    }

    pool.close().await;
    info!("shutdown complete");
    Ok(())
}

/// Plan ids start from the current time so ids from different runs do not
/// collide.
fn plan_id_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

async fn wait_for_stop(mut stopped: watch::Receiver<bool>) {
    let _ = stopped.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(err) => error!("failed to install Ctrl+C handler: {}", err),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => error!("failed to install SIGTERM handler: {}", err),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received SIGINT, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("received SIGTERM, initiating graceful shutdown");
        }
    }
}
