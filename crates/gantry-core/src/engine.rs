//! Execution engine contract.
//!
//! The engine runs compiled plans against workers. The scheduler only hands
//! builds over and asks for them to be resumed; how steps execute is up to
//! the implementation.

use async_trait::async_trait;

use crate::Result;
use crate::build::Build;
use crate::id::BuildId;
use crate::plan::Plan;

/// A build the engine knows how to drive.
#[async_trait]
pub trait EngineBuild: Send + Sync {
    fn build_id(&self) -> BuildId;

    /// Drive the build until it finishes or the engine is released.
    ///
    /// Failures are the engine's to record against the build.
    async fn resume(&self);
}

#[async_trait]
pub trait Engine: Send + Sync {
    /// Name of this engine.
    fn name(&self) -> &'static str;

    /// Take ownership of a freshly scheduled build and its plan.
    async fn create_build(&self, build: &Build, plan: Plan) -> Result<Box<dyn EngineBuild>>;

    /// Wrap a build that is already running, e.g. after a restart.
    fn new_build(&self, build: Build) -> Box<dyn EngineBuild>;

    /// Stop driving every build without aborting them.
    async fn release_all(&self);
}
