//! Named locks so only one orchestrator instance runs a piece of work at a
//! time.
//!
//! Locks are non-blocking: acquiring a held lock yields `None` and the
//! caller skips its turn.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use derive_more::Display;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tracing::warn;

use crate::DbResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
pub enum LockId {
    /// A singleton background task, e.g. the build tracker.
    #[display("task:{_0}")]
    Task(String),
    /// Scheduling of one job's pending builds.
    #[display("job-scheduling:{pipeline}/{job}")]
    JobScheduling { pipeline: String, job: String },
}

impl LockId {
    pub fn task(name: impl Into<String>) -> Self {
        LockId::Task(name.into())
    }

    pub fn job_scheduling(pipeline: impl Into<String>, job: impl Into<String>) -> Self {
        LockId::JobScheduling {
            pipeline: pipeline.into(),
            job: job.into(),
        }
    }

    fn namespace(&self) -> i32 {
        match self {
            LockId::Task(_) => 1,
            LockId::JobScheduling { .. } => 2,
        }
    }

    fn key(&self) -> String {
        match self {
            LockId::Task(name) => name.clone(),
            LockId::JobScheduling { pipeline, job } => format!("{pipeline}/{job}"),
        }
    }
}

/// A held lock.
#[async_trait]
pub trait Lock: Send {
    fn id(&self) -> &LockId;

    async fn release(self: Box<Self>) -> DbResult<()>;
}

#[async_trait]
pub trait LockFactory: Send + Sync {
    /// Take the lock if nobody holds it.
    async fn acquire(&self, id: LockId) -> DbResult<Option<Box<dyn Lock>>>;
}

/// Session-level Postgres advisory locks.
///
/// A lock lives on the connection that took it, so the connection is held
/// until release.
pub struct PgLockFactory {
    pool: PgPool,
}

impl PgLockFactory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockFactory for PgLockFactory {
    async fn acquire(&self, id: LockId) -> DbResult<Option<Box<dyn Lock>>> {
        let mut conn = self.pool.acquire().await?;

        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1, hashtext($2))")
            .bind(id.namespace())
            .bind(id.key())
            .fetch_one(&mut *conn)
            .await?;

        if !acquired {
            return Ok(None);
        }

        Ok(Some(Box::new(PgLock {
            id,
            conn: Some(conn),
        })))
    }
}

struct PgLock {
    id: LockId,
    conn: Option<PoolConnection<Postgres>>,
}

#[async_trait]
impl Lock for PgLock {
    fn id(&self) -> &LockId {
        &self.id
    }

    async fn release(mut self: Box<Self>) -> DbResult<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let released: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1, hashtext($2))")
            .bind(self.id.namespace())
            .bind(self.id.key())
            .fetch_one(&mut *conn)
            .await?;

        if !released {
            warn!(lock = %self.id, "advisory lock was not held at release");
        }
        Ok(())
    }
}

impl Drop for PgLock {
    fn drop(&mut self) {
        // Never hand a connection holding the lock back to the pool; closing
        // the session frees it.
        if let Some(conn) = self.conn.take() {
            drop(conn.detach());
        }
    }
}

/// Locks shared by everything in one process.
#[derive(Debug, Default, Clone)]
pub struct InMemoryLockFactory {
    held: Arc<DashSet<LockId>>,
}

impl InMemoryLockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, id: &LockId) -> bool {
        self.held.contains(id)
    }
}

#[async_trait]
impl LockFactory for InMemoryLockFactory {
    async fn acquire(&self, id: LockId) -> DbResult<Option<Box<dyn Lock>>> {
        if !self.held.insert(id.clone()) {
            return Ok(None);
        }

        Ok(Some(Box::new(InMemoryLock {
            id,
            held: Arc::clone(&self.held),
        })))
    }
}

struct InMemoryLock {
    id: LockId,
    held: Arc<DashSet<LockId>>,
}

#[async_trait]
impl Lock for InMemoryLock {
    fn id(&self) -> &LockId {
        &self.id
    }

    async fn release(self: Box<Self>) -> DbResult<()> {
        // Dropping removes the id.
        Ok(())
    }
}

impl Drop for InMemoryLock {
    fn drop(&mut self) {
        self.held.remove(&self.id);
    }
}
