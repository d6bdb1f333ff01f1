//! Persistence layer for the Gantry scheduler.
//!
//! Provides the repository traits the scheduler consumes together with their
//! PostgreSQL implementations, pub/sub notifications, named locks and the
//! hand-off engine.

pub mod engine;
pub mod error;
pub mod lock;
pub mod notifications;
pub mod repo;

pub use engine::HandoffEngine;
pub use error::{DbError, DbResult};
pub use lock::{InMemoryLockFactory, Lock, LockFactory, LockId, PgLockFactory};
pub use notifications::{
    ATC_SHUTDOWN, BUILD_STARTED, InMemoryNotifications, Notifications, PgNotifications,
    Subscription,
};
pub use repo::*;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}
