//! Component repository.
//!
//! A component is a named background loop (the build tracker, the
//! scheduler) whose runs are rate limited and which operators can pause.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::DbResult;

/// Name of the build tracker component.
pub const BUILD_TRACKER: &str = "build-tracker";

/// Name of the build scheduler component.
pub const SCHEDULER: &str = "scheduler";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub paused: bool,
    /// Minimum time between two runs.
    pub interval: Duration,
    pub last_ran: Option<DateTime<Utc>>,
}

impl Component {
    /// Whether at least `interval` has passed since the last run.
    pub fn interval_elapsed(&self, now: DateTime<Utc>) -> bool {
        let Some(last_ran) = self.last_ran else {
            return true;
        };

        let interval = TimeDelta::from_std(self.interval).unwrap_or(TimeDelta::MAX);
        last_ran
            .checked_add_signed(interval)
            .is_some_and(|next| now >= next)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ComponentRecord {
    name: String,
    paused: bool,
    interval_ms: i64,
    last_ran: Option<DateTime<Utc>>,
}

impl From<ComponentRecord> for Component {
    fn from(record: ComponentRecord) -> Self {
        Component {
            name: record.name,
            paused: record.paused,
            interval: Duration::from_millis(record.interval_ms.max(0).unsigned_abs()),
            last_ran: record.last_ran,
        }
    }
}

#[async_trait]
pub trait ComponentRepo: Send + Sync {
    async fn find_component(&self, name: &str) -> DbResult<Option<Component>>;

    /// Create the component if it does not exist, otherwise update its
    /// interval. Pause state and last-ran are preserved.
    async fn register_component(&self, name: &str, interval: Duration) -> DbResult<Component>;

    async fn update_last_ran(&self, name: &str, at: DateTime<Utc>) -> DbResult<()>;
}

/// PostgreSQL implementation of ComponentRepo.
pub struct PgComponentRepo {
    pool: PgPool,
}

impl PgComponentRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ComponentRepo for PgComponentRepo {
    async fn find_component(&self, name: &str) -> DbResult<Option<Component>> {
        let record = sqlx::query_as::<_, ComponentRecord>(
            "SELECT name, paused, interval_ms, last_ran FROM components WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record.map(Component::from))
    }

    async fn register_component(&self, name: &str, interval: Duration) -> DbResult<Component> {
        let interval_ms = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX);
        let record = sqlx::query_as::<_, ComponentRecord>(
            r#"
            INSERT INTO components (name, interval_ms, paused)
            VALUES ($1, $2, false)
            ON CONFLICT (name) DO UPDATE SET interval_ms = EXCLUDED.interval_ms
            RETURNING name, paused, interval_ms, last_ran
            "#,
        )
        .bind(name)
        .bind(interval_ms)
        .fetch_one(&self.pool)
        .await?;
        Ok(record.into())
    }

    async fn update_last_ran(&self, name: &str, at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query("UPDATE components SET last_ran = $2 WHERE name = $1")
            .bind(name)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(last_ran: Option<DateTime<Utc>>) -> Component {
        Component {
            name: BUILD_TRACKER.to_string(),
            paused: false,
            interval: Duration::from_secs(10),
            last_ran,
        }
    }

    #[test]
    fn test_never_ran_is_due() {
        assert!(component(None).interval_elapsed(Utc::now()));
    }

    #[test]
    fn test_interval_elapsed() {
        let now = Utc::now();
        let recent = component(Some(now - TimeDelta::seconds(3)));
        let stale = component(Some(now - TimeDelta::seconds(10)));

        assert!(!recent.interval_elapsed(now));
        assert!(stale.interval_elapsed(now));
    }

    #[test]
    fn test_record_clamps_negative_interval() {
        let record = ComponentRecord {
            name: SCHEDULER.to_string(),
            paused: true,
            interval_ms: -5,
            last_ran: None,
        };

        let component = Component::from(record);
        assert_eq!(component.interval, Duration::ZERO);
        assert!(component.paused);
    }
}
