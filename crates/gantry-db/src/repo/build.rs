//! Build repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gantry_core::{Build, BuildId, BuildStatus, Plan};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::{DbError, DbResult};

/// Columns selected for every build query; joins teams, pipelines and jobs
/// so a build carries the names it belongs to.
pub(crate) const BUILD_SELECT: &str = r#"
    SELECT b.id, b.name, t.name AS team_name, p.name AS pipeline_name,
           j.name AS job_name, b.status, b.create_time, b.start_time, b.end_time
    FROM builds b
    JOIN teams t ON t.id = b.team_id
    LEFT JOIN pipelines p ON p.id = b.pipeline_id
    LEFT JOIN jobs j ON j.id = b.job_id
"#;

/// A build row in the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BuildRecord {
    pub id: i64,
    pub name: String,
    pub team_name: String,
    pub pipeline_name: Option<String>,
    pub job_name: Option<String>,
    pub status: String,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl TryFrom<BuildRecord> for Build {
    type Error = DbError;

    fn try_from(record: BuildRecord) -> DbResult<Self> {
        let status = record
            .status
            .parse::<BuildStatus>()
            .map_err(|e| DbError::InvalidData(format!("build {}: {e}", record.id)))?;

        Ok(Build {
            id: BuildId::new(record.id),
            name: record.name,
            team_name: record.team_name,
            pipeline_name: record.pipeline_name,
            job_name: record.job_name,
            status,
            create_time: record.create_time,
            start_time: record.start_time,
            end_time: record.end_time,
        })
    }
}

pub(crate) fn into_builds(records: Vec<BuildRecord>) -> DbResult<Vec<Build>> {
    records.into_iter().map(Build::try_from).collect()
}

/// Mark a build finished. Shared by every repo that can end a build.
pub(crate) async fn finish_build(pool: &PgPool, id: BuildId, status: BuildStatus) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE builds SET status = $2, end_time = NOW(), completed = true
        WHERE id = $1
        "#,
    )
    .bind(id.as_i64())
    .bind(status.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

/// Builds across every pipeline, as seen by the tracker and the engine.
#[async_trait]
pub trait BuildRepo: Send + Sync {
    /// Every build whose status is `started`.
    async fn all_started_builds(&self) -> DbResult<Vec<Build>>;

    async fn find_build(&self, id: BuildId) -> DbResult<Option<Build>>;

    /// Store the build's plan and move it from `scheduled` to `started`.
    ///
    /// Returns false if the build was not in `scheduled` state.
    async fn start_build(&self, id: BuildId, plan: &Plan) -> DbResult<bool>;

    async fn finish_build(&self, id: BuildId, status: BuildStatus) -> DbResult<()>;
}

/// PostgreSQL implementation of BuildRepo.
pub struct PgBuildRepo {
    pool: PgPool,
}

impl PgBuildRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BuildRepo for PgBuildRepo {
    async fn all_started_builds(&self) -> DbResult<Vec<Build>> {
        let records = sqlx::query_as::<_, BuildRecord>(&format!(
            "{BUILD_SELECT} WHERE b.status = 'started' ORDER BY b.id"
        ))
        .fetch_all(&self.pool)
        .await?;
        into_builds(records)
    }

    async fn find_build(&self, id: BuildId) -> DbResult<Option<Build>> {
        let record =
            sqlx::query_as::<_, BuildRecord>(&format!("{BUILD_SELECT} WHERE b.id = $1"))
                .bind(id.as_i64())
                .fetch_optional(&self.pool)
                .await?;
        record.map(Build::try_from).transpose()
    }

    async fn start_build(&self, id: BuildId, plan: &Plan) -> DbResult<bool> {
        let plan = serde_json::to_value(plan)?;
        let result = sqlx::query(
            r#"
            UPDATE builds SET status = 'started', start_time = NOW(), private_plan = $2
            WHERE id = $1 AND status = 'scheduled'
            "#,
        )
        .bind(id.as_i64())
        .bind(plan)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn finish_build(&self, id: BuildId, status: BuildStatus) -> DbResult<()> {
        finish_build(&self.pool, id, status).await
    }
}
