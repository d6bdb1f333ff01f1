//! Pipeline-scoped scheduling queries: pending builds, inputs, pause state
//! and serial groups.

use async_trait::async_trait;
use gantry_core::resource::Version;
use gantry_core::{Build, BuildId, BuildInput, BuildStatus};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::types::Json;

use super::build::{BUILD_SELECT, BuildRecord, finish_build, into_builds};
use crate::{DbError, DbResult};

/// Scheduling state of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobRecord {
    pub name: String,
    pub paused: bool,
    pub max_in_flight_reached: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct BuildInputRecord {
    name: String,
    resource_name: String,
    version: Json<Version>,
    first_occurrence: bool,
    resolve_build_id: Option<i64>,
}

impl From<BuildInputRecord> for BuildInput {
    fn from(record: BuildInputRecord) -> Self {
        BuildInput {
            name: record.name,
            resource: record.resource_name,
            version: record.version.0,
            first_occurrence: record.first_occurrence,
            resolve_build_id: record.resolve_build_id.map(BuildId::new),
        }
    }
}

impl From<&BuildInput> for BuildInputRecord {
    fn from(input: &BuildInput) -> Self {
        BuildInputRecord {
            name: input.name.clone(),
            resource_name: input.resource.clone(),
            version: Json(input.version.clone()),
            first_occurrence: input.first_occurrence,
            resolve_build_id: input.resolve_build_id.map(|id| id.as_i64()),
        }
    }
}

/// What the build starter needs from a pipeline.
#[async_trait]
pub trait PipelineRepo: Send + Sync {
    fn pipeline_name(&self) -> &str;

    /// Oldest pending build of the job.
    async fn next_pending_build(&self, job: &str) -> DbResult<Option<Build>>;

    /// Inputs chosen for the job's next build; `None` until they have been
    /// determined.
    async fn next_build_inputs(&self, job: &str) -> DbResult<Option<Vec<BuildInput>>>;

    async fn is_paused(&self) -> DbResult<bool>;

    async fn get_job(&self, job: &str) -> DbResult<JobRecord>;

    /// Claim a pending build for this scheduler.
    ///
    /// A single conditional update: returns false without error when the
    /// build is no longer pending.
    async fn update_build_to_scheduled(&self, id: BuildId) -> DbResult<bool>;

    async fn use_inputs_for_build(&self, id: BuildId, inputs: &[BuildInput]) -> DbResult<()>;

    /// Builds of the job that were claimed but never handed to an engine,
    /// oldest first.
    async fn scheduled_builds(&self, job: &str) -> DbResult<Vec<Build>>;

    /// Inputs recorded for a build by `use_inputs_for_build`.
    async fn build_inputs(&self, id: BuildId) -> DbResult<Vec<BuildInput>>;

    async fn finish_build(&self, id: BuildId, status: BuildStatus) -> DbResult<()>;
}

/// What the max-in-flight check needs from a pipeline.
#[async_trait]
pub trait SerialGroupRepo: Send + Sync {
    /// Scheduled or started builds of every job sharing one of `groups`.
    async fn running_builds_by_serial_group(
        &self,
        job: &str,
        groups: &[String],
    ) -> DbResult<Vec<Build>>;

    /// The oldest pending build of every job sharing one of `groups`.
    async fn next_pending_build_by_serial_group(
        &self,
        job: &str,
        groups: &[String],
    ) -> DbResult<Option<Build>>;

    async fn set_max_in_flight_reached(&self, job: &str, reached: bool) -> DbResult<()>;
}

/// PostgreSQL implementation of PipelineRepo and SerialGroupRepo, scoped to
/// one pipeline.
pub struct PgPipelineRepo {
    pool: PgPool,
    pipeline_id: i64,
    name: String,
}

impl PgPipelineRepo {
    /// Look up a team's pipeline by name.
    pub async fn find(pool: PgPool, team: &str, name: &str) -> DbResult<Self> {
        let pipeline_id: i64 = sqlx::query_scalar(
            r#"
            SELECT p.id FROM pipelines p
            JOIN teams t ON t.id = p.team_id
            WHERE t.name = $1 AND p.name = $2
            "#,
        )
        .bind(team)
        .bind(name)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("pipeline {team}/{name}")))?;

        Ok(Self {
            pool,
            pipeline_id,
            name: name.to_string(),
        })
    }
}

/// Jobs of the pipeline that share one of the serial groups, plus the job
/// itself.
const SERIAL_GROUP_JOBS: &str = r#"
    b.job_id IN (
        SELECT jsg.job_id FROM jobs_serial_groups jsg
        JOIN jobs sj ON sj.id = jsg.job_id
        WHERE sj.pipeline_id = $1 AND jsg.serial_group = ANY($3)
        UNION
        SELECT id FROM jobs WHERE pipeline_id = $1 AND name = $2
    )
"#;

#[async_trait]
impl PipelineRepo for PgPipelineRepo {
    fn pipeline_name(&self) -> &str {
        &self.name
    }

    async fn next_pending_build(&self, job: &str) -> DbResult<Option<Build>> {
        let record = sqlx::query_as::<_, BuildRecord>(&format!(
            r#"{BUILD_SELECT}
            WHERE b.pipeline_id = $1 AND j.name = $2 AND b.status = 'pending'
            ORDER BY b.id ASC
            LIMIT 1"#
        ))
        .bind(self.pipeline_id)
        .bind(job)
        .fetch_optional(&self.pool)
        .await?;
        record.map(Build::try_from).transpose()
    }

    async fn next_build_inputs(&self, job: &str) -> DbResult<Option<Vec<BuildInput>>> {
        let determined: Option<bool> = sqlx::query_scalar(
            "SELECT inputs_determined FROM jobs WHERE pipeline_id = $1 AND name = $2",
        )
        .bind(self.pipeline_id)
        .bind(job)
        .fetch_optional(&self.pool)
        .await?;

        if determined != Some(true) {
            return Ok(None);
        }

        let records = sqlx::query_as::<_, BuildInputRecord>(
            r#"
            SELECT i.input_name AS name, r.name AS resource_name, i.version,
                   i.first_occurrence, i.resolve_build_id
            FROM next_build_inputs i
            JOIN jobs j ON j.id = i.job_id
            JOIN resources r ON r.id = i.resource_id
            WHERE j.pipeline_id = $1 AND j.name = $2
            ORDER BY i.input_name
            "#,
        )
        .bind(self.pipeline_id)
        .bind(job)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(records.into_iter().map(BuildInput::from).collect()))
    }

    async fn is_paused(&self) -> DbResult<bool> {
        let paused: bool = sqlx::query_scalar("SELECT paused FROM pipelines WHERE id = $1")
            .bind(self.pipeline_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("pipeline {}", self.name)))?;
        Ok(paused)
    }

    async fn get_job(&self, job: &str) -> DbResult<JobRecord> {
        let record = sqlx::query_as::<_, JobRecord>(
            r#"
            SELECT name, paused, max_in_flight_reached FROM jobs
            WHERE pipeline_id = $1 AND name = $2
            "#,
        )
        .bind(self.pipeline_id)
        .bind(job)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("job {}/{job}", self.name)))?;
        Ok(record)
    }

    async fn update_build_to_scheduled(&self, id: BuildId) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE builds SET status = 'scheduled' WHERE id = $1 AND status = 'pending'",
        )
        .bind(id.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn use_inputs_for_build(&self, id: BuildId, inputs: &[BuildInput]) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM build_inputs WHERE build_id = $1")
            .bind(id.as_i64())
            .execute(&mut *tx)
            .await?;

        for record in inputs.iter().map(BuildInputRecord::from) {
            sqlx::query(
                r#"
                INSERT INTO build_inputs
                    (build_id, name, resource_name, version, first_occurrence, resolve_build_id)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(id.as_i64())
            .bind(record.name)
            .bind(record.resource_name)
            .bind(record.version)
            .bind(record.first_occurrence)
            .bind(record.resolve_build_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE builds SET inputs_ready = true WHERE id = $1")
            .bind(id.as_i64())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn scheduled_builds(&self, job: &str) -> DbResult<Vec<Build>> {
        let records = sqlx::query_as::<_, BuildRecord>(&format!(
            r#"{BUILD_SELECT}
            WHERE b.pipeline_id = $1 AND j.name = $2 AND b.status = 'scheduled'
            ORDER BY b.id ASC"#
        ))
        .bind(self.pipeline_id)
        .bind(job)
        .fetch_all(&self.pool)
        .await?;
        into_builds(records)
    }

    async fn build_inputs(&self, id: BuildId) -> DbResult<Vec<BuildInput>> {
        let records = sqlx::query_as::<_, BuildInputRecord>(
            r#"
            SELECT name, resource_name, version, first_occurrence, resolve_build_id
            FROM build_inputs
            WHERE build_id = $1
            ORDER BY name
            "#,
        )
        .bind(id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(BuildInput::from).collect())
    }

    async fn finish_build(&self, id: BuildId, status: BuildStatus) -> DbResult<()> {
        finish_build(&self.pool, id, status).await
    }
}

#[async_trait]
impl SerialGroupRepo for PgPipelineRepo {
    async fn running_builds_by_serial_group(
        &self,
        job: &str,
        groups: &[String],
    ) -> DbResult<Vec<Build>> {
        let records = sqlx::query_as::<_, BuildRecord>(&format!(
            r#"{BUILD_SELECT}
            WHERE {SERIAL_GROUP_JOBS} AND b.status IN ('scheduled', 'started')
            ORDER BY b.id"#
        ))
        .bind(self.pipeline_id)
        .bind(job)
        .bind(groups)
        .fetch_all(&self.pool)
        .await?;
        into_builds(records)
    }

    async fn next_pending_build_by_serial_group(
        &self,
        job: &str,
        groups: &[String],
    ) -> DbResult<Option<Build>> {
        let record = sqlx::query_as::<_, BuildRecord>(&format!(
            r#"{BUILD_SELECT}
            WHERE {SERIAL_GROUP_JOBS} AND b.status = 'pending'
            ORDER BY b.id ASC
            LIMIT 1"#
        ))
        .bind(self.pipeline_id)
        .bind(job)
        .bind(groups)
        .fetch_optional(&self.pool)
        .await?;
        record.map(Build::try_from).transpose()
    }

    async fn set_max_in_flight_reached(&self, job: &str, reached: bool) -> DbResult<()> {
        sqlx::query(
            "UPDATE jobs SET max_in_flight_reached = $3 WHERE pipeline_id = $1 AND name = $2",
        )
        .bind(self.pipeline_id)
        .bind(job)
        .bind(reached)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_records_keep_provenance() {
        let input = BuildInput {
            name: "repo".to_string(),
            resource: "some-resource".to_string(),
            version: Version::from([("ref".to_string(), "abc".to_string())]),
            first_occurrence: true,
            resolve_build_id: Some(BuildId::new(41)),
        };

        let record = BuildInputRecord::from(&input);
        assert_eq!(record.resolve_build_id, Some(41));
        assert!(record.first_occurrence);

        assert_eq!(BuildInput::from(record), input);
    }
}
