//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `JobStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dubber_core::domain::{
    Artifact, ArtifactKind, EventKind, Job, JobEvent, JobStatus, LanguageTask, Stage,
};
use dubber_core::ports::{JobStore, PortError, PortResult};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `JobStore` port.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
    supported_languages: Vec<String>,
}

impl PgJobStore {
    /// Creates a new `PgJobStore`.
    pub fn new(pool: PgPool, supported_languages: Vec<String>) -> Self {
        Self {
            pool,
            supported_languages,
        }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

/// Rejects empty, unsupported, or repeated language lists before any row is
/// written. Tasks are unique per (job, language), so a duplicate code must be
/// caught here rather than surfacing as a constraint violation.
fn validate_languages(languages: &[String], supported: &[String]) -> PortResult<()> {
    if languages.is_empty() {
        return Err(PortError::Validation(
            "At least one target language is required".to_string(),
        ));
    }
    for (i, lang) in languages.iter().enumerate() {
        if !supported.iter().any(|s| s == lang) {
            return Err(PortError::Validation(format!(
                "Unsupported language code '{}'",
                lang
            )));
        }
        if languages[..i].contains(lang) {
            return Err(PortError::Validation(format!(
                "Duplicate language code '{}'",
                lang
            )));
        }
    }
    Ok(())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct JobRecord {
    id: Uuid,
    user_id: Uuid,
    status: String,
    progress: i16,
    message: String,
    languages: Vec<String>,
    voice_track_ref: String,
    background_track_ref: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    estimated_completion: Option<DateTime<Utc>>,
}

impl JobRecord {
    fn to_domain(self) -> PortResult<Job> {
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| PortError::Unexpected(format!("Unknown job status '{}'", self.status)))?;
        Ok(Job {
            id: self.id,
            user_id: self.user_id,
            status,
            progress: self.progress,
            message: self.message,
            languages: self.languages,
            voice_track_ref: self.voice_track_ref,
            background_track_ref: self.background_track_ref,
            created_at: self.created_at,
            updated_at: self.updated_at,
            estimated_completion: self.estimated_completion,
        })
    }
}

const JOB_COLUMNS: &str = "id, user_id, status, progress, message, languages, voice_track_ref, \
                           background_track_ref, created_at, updated_at, estimated_completion";

#[derive(FromRow)]
struct TaskRecord {
    id: Uuid,
    job_id: Uuid,
    language: String,
    stage: String,
    progress: i16,
    message: String,
    artifact_id: Option<Uuid>,
    artifact_size: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskRecord {
    fn to_domain(self) -> PortResult<LanguageTask> {
        let stage = Stage::parse(&self.stage)
            .ok_or_else(|| PortError::Unexpected(format!("Unknown task stage '{}'", self.stage)))?;
        Ok(LanguageTask {
            id: self.id,
            job_id: self.job_id,
            language: self.language,
            stage,
            progress: self.progress,
            message: self.message,
            artifact_id: self.artifact_id,
            artifact_size: self.artifact_size,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const TASK_COLUMNS: &str = "id, job_id, language, stage, progress, message, artifact_id, \
                            artifact_size, created_at, updated_at";

#[derive(FromRow)]
struct ArtifactRecord {
    id: Uuid,
    job_id: Uuid,
    task_id: Uuid,
    kind: String,
    location: String,
    size_bytes: i64,
    expires_at: DateTime<Utc>,
}

impl ArtifactRecord {
    fn to_domain(self) -> PortResult<Artifact> {
        let kind = ArtifactKind::parse(&self.kind).ok_or_else(|| {
            PortError::Unexpected(format!("Unknown artifact kind '{}'", self.kind))
        })?;
        Ok(Artifact {
            id: self.id,
            job_id: self.job_id,
            task_id: self.task_id,
            kind,
            location: self.location,
            size_bytes: self.size_bytes,
            expires_at: self.expires_at,
        })
    }
}

//=========================================================================================
// `JobStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(
        &self,
        user_id: Uuid,
        languages: &[String],
        voice_track_ref: &str,
        background_track_ref: Option<&str>,
    ) -> PortResult<Job> {
        validate_languages(languages, &self.supported_languages)?;

        let job_id = Uuid::new_v4();
        // A rough single-queue estimate; refined only by actual progress.
        let estimated_completion =
            Utc::now() + Duration::seconds(90 * languages.len() as i64);
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let record = sqlx::query_as::<_, JobRecord>(&format!(
            "INSERT INTO jobs (id, user_id, languages, voice_track_ref, background_track_ref, \
                               estimated_completion) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .bind(user_id)
        .bind(languages)
        .bind(voice_track_ref)
        .bind(background_track_ref)
        .bind(estimated_completion)
        .fetch_one(&mut *tx)
        .await
        .map_err(unexpected)?;

        for lang in languages {
            sqlx::query("INSERT INTO language_tasks (id, job_id, language) VALUES ($1, $2, $3)")
                .bind(Uuid::new_v4())
                .bind(job_id)
                .bind(lang)
                .execute(&mut *tx)
                .await
                .map_err(unexpected)?;
        }

        tx.commit().await.map_err(unexpected)?;
        record.to_domain()
    }

    async fn get_job(&self, job_id: Uuid) -> PortResult<Job> {
        let record = sqlx::query_as::<_, JobRecord>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Job {} not found", job_id)),
            _ => unexpected(e),
        })?;
        record.to_domain()
    }

    async fn get_job_for_user(&self, job_id: Uuid, user_id: Uuid) -> PortResult<Job> {
        // The unknown-job and wrong-owner cases are deliberately
        // indistinguishable to the caller.
        let record = sqlx::query_as::<_, JobRecord>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1 AND user_id = $2"
        ))
        .bind(job_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Job {} not found", job_id)),
            _ => unexpected(e),
        })?;
        record.to_domain()
    }

    async fn list_jobs(&self, user_id: Uuid, limit: i64, offset: i64) -> PortResult<Vec<Job>> {
        let records = sqlx::query_as::<_, JobRecord>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn list_tasks(&self, job_id: Uuid) -> PortResult<Vec<LanguageTask>> {
        let records = sqlx::query_as::<_, TaskRecord>(&format!(
            "SELECT {TASK_COLUMNS} FROM language_tasks WHERE job_id = $1 ORDER BY created_at ASC"
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn list_pending_tasks(
        &self,
        limit: i64,
        stale_after: Duration,
    ) -> PortResult<Vec<LanguageTask>> {
        let stale_cutoff = Utc::now() - stale_after;
        let records = sqlx::query_as::<_, TaskRecord>(&format!(
            "SELECT {TASK_COLUMNS} FROM language_tasks \
             WHERE stage = 'queued' \
                OR (stage NOT IN ('queued', 'complete', 'error') AND updated_at < $1) \
             ORDER BY created_at ASC LIMIT $2"
        ))
        .bind(stale_cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn claim_task(&self, task_id: Uuid, stale_after: Duration) -> PortResult<bool> {
        // Conditional update: the claim succeeds only if the task is still
        // unclaimed (or stale enough to re-claim after a worker crash).
        // Concurrent claimers race on this one statement; Postgres row
        // locking guarantees exactly one of them sees rows_affected == 1.
        let stale_cutoff = Utc::now() - stale_after;
        let result = sqlx::query(
            "UPDATE language_tasks \
             SET stage = 'transcribing', progress = $3, message = '', updated_at = now() \
             WHERE id = $1 \
               AND (stage = 'queued' \
                    OR (stage NOT IN ('queued', 'complete', 'error') AND updated_at < $2))",
        )
        .bind(task_id)
        .bind(stale_cutoff)
        .bind(Stage::Transcribing.base_progress())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_task_progress(
        &self,
        task_id: Uuid,
        stage: Stage,
        progress: i16,
        message: &str,
    ) -> PortResult<()> {
        // Terminal tasks are left untouched: a stale worker finishing late
        // must not resurrect a task another worker already completed.
        sqlx::query(
            "UPDATE language_tasks \
             SET stage = $2, progress = $3, message = $4, updated_at = now() \
             WHERE id = $1 AND stage NOT IN ('complete', 'error')",
        )
        .bind(task_id)
        .bind(stage.as_str())
        .bind(progress)
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn set_task_artifact(
        &self,
        task_id: Uuid,
        artifact_id: Uuid,
        size_bytes: i64,
    ) -> PortResult<()> {
        sqlx::query(
            "UPDATE language_tasks SET artifact_id = $2, artifact_size = $3, updated_at = now() \
             WHERE id = $1 AND stage NOT IN ('complete', 'error')",
        )
        .bind(task_id)
        .bind(artifact_id)
        .bind(size_bytes)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn mark_job_status(&self, job_id: Uuid) -> PortResult<JobStatus> {
        let tasks = self.list_tasks(job_id).await?;
        let stages: Vec<Stage> = tasks.iter().map(|t| t.stage).collect();
        let status = JobStatus::aggregate(&stages);
        let progress = if tasks.is_empty() {
            0
        } else {
            (tasks.iter().map(|t| t.progress as i64).sum::<i64>() / tasks.len() as i64) as i16
        };
        let message = match status {
            JobStatus::Pending => "Waiting for a worker",
            JobStatus::Processing => "Dubbing in progress",
            JobStatus::Complete => "Dubbing complete",
            JobStatus::Error => "One or more languages failed",
        };

        let previous = self.get_job(job_id).await?.status;

        sqlx::query(
            "UPDATE jobs SET status = $2, progress = $3, message = $4, updated_at = now() \
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(progress)
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if previous != status {
            self.record_event(JobEvent {
                id: Uuid::new_v4(),
                job_id,
                task_id: None,
                kind: EventKind::JobStatusChanged,
                detail: format!("{} -> {}", previous.as_str(), status.as_str()),
                created_at: Utc::now(),
            })
            .await?;
        }

        Ok(status)
    }

    async fn record_event(&self, event: JobEvent) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO job_events (id, job_id, task_id, kind, detail, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(event.id)
        .bind(event.job_id)
        .bind(event.task_id)
        .bind(event.kind.as_str())
        .bind(&event.detail)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn create_artifact(&self, artifact: Artifact) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO artifacts (id, job_id, task_id, kind, location, size_bytes, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(artifact.id)
        .bind(artifact.job_id)
        .bind(artifact.task_id)
        .bind(artifact.kind.as_str())
        .bind(&artifact.location)
        .bind(artifact.size_bytes)
        .bind(artifact.expires_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn get_artifact(&self, artifact_id: Uuid) -> PortResult<Artifact> {
        let record = sqlx::query_as::<_, ArtifactRecord>(
            "SELECT id, job_id, task_id, kind, location, size_bytes, expires_at \
             FROM artifacts WHERE id = $1",
        )
        .bind(artifact_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Artifact {} not found", artifact_id))
            }
            _ => unexpected(e),
        })?;
        record.to_domain()
    }
}
