//! crates/dubber_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or
//! vendor HTTP APIs.

use async_trait::async_trait;
use chrono::Duration;
use uuid::Uuid;

use crate::domain::{Artifact, Job, JobEvent, JobStatus, LanguageTask, Stage};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
///
/// The variants mirror how callers must react: `Validation` is surfaced to the
/// caller immediately and never retried, `Vendor` is transient and retried
/// with backoff, `NotFound` hides whether the item exists at all, and
/// `Unexpected` is logged in full server-side but shown sanitized.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Vendor service failure: {0}")]
    Vendor(String),
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Job Store Port
//=========================================================================================

/// Durable, queryable record of jobs and language tasks.
///
/// All cross-worker coordination goes through this store; the only atomic
/// primitive the system needs is `claim_task`, which lets the store be swapped
/// for a message broker without touching the worker's pipeline logic.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Creates a job plus one `queued` task per target language.
    ///
    /// Fails with `PortError::Validation` if `languages` is empty or contains
    /// an unsupported code. No partial state is left behind on failure.
    async fn create_job(
        &self,
        user_id: Uuid,
        languages: &[String],
        voice_track_ref: &str,
        background_track_ref: Option<&str>,
    ) -> PortResult<Job>;

    async fn get_job(&self, job_id: Uuid) -> PortResult<Job>;

    /// Owner-scoped lookup. Returns `NotFound` both for unknown jobs and for
    /// jobs belonging to a different user, so callers cannot probe for the
    /// existence of other users' jobs.
    async fn get_job_for_user(&self, job_id: Uuid, user_id: Uuid) -> PortResult<Job>;

    /// Jobs for one user, newest first.
    async fn list_jobs(&self, user_id: Uuid, limit: i64, offset: i64) -> PortResult<Vec<Job>>;

    async fn list_tasks(&self, job_id: Uuid) -> PortResult<Vec<LanguageTask>>;

    /// Tasks eligible for processing: `queued`, or in flight but not updated
    /// for longer than `stale_after` (a worker died mid-task). Oldest first,
    /// for approximate FIFO fairness.
    async fn list_pending_tasks(
        &self,
        limit: i64,
        stale_after: Duration,
    ) -> PortResult<Vec<LanguageTask>>;

    /// Atomically claims a task for exclusive processing by moving it into
    /// `transcribing`. Returns `true` iff this caller won the claim; of N
    /// concurrent claimers exactly one sees `true`.
    async fn claim_task(&self, task_id: Uuid, stale_after: Duration) -> PortResult<bool>;

    /// Records stage/progress/message for a task. Idempotent: a task already
    /// in a terminal stage is left untouched, so a stale worker cannot
    /// resurrect a finished task.
    async fn update_task_progress(
        &self,
        task_id: Uuid,
        stage: Stage,
        progress: i16,
        message: &str,
    ) -> PortResult<()>;

    /// Attaches the primary output artifact to a task.
    async fn set_task_artifact(
        &self,
        task_id: Uuid,
        artifact_id: Uuid,
        size_bytes: i64,
    ) -> PortResult<()>;

    /// Recomputes and persists the job's aggregate status and progress from
    /// its child tasks. Returns the new status.
    async fn mark_job_status(&self, job_id: Uuid) -> PortResult<JobStatus>;

    /// Appends an audit event. Events are never mutated after insert.
    async fn record_event(&self, event: JobEvent) -> PortResult<()>;

    async fn create_artifact(&self, artifact: Artifact) -> PortResult<()>;

    async fn get_artifact(&self, artifact_id: Uuid) -> PortResult<Artifact>;
}

//=========================================================================================
// Vendor Service Ports
//=========================================================================================

#[async_trait]
pub trait SpeechToTextService: Send + Sync {
    /// Transcribes a voice track into text.
    async fn transcribe_audio(&self, audio_data: &[u8]) -> PortResult<String>;
}

#[async_trait]
pub trait TranslationService: Send + Sync {
    /// Translates one chunk of text into the target language.
    async fn translate(&self, text: &str, target_language: &str) -> PortResult<String>;
}

#[async_trait]
pub trait TextToSpeechService: Send + Sync {
    /// Generates audio data from a string of text in the given language.
    async fn generate_audio(&self, text: &str, language: &str) -> PortResult<Vec<u8>>;
}

//=========================================================================================
// Media and Storage Ports
//=========================================================================================

/// Wraps the external audio-mixing binary.
#[async_trait]
pub trait AudioMixer: Send + Sync {
    /// Duration of an audio buffer in seconds.
    async fn probe_duration(&self, audio: &[u8]) -> PortResult<f64>;

    /// Overlays a synthesized voice over a background track. The output
    /// duration equals the voice duration; the background is looped or
    /// truncated to match. Timing alignment with the source speech is a
    /// known approximation, not a guarantee.
    async fn overlay_background(&self, voice: &[u8], background: &[u8]) -> PortResult<Vec<u8>>;
}

/// Blob storage for uploaded tracks and generated outputs.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Reads the blob at a storage location.
    async fn fetch(&self, location: &str) -> PortResult<Vec<u8>>;

    /// Writes a blob, overwriting any previous content at the same location
    /// (re-running an export must be safe). Returns the stored size in bytes.
    async fn store(&self, location: &str, data: &[u8]) -> PortResult<u64>;
}
