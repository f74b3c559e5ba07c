//! crates/dubber_core/src/domain.rs
//!
//! Defines the pure, core data structures for the dubbing pipeline.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Aggregate status of a dubbing job, derived from its language tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Complete,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "complete" => Some(JobStatus::Complete),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }

    /// Recomputes the job status from its child task stages.
    ///
    /// `Complete` iff every task is complete. `Error` iff at least one task
    /// has terminally failed and no task is still in flight (a failed sibling
    /// does not end the job while other languages are still being processed).
    /// `Pending` while nothing has started, `Processing` otherwise.
    pub fn aggregate(stages: &[Stage]) -> JobStatus {
        if stages.is_empty() {
            return JobStatus::Pending;
        }
        if stages.iter().all(|s| *s == Stage::Complete) {
            return JobStatus::Complete;
        }
        let any_error = stages.iter().any(|s| *s == Stage::Error);
        let any_in_flight = stages.iter().any(|s| !s.is_terminal());
        if any_error && !any_in_flight {
            return JobStatus::Error;
        }
        if stages.iter().all(|s| *s == Stage::Queued) {
            return JobStatus::Pending;
        }
        JobStatus::Processing
    }
}

/// Position of a language task in the fixed dubbing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Queued,
    Transcribing,
    Translating,
    Synthesizing,
    Mixing,
    Exporting,
    Complete,
    Error,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::Transcribing => "transcribing",
            Stage::Translating => "translating",
            Stage::Synthesizing => "synthesizing",
            Stage::Mixing => "mixing",
            Stage::Exporting => "exporting",
            Stage::Complete => "complete",
            Stage::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Stage::Queued),
            "transcribing" => Some(Stage::Transcribing),
            "translating" => Some(Stage::Translating),
            "synthesizing" => Some(Stage::Synthesizing),
            "mixing" => Some(Stage::Mixing),
            "exporting" => Some(Stage::Exporting),
            "complete" => Some(Stage::Complete),
            "error" => Some(Stage::Error),
            _ => None,
        }
    }

    /// A terminal stage accepts no further progress updates.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Error)
    }

    /// A task is in flight once claimed and until it reaches a terminal stage.
    pub fn is_in_flight(&self) -> bool {
        !matches!(self, Stage::Queued | Stage::Complete | Stage::Error)
    }

    /// Progress percentage reported when a task enters this stage.
    pub fn base_progress(&self) -> i16 {
        match self {
            Stage::Queued => 0,
            Stage::Transcribing => 10,
            Stage::Translating => 35,
            Stage::Synthesizing => 60,
            Stage::Mixing => 80,
            Stage::Exporting => 90,
            Stage::Complete => 100,
            Stage::Error => 0,
        }
    }
}

/// Represents one user-submitted dubbing request spanning one or more
/// target languages.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: JobStatus,
    pub progress: i16,
    pub message: String,
    pub languages: Vec<String>,
    pub voice_track_ref: String,
    pub background_track_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub estimated_completion: Option<DateTime<Utc>>,
}

/// The per-language unit of work within a job.
#[derive(Debug, Clone)]
pub struct LanguageTask {
    pub id: Uuid,
    pub job_id: Uuid,
    pub language: String,
    pub stage: Stage,
    pub progress: i16,
    pub message: String,
    pub artifact_id: Option<Uuid>,
    pub artifact_size: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kinds of audit records in a job's event trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    StageChanged,
    TaskFailed,
    JobStatusChanged,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::StageChanged => "stage_changed",
            EventKind::TaskFailed => "task_failed",
            EventKind::JobStatusChanged => "job_status_changed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stage_changed" => Some(EventKind::StageChanged),
            "task_failed" => Some(EventKind::TaskFailed),
            "job_status_changed" => Some(EventKind::JobStatusChanged),
            _ => None,
        }
    }
}

/// An append-only audit record of a stage transition or failure.
/// Never mutated after insert.
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub id: Uuid,
    pub job_id: Uuid,
    pub task_id: Option<Uuid>,
    pub kind: EventKind,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

/// Kinds of downloadable outputs a completed task can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    DubbedAudio,
    VoiceOnly,
    Captions,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::DubbedAudio => "dubbed_audio",
            ArtifactKind::VoiceOnly => "voice_only",
            ArtifactKind::Captions => "captions",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dubbed_audio" => Some(ArtifactKind::DubbedAudio),
            "voice_only" => Some(ArtifactKind::VoiceOnly),
            "captions" => Some(ArtifactKind::Captions),
            _ => None,
        }
    }
}

/// A generated output with its storage location and retention expiry.
/// May outlive its task record for download purposes until the expiry.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub id: Uuid,
    pub job_id: Uuid,
    pub task_id: Uuid,
    pub kind: ArtifactKind,
    pub location: String,
    pub size_bytes: i64,
    pub expires_at: DateTime<Utc>,
}
