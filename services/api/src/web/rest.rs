//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.
//!
//! Every endpoint is owner-scoped through the `x-user-id` header (identity
//! itself is established by an upstream auth layer that is out of scope
//! here). Unknown and foreign resources are both reported as 404 so callers
//! cannot probe for other users' jobs.

use crate::web::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use dubber_core::domain::{Artifact, ArtifactKind, Stage};
use dubber_core::ports::{PortError, PortResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        create_job_handler,
        get_job_handler,
        list_jobs_handler,
        download_artifact_handler,
    ),
    components(
        schemas(CreateJobRequest, CreateJobResponse, JobStatusResponse, LanguageStatus, JobSummary)
    ),
    tags(
        (name = "Dubbing API", description = "Job submission and status polling for AI-dubbed audio.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Request and Response Structs
//=========================================================================================

/// The payload for submitting a new dubbing job. Track refs point at blobs
/// the client already uploaded through the storage handoff.
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub languages: Vec<String>,
    pub voice_track_ref: String,
    pub background_track_ref: Option<String>,
}

/// The response payload sent after successfully creating a job.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobResponse {
    pub job_id: Uuid,
    pub status: String,
    pub languages: Vec<String>,
}

/// Per-language progress within a job status response.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LanguageStatus {
    pub language_code: String,
    pub stage: String,
    pub progress: i16,
    pub message: String,
    /// Present only once the language is complete and its artifact has not
    /// passed its retention expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

/// The full status projection a polling client renders from.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: String,
    pub progress: i16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_completion: Option<DateTime<Utc>>,
    pub languages: Vec<LanguageStatus>,
}

/// One row in the newest-first job listing.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: Uuid,
    pub status: String,
    pub progress: i16,
    pub languages: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

//=========================================================================================
// Shared Handler Helpers
//=========================================================================================

/// Extracts and parses the `x-user-id` header.
fn user_id_from_headers(headers: &HeaderMap) -> Result<Uuid, (StatusCode, String)> {
    let user_id_str = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                "x-user-id header is required".to_string(),
            )
        })?;

    Uuid::parse_str(user_id_str).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            "Invalid x-user-id format".to_string(),
        )
    })
}

/// Maps a port error onto an HTTP response per the error taxonomy:
/// validation surfaces as-is, not-found stays opaque, and anything
/// unexpected is logged in full but shown sanitized.
fn port_error_response(e: PortError) -> (StatusCode, String) {
    match e {
        PortError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
        PortError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        PortError::Vendor(msg) => {
            error!("Vendor failure reached the API boundary: {}", msg);
            (
                StatusCode::BAD_GATEWAY,
                "An upstream service is unavailable".to_string(),
            )
        }
        PortError::Unexpected(msg) => {
            error!("Unexpected error: {}", msg);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal error occurred".to_string(),
            )
        }
    }
}

/// Rejects background tracks whose length diverges too far from the voice
/// track; mixing pads or cuts within the tolerance but a gross mismatch is
/// almost always an upload mistake.
fn check_duration_tolerance(
    voice_secs: f64,
    background_secs: f64,
    tolerance_secs: f64,
) -> PortResult<()> {
    let difference = (voice_secs - background_secs).abs();
    if difference > tolerance_secs {
        return Err(PortError::Validation(format!(
            "Background track duration differs from the voice track by {:.1}s (allowed: {:.1}s)",
            difference, tolerance_secs
        )));
    }
    Ok(())
}

/// Builds the download link for a finished language. The artifact row is
/// written during export, before the task turns terminal, so the link is
/// withheld until the task is actually complete and again once the
/// artifact's retention expires.
fn download_link(stage: Stage, artifact: &Artifact, now: DateTime<Utc>) -> Option<String> {
    if stage == Stage::Complete && artifact.expires_at > now {
        Some(format!("/artifacts/{}", artifact.id))
    } else {
        None
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Create a new dubbing job.
///
/// Validates the requested languages and, when a background track is
/// supplied, that its duration roughly matches the voice track. Language
/// tasks are created in the `queued` stage for the worker to pick up.
#[utoipa::path(
    post,
    path = "/jobs",
    request_body = CreateJobRequest,
    responses(
        (status = 201, description = "Job created successfully", body = CreateJobResponse),
        (status = 400, description = "Invalid languages or mismatched track durations"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the requesting user.")
    )
)]
pub async fn create_job_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateJobRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = user_id_from_headers(&headers)?;

    if let Some(background_ref) = &payload.background_track_ref {
        let result: PortResult<()> = async {
            let voice = app_state.artifacts.fetch(&payload.voice_track_ref).await?;
            let background = app_state.artifacts.fetch(background_ref).await?;
            let voice_secs = app_state.mixer.probe_duration(&voice).await?;
            let background_secs = app_state.mixer.probe_duration(&background).await?;
            check_duration_tolerance(
                voice_secs,
                background_secs,
                app_state.config.duration_tolerance_secs,
            )
        }
        .await;
        result.map_err(port_error_response)?;
    }

    let job = app_state
        .store
        .create_job(
            user_id,
            &payload.languages,
            &payload.voice_track_ref,
            payload.background_track_ref.as_deref(),
        )
        .await
        .map_err(port_error_response)?;

    let response = CreateJobResponse {
        job_id: job.id,
        status: job.status.as_str().to_string(),
        languages: job.languages,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// Get the status of one job, including per-language progress.
#[utoipa::path(
    get,
    path = "/jobs/{job_id}",
    responses(
        (status = 200, description = "Current job status", body = JobStatusResponse),
        (status = 404, description = "Job not found (or owned by another user)")
    ),
    params(
        ("job_id" = Uuid, Path, description = "The job to inspect."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the requesting user.")
    )
)]
pub async fn get_job_handler(
    State(app_state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = user_id_from_headers(&headers)?;

    let job = app_state
        .store
        .get_job_for_user(job_id, user_id)
        .await
        .map_err(port_error_response)?;
    let tasks = app_state
        .store
        .list_tasks(job_id)
        .await
        .map_err(port_error_response)?;

    let mut languages = Vec::with_capacity(tasks.len());
    for task in tasks {
        let mut download_url = None;
        if let Some(artifact_id) = task.artifact_id {
            match app_state.store.get_artifact(artifact_id).await {
                Ok(artifact) => {
                    download_url = download_link(task.stage, &artifact, Utc::now());
                }
                Err(PortError::NotFound(_)) => {}
                Err(e) => return Err(port_error_response(e)),
            }
        }
        languages.push(LanguageStatus {
            language_code: task.language,
            stage: task.stage.as_str().to_string(),
            progress: task.progress,
            message: task.message,
            download_url,
        });
    }

    Ok(Json(JobStatusResponse {
        job_id: job.id,
        status: job.status.as_str().to_string(),
        progress: job.progress,
        message: job.message,
        estimated_completion: job.estimated_completion,
        languages,
    }))
}

/// List the requesting user's jobs, newest first.
#[utoipa::path(
    get,
    path = "/jobs",
    responses(
        (status = 200, description = "Jobs for the requesting user", body = [JobSummary])
    ),
    params(
        ("limit" = Option<i64>, Query, description = "Page size (default 20, max 100)."),
        ("offset" = Option<i64>, Query, description = "Rows to skip (default 0)."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the requesting user.")
    )
)]
pub async fn list_jobs_handler(
    State(app_state): State<Arc<AppState>>,
    Query(pagination): Query<Pagination>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = user_id_from_headers(&headers)?;
    let limit = pagination.limit.unwrap_or(20).clamp(1, 100);
    let offset = pagination.offset.unwrap_or(0).max(0);

    let jobs = app_state
        .store
        .list_jobs(user_id, limit, offset)
        .await
        .map_err(port_error_response)?;

    let summaries: Vec<JobSummary> = jobs
        .into_iter()
        .map(|job| JobSummary {
            job_id: job.id,
            status: job.status.as_str().to_string(),
            progress: job.progress,
            languages: job.languages,
            created_at: job.created_at,
        })
        .collect();

    Ok(Json(summaries))
}

/// Download a completed artifact.
///
/// The reference is time-limited: after the retention expiry the artifact is
/// reported as not found, the same as an artifact that never existed.
#[utoipa::path(
    get,
    path = "/artifacts/{artifact_id}",
    responses(
        (status = 200, description = "The artifact bytes"),
        (status = 404, description = "Unknown, expired, or foreign artifact")
    ),
    params(
        ("artifact_id" = Uuid, Path, description = "The artifact to download."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the requesting user.")
    )
)]
pub async fn download_artifact_handler(
    State(app_state): State<Arc<AppState>>,
    Path(artifact_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = user_id_from_headers(&headers)?;

    let artifact = app_state
        .store
        .get_artifact(artifact_id)
        .await
        .map_err(port_error_response)?;

    // Ownership check rides on the owner-scoped job lookup; a foreign
    // artifact is indistinguishable from a missing one.
    app_state
        .store
        .get_job_for_user(artifact.job_id, user_id)
        .await
        .map_err(port_error_response)?;

    if artifact.expires_at <= Utc::now() {
        return Err((
            StatusCode::NOT_FOUND,
            format!("Artifact {} not found", artifact_id),
        ));
    }

    let data = app_state
        .artifacts
        .fetch(&artifact.location)
        .await
        .map_err(port_error_response)?;

    let content_type = match artifact.kind {
        ArtifactKind::DubbedAudio | ArtifactKind::VoiceOnly => "audio/mpeg",
        ArtifactKind::Captions => "text/plain; charset=utf-8",
    };

    Ok(([(header::CONTENT_TYPE, content_type)], data))
}
