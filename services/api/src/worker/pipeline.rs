//! services/api/src/worker/pipeline.rs
//!
//! Drives one claimed language task through the fixed stage sequence
//! transcribe -> translate -> synthesize -> mix -> export, persisting
//! progress after every step. All failures are caught at this boundary and
//! converted into a task-level error state so the polling loop never dies
//! on behalf of a single task.

use crate::worker::chunk::chunk_transcript;
use chrono::Utc;
use dubber_core::domain::{Artifact, ArtifactKind, EventKind, JobEvent, LanguageTask, Stage};
use dubber_core::ports::{
    ArtifactStore, AudioMixer, JobStore, PortError, PortResult, SpeechToTextService,
    TextToSpeechService, TranslationService,
};
use regex::Regex;
use std::future::Future;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

//=========================================================================================
// Settings and Construction
//=========================================================================================

/// Tunables for one pipeline run, derived from `Config` at startup.
#[derive(Clone)]
pub struct PipelineSettings {
    /// Attempts per vendor call before the stage fails.
    pub max_vendor_attempts: u32,
    /// Base backoff delay; doubles per attempt.
    pub retry_base_delay: Duration,
    /// Maximum characters per translation chunk.
    pub translation_chunk_chars: usize,
    /// Retention window applied to exported artifacts.
    pub artifact_retention: chrono::Duration,
    /// Credential material that must never reach a user-visible message.
    pub secrets: Vec<String>,
}

/// The per-task stage driver. One instance is shared by all worker tasks.
pub struct Pipeline {
    pub store: Arc<dyn JobStore>,
    pub stt: Arc<dyn SpeechToTextService>,
    pub translator: Arc<dyn TranslationService>,
    pub tts: Arc<dyn TextToSpeechService>,
    pub mixer: Arc<dyn AudioMixer>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub settings: PipelineSettings,
}

/// Interpolates progress within one stage's share of the bar. Computed in
/// `i64` so a very large chunk count cannot overflow the narrow progress
/// column, and clamped so `done > total` can never push past the span.
fn stage_progress(base: i16, span: i16, done: usize, total: usize) -> i16 {
    let total = total.max(1) as i64;
    let done = (done as i64).min(total);
    base + ((span as i64 * done) / total) as i16
}

//=========================================================================================
// Error-Message Sanitization
//=========================================================================================

/// Strips credential material from a vendor error message before it is
/// stored where a polling client can read it.
pub fn sanitize_vendor_message(message: &str, secrets: &[String]) -> String {
    static BEARER: OnceLock<Regex> = OnceLock::new();
    static API_KEY: OnceLock<Regex> = OnceLock::new();
    let bearer = BEARER.get_or_init(|| Regex::new(r"(?i)bearer\s+[A-Za-z0-9._\-]+").unwrap());
    let api_key = API_KEY.get_or_init(|| Regex::new(r"sk-[A-Za-z0-9_\-]{8,}").unwrap());

    let mut out = message.to_string();
    for secret in secrets {
        if !secret.is_empty() {
            out = out.replace(secret, "[redacted]");
        }
    }
    out = bearer.replace_all(&out, "[redacted]").into_owned();
    api_key.replace_all(&out, "[redacted]").into_owned()
}

//=========================================================================================
// Pipeline Implementation
//=========================================================================================

impl Pipeline {
    /// Runs a task that has already been claimed (stage = `transcribing`).
    ///
    /// Never returns an error: failures become a terminal `error` stage with
    /// a sanitized message, and the job aggregate is recomputed either way.
    pub async fn run_task(&self, task: &LanguageTask) {
        info!(task_id = %task.id, language = %task.language, "Task pipeline started");

        if let Err(e) = self.process(task).await {
            let message = sanitize_vendor_message(&e.to_string(), &self.settings.secrets);
            error!(task_id = %task.id, "Task failed: {}", message);
            if let Err(update_err) = self
                .store
                .update_task_progress(task.id, Stage::Error, task.progress, &message)
                .await
            {
                error!(task_id = %task.id, "Failed to persist task error: {}", update_err);
            }
            self.record(task, EventKind::TaskFailed, &message).await;
        }

        if let Err(e) = self.store.mark_job_status(task.job_id).await {
            error!(job_id = %task.job_id, "Failed to recompute job status: {}", e);
        }
    }

    async fn process(&self, task: &LanguageTask) -> PortResult<()> {
        // --- Transcribe ---
        self.set_stage(task, Stage::Transcribing, "Transcribing source audio")
            .await?;
        let job = self.store.get_job(task.job_id).await?;
        let voice_track = self.artifacts.fetch(&job.voice_track_ref).await?;
        let transcript = self
            .with_retry("transcription", || self.stt.transcribe_audio(&voice_track))
            .await?;

        // --- Translate ---
        self.set_stage(task, Stage::Translating, "Translating transcript")
            .await?;
        let chunks = chunk_transcript(&transcript, self.settings.translation_chunk_chars);
        if chunks.is_empty() {
            return Err(PortError::Vendor(
                "Transcription produced no usable text".to_string(),
            ));
        }
        // Chunks are translated independently but reassembled in original
        // order; synthesis concatenates audio in the same order.
        let mut translated = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let text = self
                .with_retry("translation", || {
                    self.translator.translate(chunk, &task.language)
                })
                .await?;
            translated.push(text);
            let progress = stage_progress(Stage::Translating.base_progress(), 25, i + 1, chunks.len());
            self.store
                .update_task_progress(task.id, Stage::Translating, progress, "Translating transcript")
                .await?;
        }

        // --- Synthesize ---
        self.set_stage(task, Stage::Synthesizing, "Generating dubbed speech")
            .await?;
        let mut voice_audio: Vec<u8> = Vec::new();
        for (i, text) in translated.iter().enumerate() {
            let audio = self
                .with_retry("synthesis", || self.tts.generate_audio(text, &task.language))
                .await?;
            voice_audio.extend_from_slice(&audio);
            let progress = stage_progress(Stage::Synthesizing.base_progress(), 20, i + 1, translated.len());
            self.store
                .update_task_progress(task.id, Stage::Synthesizing, progress, "Generating dubbed speech")
                .await?;
        }

        // --- Mix ---
        self.set_stage(task, Stage::Mixing, "Mixing audio tracks").await?;
        let mixed = match &job.background_track_ref {
            Some(background_ref) => {
                let background = self.artifacts.fetch(background_ref).await?;
                Some(self.mixer.overlay_background(&voice_audio, &background).await?)
            }
            None => None,
        };

        // --- Export ---
        self.set_stage(task, Stage::Exporting, "Uploading dubbed audio")
            .await?;
        let expires_at = Utc::now() + self.settings.artifact_retention;
        let prefix = format!("jobs/{}/{}", job.id, task.language);

        let final_audio = mixed.as_deref().unwrap_or(&voice_audio);
        let audio_location = format!("{prefix}/dubbed.mp3");
        let audio_size = self.artifacts.store(&audio_location, final_audio).await?;
        let primary = Artifact {
            id: Uuid::new_v4(),
            job_id: job.id,
            task_id: task.id,
            kind: ArtifactKind::DubbedAudio,
            location: audio_location,
            size_bytes: audio_size as i64,
            expires_at,
        };
        let primary_id = primary.id;
        self.store.create_artifact(primary).await?;

        // The unmixed voice is kept separately only when mixing changed it.
        if mixed.is_some() {
            let voice_location = format!("{prefix}/voice.mp3");
            let voice_size = self.artifacts.store(&voice_location, &voice_audio).await?;
            self.store
                .create_artifact(Artifact {
                    id: Uuid::new_v4(),
                    job_id: job.id,
                    task_id: task.id,
                    kind: ArtifactKind::VoiceOnly,
                    location: voice_location,
                    size_bytes: voice_size as i64,
                    expires_at,
                })
                .await?;
        }

        let captions_location = format!("{prefix}/captions.txt");
        let captions = translated.join("\n");
        let captions_size = self
            .artifacts
            .store(&captions_location, captions.as_bytes())
            .await?;
        self.store
            .create_artifact(Artifact {
                id: Uuid::new_v4(),
                job_id: job.id,
                task_id: task.id,
                kind: ArtifactKind::Captions,
                location: captions_location,
                size_bytes: captions_size as i64,
                expires_at,
            })
            .await?;

        self.store
            .set_task_artifact(task.id, primary_id, audio_size as i64)
            .await?;
        self.set_stage(task, Stage::Complete, "Dubbed audio ready").await?;
        info!(task_id = %task.id, language = %task.language, "Task pipeline complete");
        Ok(())
    }

    /// Retries transient vendor failures with bounded exponential backoff.
    /// Validation and other non-vendor errors are surfaced immediately.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut call: F) -> PortResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PortResult<T>>,
    {
        let mut delay = self.settings.retry_base_delay;
        let mut attempt: u32 = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(PortError::Vendor(message)) => {
                    if attempt >= self.settings.max_vendor_attempts {
                        return Err(PortError::Vendor(format!(
                            "{} failed after {} attempts: {}",
                            what, attempt, message
                        )));
                    }
                    warn!(
                        "{} attempt {}/{} failed, retrying in {:?}: {}",
                        what, attempt, self.settings.max_vendor_attempts, delay, message
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn set_stage(&self, task: &LanguageTask, stage: Stage, message: &str) -> PortResult<()> {
        self.store
            .update_task_progress(task.id, stage, stage.base_progress(), message)
            .await?;
        self.record(
            task,
            EventKind::StageChanged,
            &format!("{} -> {}", task.language, stage.as_str()),
        )
        .await;
        Ok(())
    }

    /// Audit events are best-effort; losing one must not fail the stage.
    async fn record(&self, task: &LanguageTask, kind: EventKind, detail: &str) {
        let event = JobEvent {
            id: Uuid::new_v4(),
            job_id: task.job_id,
            task_id: Some(task.id),
            kind,
            detail: detail.to_string(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.record_event(event).await {
            warn!(task_id = %task.id, "Failed to record audit event: {}", e);
        }
    }
}

//=========================================================================================
// Tests
//=========================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use dubber_core::domain::{Job, JobStatus};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    //-------------------------------------------------------------------------------------
    // In-memory JobStore
    //-------------------------------------------------------------------------------------

    #[derive(Default)]
    struct MemJobStore {
        jobs: Mutex<HashMap<Uuid, Job>>,
        tasks: Mutex<HashMap<Uuid, LanguageTask>>,
        events: Mutex<Vec<JobEvent>>,
        artifacts: Mutex<HashMap<Uuid, Artifact>>,
    }

    impl MemJobStore {
        fn insert_job(&self, user_id: Uuid, languages: &[&str], background: Option<&str>) -> Job {
            let now = Utc::now();
            let job = Job {
                id: Uuid::new_v4(),
                user_id,
                status: JobStatus::Pending,
                progress: 0,
                message: String::new(),
                languages: languages.iter().map(|s| s.to_string()).collect(),
                voice_track_ref: "uploads/voice.mp3".to_string(),
                background_track_ref: background.map(|s| s.to_string()),
                created_at: now,
                updated_at: now,
                estimated_completion: None,
            };
            self.jobs.lock().unwrap().insert(job.id, job.clone());
            for lang in languages {
                let task = LanguageTask {
                    id: Uuid::new_v4(),
                    job_id: job.id,
                    language: lang.to_string(),
                    stage: Stage::Queued,
                    progress: 0,
                    message: String::new(),
                    artifact_id: None,
                    artifact_size: None,
                    created_at: now,
                    updated_at: now,
                };
                self.tasks.lock().unwrap().insert(task.id, task);
            }
            job
        }

        fn task_for(&self, job_id: Uuid, language: &str) -> LanguageTask {
            self.tasks
                .lock()
                .unwrap()
                .values()
                .find(|t| t.job_id == job_id && t.language == language)
                .cloned()
                .unwrap()
        }
    }

    #[async_trait]
    impl JobStore for MemJobStore {
        async fn create_job(
            &self,
            user_id: Uuid,
            languages: &[String],
            _voice_track_ref: &str,
            _background_track_ref: Option<&str>,
        ) -> PortResult<Job> {
            if languages.is_empty() {
                return Err(PortError::Validation("no languages".to_string()));
            }
            let langs: Vec<&str> = languages.iter().map(|s| s.as_str()).collect();
            Ok(self.insert_job(user_id, &langs, None))
        }

        async fn get_job(&self, job_id: Uuid) -> PortResult<Job> {
            self.jobs
                .lock()
                .unwrap()
                .get(&job_id)
                .cloned()
                .ok_or_else(|| PortError::NotFound(format!("Job {} not found", job_id)))
        }

        async fn get_job_for_user(&self, job_id: Uuid, user_id: Uuid) -> PortResult<Job> {
            match self.jobs.lock().unwrap().get(&job_id) {
                Some(job) if job.user_id == user_id => Ok(job.clone()),
                _ => Err(PortError::NotFound(format!("Job {} not found", job_id))),
            }
        }

        async fn list_jobs(&self, user_id: Uuid, _limit: i64, _offset: i64) -> PortResult<Vec<Job>> {
            let mut jobs: Vec<Job> = self
                .jobs
                .lock()
                .unwrap()
                .values()
                .filter(|j| j.user_id == user_id)
                .cloned()
                .collect();
            jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(jobs)
        }

        async fn list_tasks(&self, job_id: Uuid) -> PortResult<Vec<LanguageTask>> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.job_id == job_id)
                .cloned()
                .collect())
        }

        async fn list_pending_tasks(
            &self,
            limit: i64,
            stale_after: ChronoDuration,
        ) -> PortResult<Vec<LanguageTask>> {
            let cutoff = Utc::now() - stale_after;
            let mut pending: Vec<LanguageTask> = self
                .tasks
                .lock()
                .unwrap()
                .values()
                .filter(|t| {
                    t.stage == Stage::Queued || (t.stage.is_in_flight() && t.updated_at < cutoff)
                })
                .cloned()
                .collect();
            pending.sort_by_key(|t| t.created_at);
            pending.truncate(limit as usize);
            Ok(pending)
        }

        async fn claim_task(&self, task_id: Uuid, stale_after: ChronoDuration) -> PortResult<bool> {
            let cutoff = Utc::now() - stale_after;
            let mut tasks = self.tasks.lock().unwrap();
            let task = tasks
                .get_mut(&task_id)
                .ok_or_else(|| PortError::NotFound(format!("Task {} not found", task_id)))?;
            let claimable = task.stage == Stage::Queued
                || (task.stage.is_in_flight() && task.updated_at < cutoff);
            if claimable {
                task.stage = Stage::Transcribing;
                task.progress = Stage::Transcribing.base_progress();
                task.updated_at = Utc::now();
            }
            Ok(claimable)
        }

        async fn update_task_progress(
            &self,
            task_id: Uuid,
            stage: Stage,
            progress: i16,
            message: &str,
        ) -> PortResult<()> {
            let mut tasks = self.tasks.lock().unwrap();
            if let Some(task) = tasks.get_mut(&task_id) {
                if task.stage.is_terminal() {
                    return Ok(());
                }
                task.stage = stage;
                task.progress = progress;
                task.message = message.to_string();
                task.updated_at = Utc::now();
            }
            Ok(())
        }

        async fn set_task_artifact(
            &self,
            task_id: Uuid,
            artifact_id: Uuid,
            size_bytes: i64,
        ) -> PortResult<()> {
            let mut tasks = self.tasks.lock().unwrap();
            if let Some(task) = tasks.get_mut(&task_id) {
                if !task.stage.is_terminal() {
                    task.artifact_id = Some(artifact_id);
                    task.artifact_size = Some(size_bytes);
                }
            }
            Ok(())
        }

        async fn mark_job_status(&self, job_id: Uuid) -> PortResult<JobStatus> {
            let stages: Vec<Stage> = self
                .tasks
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.job_id == job_id)
                .map(|t| t.stage)
                .collect();
            let status = JobStatus::aggregate(&stages);
            if let Some(job) = self.jobs.lock().unwrap().get_mut(&job_id) {
                job.status = status;
                job.updated_at = Utc::now();
            }
            Ok(status)
        }

        async fn record_event(&self, event: JobEvent) -> PortResult<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }

        async fn create_artifact(&self, artifact: Artifact) -> PortResult<()> {
            self.artifacts.lock().unwrap().insert(artifact.id, artifact);
            Ok(())
        }

        async fn get_artifact(&self, artifact_id: Uuid) -> PortResult<Artifact> {
            self.artifacts
                .lock()
                .unwrap()
                .get(&artifact_id)
                .cloned()
                .ok_or_else(|| PortError::NotFound(format!("Artifact {} not found", artifact_id)))
        }
    }

    //-------------------------------------------------------------------------------------
    // In-memory vendor and media adapters
    //-------------------------------------------------------------------------------------

    struct MemBlobStore {
        blobs: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MemBlobStore {
        fn with_voice(transcript_audio: &[u8]) -> Self {
            let mut blobs = HashMap::new();
            blobs.insert("uploads/voice.mp3".to_string(), transcript_audio.to_vec());
            Self {
                blobs: Mutex::new(blobs),
            }
        }
    }

    #[async_trait]
    impl ArtifactStore for MemBlobStore {
        async fn fetch(&self, location: &str) -> PortResult<Vec<u8>> {
            self.blobs
                .lock()
                .unwrap()
                .get(location)
                .cloned()
                .ok_or_else(|| PortError::NotFound(format!("No stored track at '{}'", location)))
        }

        async fn store(&self, location: &str, data: &[u8]) -> PortResult<u64> {
            self.blobs
                .lock()
                .unwrap()
                .insert(location.to_string(), data.to_vec());
            Ok(data.len() as u64)
        }
    }

    struct StubStt {
        transcript: String,
    }

    #[async_trait]
    impl SpeechToTextService for StubStt {
        async fn transcribe_audio(&self, _audio_data: &[u8]) -> PortResult<String> {
            Ok(self.transcript.clone())
        }
    }

    /// Tags each chunk so tests can verify language and ordering.
    struct StubTranslator;

    #[async_trait]
    impl TranslationService for StubTranslator {
        async fn translate(&self, text: &str, target_language: &str) -> PortResult<String> {
            Ok(format!("[{}]{}", target_language, text))
        }
    }

    /// Echoes the input text back as "audio" bytes, optionally failing for a
    /// configured language to model a flaky vendor.
    struct StubTts {
        fail_language: Option<String>,
        calls: AtomicU32,
    }

    impl StubTts {
        fn reliable() -> Self {
            Self {
                fail_language: None,
                calls: AtomicU32::new(0),
            }
        }

        fn failing_for(language: &str) -> Self {
            Self {
                fail_language: Some(language.to_string()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl TextToSpeechService for StubTts {
        async fn generate_audio(&self, text: &str, language: &str) -> PortResult<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_language.as_deref() == Some(language) {
                return Err(PortError::Vendor(
                    "synthesis backend unavailable (Bearer sk-test1234567890)".to_string(),
                ));
            }
            Ok(text.as_bytes().to_vec())
        }
    }

    struct PassthroughMixer;

    #[async_trait]
    impl AudioMixer for PassthroughMixer {
        async fn probe_duration(&self, _audio: &[u8]) -> PortResult<f64> {
            Ok(60.0)
        }

        async fn overlay_background(
            &self,
            voice: &[u8],
            _background: &[u8],
        ) -> PortResult<Vec<u8>> {
            let mut mixed = b"mixed:".to_vec();
            mixed.extend_from_slice(voice);
            Ok(mixed)
        }
    }

    //-------------------------------------------------------------------------------------
    // Harness
    //-------------------------------------------------------------------------------------

    fn settings() -> PipelineSettings {
        PipelineSettings {
            max_vendor_attempts: 3,
            retry_base_delay: Duration::from_millis(1),
            translation_chunk_chars: 40,
            artifact_retention: ChronoDuration::hours(48),
            secrets: vec!["super-secret-key".to_string()],
        }
    }

    fn pipeline(
        store: Arc<MemJobStore>,
        blobs: Arc<MemBlobStore>,
        tts: Arc<StubTts>,
        transcript: &str,
    ) -> Pipeline {
        Pipeline {
            store,
            stt: Arc::new(StubStt {
                transcript: transcript.to_string(),
            }),
            translator: Arc::new(StubTranslator),
            tts,
            mixer: Arc::new(PassthroughMixer),
            artifacts: blobs,
            settings: settings(),
        }
    }

    async fn claim(store: &MemJobStore, task: &LanguageTask) -> LanguageTask {
        assert!(store.claim_task(task.id, ChronoDuration::seconds(300)).await.unwrap());
        store.tasks.lock().unwrap().get(&task.id).cloned().unwrap()
    }

    //-------------------------------------------------------------------------------------
    // Tests
    //-------------------------------------------------------------------------------------

    #[tokio::test]
    async fn successful_task_completes_with_artifacts() {
        let store = Arc::new(MemJobStore::default());
        let blobs = Arc::new(MemBlobStore::with_voice(b"raw voice"));
        let job = store.insert_job(Uuid::new_v4(), &["es"], None);
        let task = claim(&store, &store.task_for(job.id, "es")).await;

        let p = pipeline(store.clone(), blobs.clone(), Arc::new(StubTts::reliable()), "Hola mundo.");
        p.run_task(&task).await;

        let task = store.task_for(job.id, "es");
        assert_eq!(task.stage, Stage::Complete);
        assert_eq!(task.progress, 100);
        assert!(task.artifact_id.is_some());

        let artifact = store.get_artifact(task.artifact_id.unwrap()).await.unwrap();
        assert_eq!(artifact.kind, ArtifactKind::DubbedAudio);
        assert!(artifact.expires_at > Utc::now());
        assert!(blobs.fetch(&artifact.location).await.is_ok());

        assert_eq!(store.get_job(job.id).await.unwrap().status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn synthesized_audio_preserves_chunk_order() {
        let store = Arc::new(MemJobStore::default());
        let blobs = Arc::new(MemBlobStore::with_voice(b"raw voice"));
        let job = store.insert_job(Uuid::new_v4(), &["fr"], None);
        let task = claim(&store, &store.task_for(job.id, "fr")).await;

        // Small chunk limit forces several chunks out of this transcript.
        let transcript = "Alpha one two. Bravo three four. Charlie five six. Delta seven eight.";
        let p = pipeline(store.clone(), blobs.clone(), Arc::new(StubTts::reliable()), transcript);
        p.run_task(&task).await;

        let chunks = chunk_transcript(transcript, 40);
        assert!(chunks.len() > 1);
        let expected: Vec<u8> = chunks
            .iter()
            .flat_map(|c| format!("[fr]{}", c).into_bytes())
            .collect();

        let task = store.task_for(job.id, "fr");
        let artifact = store.get_artifact(task.artifact_id.unwrap()).await.unwrap();
        assert_eq!(blobs.fetch(&artifact.location).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn background_track_is_mixed_and_voice_only_kept() {
        let store = Arc::new(MemJobStore::default());
        let blobs = Arc::new(MemBlobStore::with_voice(b"raw voice"));
        blobs.store("uploads/background.mp3", b"music").await.unwrap();
        let job = store.insert_job(Uuid::new_v4(), &["de"], Some("uploads/background.mp3"));
        let task = claim(&store, &store.task_for(job.id, "de")).await;

        let p = pipeline(store.clone(), blobs.clone(), Arc::new(StubTts::reliable()), "Guten Tag.");
        p.run_task(&task).await;

        let task = store.task_for(job.id, "de");
        assert_eq!(task.stage, Stage::Complete);
        let artifact = store.get_artifact(task.artifact_id.unwrap()).await.unwrap();
        let mixed = blobs.fetch(&artifact.location).await.unwrap();
        assert!(mixed.starts_with(b"mixed:"));
        // Voice-only artifact exists alongside the mix.
        let kinds: Vec<ArtifactKind> = store
            .artifacts
            .lock()
            .unwrap()
            .values()
            .map(|a| a.kind)
            .collect();
        assert!(kinds.contains(&ArtifactKind::VoiceOnly));
        assert!(kinds.contains(&ArtifactKind::Captions));
    }

    #[tokio::test]
    async fn vendor_retry_exhaustion_marks_task_error_with_sanitized_message() {
        let store = Arc::new(MemJobStore::default());
        let blobs = Arc::new(MemBlobStore::with_voice(b"raw voice"));
        let job = store.insert_job(Uuid::new_v4(), &["fr"], None);
        let task = claim(&store, &store.task_for(job.id, "fr")).await;

        let tts = Arc::new(StubTts::failing_for("fr"));
        let p = pipeline(store.clone(), blobs, tts.clone(), "Bonjour.");
        p.run_task(&task).await;

        // Bounded retries: exactly max_vendor_attempts calls, then escalation.
        assert_eq!(tts.calls.load(Ordering::SeqCst), 3);

        let task = store.task_for(job.id, "fr");
        assert_eq!(task.stage, Stage::Error);
        assert!(task.message.contains("synthesis failed after 3 attempts"));
        assert!(!task.message.contains("sk-test1234567890"));
        assert!(task.message.contains("[redacted]"));
        assert_eq!(store.get_job(job.id).await.unwrap().status, JobStatus::Error);
    }

    #[tokio::test]
    async fn partial_failure_keeps_completed_sibling_and_sequences_job_status() {
        let store = Arc::new(MemJobStore::default());
        let blobs = Arc::new(MemBlobStore::with_voice(b"raw voice"));
        let job = store.insert_job(Uuid::new_v4(), &["es", "fr"], None);

        let tts = Arc::new(StubTts::failing_for("fr"));
        let p = pipeline(store.clone(), blobs, tts, "Hola. Bonjour.");

        // es completes first; fr has not started, so the job must still be
        // processing rather than complete or error.
        let es_task = claim(&store, &store.task_for(job.id, "es")).await;
        p.run_task(&es_task).await;
        assert_eq!(store.task_for(job.id, "es").stage, Stage::Complete);
        assert_eq!(store.get_job(job.id).await.unwrap().status, JobStatus::Processing);

        // fr exhausts its retries; only now does the job become error, and
        // the completed es task keeps its downloadable artifact.
        let fr_task = claim(&store, &store.task_for(job.id, "fr")).await;
        p.run_task(&fr_task).await;
        assert_eq!(store.task_for(job.id, "fr").stage, Stage::Error);
        assert_eq!(store.get_job(job.id).await.unwrap().status, JobStatus::Error);

        let es_task = store.task_for(job.id, "es");
        assert_eq!(es_task.stage, Stage::Complete);
        assert!(store.get_artifact(es_task.artifact_id.unwrap()).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_claims_have_exactly_one_winner() {
        let store = Arc::new(MemJobStore::default());
        let job = store.insert_job(Uuid::new_v4(), &["es"], None);
        let task = store.task_for(job.id, "es");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let task_id = task.id;
            handles.push(tokio::spawn(async move {
                store.claim_task(task_id, ChronoDuration::seconds(300)).await.unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn terminal_task_ignores_stale_progress_updates() {
        let store = Arc::new(MemJobStore::default());
        let blobs = Arc::new(MemBlobStore::with_voice(b"raw voice"));
        let job = store.insert_job(Uuid::new_v4(), &["es"], None);
        let task = claim(&store, &store.task_for(job.id, "es")).await;

        let p = pipeline(store.clone(), blobs, Arc::new(StubTts::reliable()), "Hola.");
        p.run_task(&task).await;
        assert_eq!(store.task_for(job.id, "es").stage, Stage::Complete);

        // A stale worker reporting late must not resurrect the task.
        store
            .update_task_progress(task.id, Stage::Transcribing, 10, "stale update")
            .await
            .unwrap();
        let after = store.task_for(job.id, "es");
        assert_eq!(after.stage, Stage::Complete);
        assert_eq!(after.progress, 100);
        assert_ne!(after.message, "stale update");
    }

    #[tokio::test]
    async fn owner_scoped_lookup_hides_foreign_jobs() {
        let store = Arc::new(MemJobStore::default());
        let owner = Uuid::new_v4();
        let job = store.insert_job(owner, &["es"], None);

        assert!(store.get_job_for_user(job.id, owner).await.is_ok());

        // A different user must get the same answer as for a job that does
        // not exist at all.
        let foreign = store.get_job_for_user(job.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(foreign, PortError::NotFound(_)));
        assert_eq!(foreign.to_string(), format!("Item not found: Job {} not found", job.id));
    }

    #[test]
    fn stage_progress_stays_in_range_for_huge_chunk_counts() {
        // A day-long transcript can produce thousands of chunks; the
        // interpolation must not wrap the progress column.
        let base = Stage::Translating.base_progress();
        assert_eq!(stage_progress(base, 25, 1, 5000), base);
        assert_eq!(stage_progress(base, 25, 5000, 5000), base + 25);
        for i in 1..=5000usize {
            let p = stage_progress(base, 25, i, 5000);
            assert!((base..=base + 25).contains(&p));
        }

        // Single-chunk jobs land exactly on the stage boundary.
        assert_eq!(stage_progress(base, 25, 1, 1), base + 25);
        // A zero total must not divide by zero.
        assert_eq!(stage_progress(base, 25, 0, 0), base);
    }

    #[test]
    fn sanitize_redacts_known_secrets_and_token_shapes() {
        let secrets = vec!["super-secret-key".to_string()];
        let msg = "401 from vendor: Authorization: Bearer abc.def-123 key=super-secret-key id=sk-live1234567890abc";
        let clean = sanitize_vendor_message(msg, &secrets);
        assert!(!clean.contains("super-secret-key"));
        assert!(!clean.contains("abc.def-123"));
        assert!(!clean.contains("sk-live1234567890abc"));
        assert!(clean.contains("[redacted]"));
        assert!(clean.contains("401 from vendor"));
    }
}
