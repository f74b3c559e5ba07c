//! services/api/src/bin/worker.rs
//!
//! The background worker process. Any number of these can run against the
//! same database; the store's atomic task claim keeps them from processing
//! the same task twice.

use api_lib::{
    adapters::{
        FfmpegMixer, FsArtifactStore, OpenAiSttAdapter, OpenAiTranslationAdapter, OpenAiTtsAdapter,
        PgJobStore,
    },
    config::Config,
    error::ApiError,
    worker::{run_worker, Pipeline, PipelineSettings, WorkerSettings},
};
use async_openai::{
    config::OpenAIConfig,
    types::audio::{SpeechModel, Voice},
    Client,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting worker...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PgJobStore::new(
        db_pool.clone(),
        config.supported_languages.clone(),
    ));
    info!("Running database migrations...");
    store.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Vendor Adapters ---
    let api_key = config
        .openai_api_key
        .as_ref()
        .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?;
    let openai_config = OpenAIConfig::new().with_api_key(api_key);
    let openai_client = Client::with_config(openai_config);

    let stt = Arc::new(OpenAiSttAdapter::new(
        openai_client.clone(),
        config.stt_model.clone(),
    ));
    let translator = Arc::new(OpenAiTranslationAdapter::new(
        openai_client.clone(),
        config.translation_model.clone(),
    ));

    let tts_voice = match config.tts_voice.to_lowercase().as_str() {
        "alloy" => Voice::Alloy,
        "echo" => Voice::Echo,
        "fable" => Voice::Fable,
        "onyx" => Voice::Onyx,
        "nova" => Voice::Nova,
        "shimmer" => Voice::Shimmer,
        _ => {
            return Err(ApiError::Internal(format!(
                "Invalid TTS voice specified in config: '{}'",
                config.tts_voice
            )))
        }
    };
    let tts = Arc::new(OpenAiTtsAdapter::new(
        openai_client.clone(),
        SpeechModel::Tts1Hd,
        tts_voice,
    ));

    // --- 4. Initialize Storage and Media Adapters ---
    let artifacts = Arc::new(FsArtifactStore::new(config.artifact_root.clone()));
    let mixer = Arc::new(FfmpegMixer::new(
        config.ffmpeg_path.clone(),
        config.ffprobe_path.clone(),
    ));

    // --- 5. Assemble the Pipeline ---
    let pipeline = Arc::new(Pipeline {
        store,
        stt,
        translator,
        tts,
        mixer,
        artifacts,
        settings: PipelineSettings {
            max_vendor_attempts: config.max_vendor_attempts,
            retry_base_delay: config.retry_base_delay,
            translation_chunk_chars: config.translation_chunk_chars,
            artifact_retention: chrono::Duration::hours(config.artifact_retention_hours),
            secrets: vec![api_key.clone()],
        },
    });

    let claim_staleness = chrono::Duration::from_std(config.claim_staleness)
        .map_err(|e| ApiError::Internal(format!("Invalid CLAIM_STALENESS_SECS: {}", e)))?;
    let settings = WorkerSettings {
        poll_interval: config.poll_interval,
        concurrency: config.worker_concurrency,
        claim_staleness,
    };

    // --- 6. Run Until Interrupted ---
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_token.cancel();
        }
    });

    run_worker(pipeline, settings, shutdown).await;
    Ok(())
}
