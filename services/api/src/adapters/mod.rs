pub mod db;
pub mod mixer;
pub mod storage;
pub mod stt;
pub mod translate;
pub mod tts;

pub use db::PgJobStore;
pub use mixer::FfmpegMixer;
pub use storage::FsArtifactStore;
pub use stt::OpenAiSttAdapter;
pub use translate::OpenAiTranslationAdapter;
pub use tts::OpenAiTtsAdapter;
