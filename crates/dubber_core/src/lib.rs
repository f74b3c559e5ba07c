pub mod domain;
pub mod ports;

pub use domain::{Artifact, ArtifactKind, EventKind, Job, JobEvent, JobStatus, LanguageTask, Stage};
pub use ports::{
    ArtifactStore, AudioMixer, JobStore, PortError, PortResult, SpeechToTextService,
    TextToSpeechService, TranslationService,
};
