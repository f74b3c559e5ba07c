//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use dubber_core::ports::{ArtifactStore, AudioMixer, JobStore};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub mixer: Arc<dyn AudioMixer>,
    pub config: Arc<Config>,
}
