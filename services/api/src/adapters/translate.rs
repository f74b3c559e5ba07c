//! services/api/src/adapters/translate.rs
//!
//! This module contains the adapter for LLM-based text translation.
//! It implements the `TranslationService` port from the `core` crate.

const SYSTEM_INSTRUCTIONS: &str = r#"You are a professional translator preparing text for spoken dubbing.

Rules:
- Translate the user's text into the requested target language.
- Preserve the meaning, tone, and sentence structure of the original.
- The output will be read aloud by a text-to-speech voice, so produce natural
  spoken phrasing rather than a literal word-for-word rendering.
- Do NOT add commentary, notes, or quotation marks around the translation.
- Output ONLY the translated text, nothing else."#;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::responses::CreateResponseArgs,
    Client,
};
use async_trait::async_trait;
use dubber_core::ports::{PortError, PortResult, TranslationService};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `TranslationService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiTranslationAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiTranslationAdapter {
    /// Creates a new `OpenAiTranslationAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

//=========================================================================================
// `TranslationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl TranslationService for OpenAiTranslationAdapter {
    /// Translates one chunk of transcript text into the target language.
    async fn translate(&self, text: &str, target_language: &str) -> PortResult<String> {
        let user_input = format!(
            "Target language code: {}\n\nTEXT:\n{}",
            target_language, text
        );

        let request = CreateResponseArgs::default()
            .model(&self.model)
            .instructions(SYSTEM_INSTRUCTIONS)
            .input(user_input)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .responses()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Vendor(e.to_string()))?;

        let translated = response.output_text().unwrap_or_default();
        if translated.trim().is_empty() {
            return Err(PortError::Vendor(
                "Translation service returned an empty response".to_string(),
            ));
        }
        Ok(translated.trim().to_string())
    }
}
