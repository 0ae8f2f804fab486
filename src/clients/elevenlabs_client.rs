// Eleven Labs API Client
// Text-to-speech for podcast narration

use reqwest::{Client, StatusCode};
use serde::Serialize;

use super::snippet;
use crate::config::{Secret, TtsConfig};
use crate::workflow::StageError;

const OUTPUT_FORMAT: &str = "mp3_44100_128";

#[derive(Clone)]
pub struct ElevenLabsClient {
    api_key: Option<Secret>,
    client: Client,
    base_url: String,
    voice_id: String,
    model_id: String,
}

// ============================================================================
// API REQUEST STRUCTURES
// ============================================================================

#[derive(Serialize, Debug)]
pub struct TextToSpeechRequest<'a> {
    pub text: &'a str,
    pub model_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_text: Option<&'a str>,
    pub voice_settings: VoiceSettings,
}

#[derive(Serialize, Debug)]
pub struct VoiceSettings {
    pub stability: f64,
    pub similarity_boost: f64,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 0.5,
            similarity_boost: 0.75,
        }
    }
}

// ============================================================================
// IMPLEMENTATION
// ============================================================================

impl ElevenLabsClient {
    pub fn new(config: &TtsConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            client: Client::new(),
            base_url: "https://api.elevenlabs.io/v1".to_string(),
            voice_id: config.voice_id.clone(),
            model_id: config.model_id.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Synthesize one chunk of narration as MP3. `previous_text` keeps the
    /// prosody continuous across chunk boundaries.
    pub async fn text_to_speech(
        &self,
        text: &str,
        previous_text: Option<&str>,
    ) -> Result<Vec<u8>, StageError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| StageError::Configuration("ELEVEN_LABS_API_KEY must be set".to_string()))?;

        let url = format!("{}/text-to-speech/{}", self.base_url, self.voice_id);
        let request_body = TextToSpeechRequest {
            text,
            model_id: &self.model_id,
            previous_text,
            voice_settings: VoiceSettings::default(),
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", api_key.expose())
            .header("Content-Type", "application/json")
            .query(&[("output_format", OUTPUT_FORMAT)])
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(StageError::Configuration(
                "ELEVEN_LABS_API_KEY was rejected".to_string(),
            ));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(StageError::Generation(format!(
                "Eleven Labs TTS API error ({}): {}",
                status,
                snippet(&error_text)
            )));
        }

        let audio_bytes = response.bytes().await?;
        if audio_bytes.is_empty() {
            return Err(StageError::Generation("Eleven Labs returned no audio".to_string()));
        }
        Ok(audio_bytes.to_vec())
    }
}
