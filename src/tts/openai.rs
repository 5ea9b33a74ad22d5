//! Сетевой движок синтеза на базе OpenAI-совместимого API

use async_trait::async_trait;
use log::{debug, error};
use reqwest::Client;

use crate::config::OpenAiConfig;
use crate::tts::{AudioContainer, SpeechSynthesizer, SynthesisError, SynthesizedSpeech};

const ENGINE_NAME: &str = "openai";

pub struct OpenAiSynthesizer {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiSynthesizer {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn speech_url(&self) -> String {
        format!("{}/audio/speech", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSynthesizer {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
    ) -> Result<SynthesizedSpeech, SynthesisError> {
        debug!("Sending TTS request ({} chars, voice {})", text.len(), voice);

        let response = self
            .client
            .post(self.speech_url())
            .bearer_auth(&self.config.api_key)
            .json(&serde_json::json!({
                "model": self.config.model,
                "voice": voice,
                "input": text,
                "response_format": "wav",
                "speed": 1.0
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = match response.text().await {
                Ok(text) => text,
                Err(e) => format!("Failed to read error response: {}", e),
            };
            error!("TTS API error (status {}): {}", status, error_text);
            return Err(SynthesisError::Engine {
                engine: ENGINE_NAME.to_string(),
                message: format!("status {}: {}", status, error_text),
            });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(SynthesisError::EmptyAudio {
                engine: ENGINE_NAME.to_string(),
            });
        }

        Ok(SynthesizedSpeech {
            audio: bytes.to_vec(),
            container: AudioContainer::Wav,
        })
    }
}
