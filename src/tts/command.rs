//! Локальный движок синтеза, запускаемый как внешняя программа.
//!
//! Программа должна записать WAV в файл, переданный через `{output}`.

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use crate::config::CommandEngineConfig;
use crate::tts::{AudioContainer, SpeechSynthesizer, SynthesisError, SynthesizedSpeech};

pub struct CommandSynthesizer {
    config: CommandEngineConfig,
}

impl CommandSynthesizer {
    pub fn new(config: CommandEngineConfig) -> Self {
        Self { config }
    }

    /// Подставить голос, путь и текст в аргументы
    fn render_args(&self, voice: &str, output: &str, text: &str) -> Vec<String> {
        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{voice}", voice)
                    .replace("{output}", output)
                    .replace("{text}", text)
            })
            .collect()
    }
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    fn name(&self) -> &str {
        &self.config.program
    }

    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
    ) -> Result<SynthesizedSpeech, SynthesisError> {
        let scratch = tempfile::Builder::new()
            .prefix("subtts_offline_")
            .suffix(".wav")
            .tempfile()?;
        let output = scratch.path().to_string_lossy().to_string();
        let args = self.render_args(voice, &output, text);

        debug!("Running offline TTS: {} {:?}", self.config.program, args);
        let result = Command::new(&self.config.program)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .output()
            .await?;

        if !result.status.success() {
            return Err(SynthesisError::Engine {
                engine: self.config.program.clone(),
                message: format!(
                    "exit status {}: {}",
                    result.status,
                    String::from_utf8_lossy(&result.stderr).trim()
                ),
            });
        }

        let audio = tokio::fs::read(scratch.path()).await?;
        if audio.is_empty() {
            return Err(SynthesisError::EmptyAudio {
                engine: self.config.program.clone(),
            });
        }

        Ok(SynthesizedSpeech {
            audio,
            container: AudioContainer::Wav,
        })
    }
}
