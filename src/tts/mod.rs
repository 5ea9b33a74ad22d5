//! Модуль для работы с TTS
//!
//! Конвейеру безразлично, какой движок синтезирует речь: ему нужен только
//! `SpeechSynthesizer`.

pub mod cache;
pub mod command;
pub mod openai;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::config::{SubTtsConfig, TtsEngine};

pub use cache::{CachedSynthesizer, TtsCache};
pub use command::CommandSynthesizer;
pub use openai::OpenAiSynthesizer;

/// Ошибки движка синтеза
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Движок вернул ошибку
    #[error("{engine} engine failed: {message}")]
    Engine { engine: String, message: String },

    /// Движок вернул пустой результат
    #[error("{engine} engine returned no audio")]
    EmptyAudio { engine: String },

    /// Ошибка HTTP запроса
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Ошибка ввода-вывода
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Контейнер синтезированного аудио
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioContainer {
    Wav,
    Mp3,
}

impl AudioContainer {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
        }
    }
}

/// Результат синтеза одной фразы
#[derive(Debug, Clone)]
pub struct SynthesizedSpeech {
    /// Закодированное аудио
    pub audio: Vec<u8>,
    /// Формат, в котором закодировано аудио
    pub container: AudioContainer,
}

/// Синтез речи: текст и голос на входе, аудио на выходе
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Имя движка для логов и ключей кэша
    fn name(&self) -> &str;

    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
    ) -> std::result::Result<SynthesizedSpeech, SynthesisError>;
}

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>|\{\\[^}]*\}").expect("tag regex is valid"));

/// Подготовка текста для TTS: теги разметки, сущности HTML, пробелы
pub fn prepare_text_for_tts(text: &str) -> String {
    let text = TAG_RE.replace_all(text, "");

    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&");

    text.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Создать движок по конфигурации, с кэшем, если он настроен
pub fn build_synthesizer(config: &SubTtsConfig) -> crate::error::Result<Box<dyn SpeechSynthesizer>> {
    let engine: Box<dyn SpeechSynthesizer> = match config.engine {
        TtsEngine::Offline => Box::new(CommandSynthesizer::new(config.offline.clone())),
        TtsEngine::Online => Box::new(OpenAiSynthesizer::new(config.openai.clone())),
    };

    match &config.cache_dir {
        Some(dir) => {
            let cache = TtsCache::new(dir)?;
            Ok(Box::new(CachedSynthesizer::new(engine, cache)))
        }
        None => Ok(engine),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_text_strips_markup() {
        assert_eq!(
            prepare_text_for_tts("<i>Hello</i>,\n  {\\an8}world &amp; friends"),
            "Hello, world & friends"
        );
    }

    #[test]
    fn test_prepare_text_of_whitespace_is_empty() {
        assert_eq!(prepare_text_for_tts(" \n\t "), "");
    }
}
