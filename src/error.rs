//! Модуль обработки ошибок библиотеки subtts
//!
//! Ошибки уровня одного субтитра (синтез, подгонка темпа, нормализация сегмента)
//! сюда не попадают: они изолируются в `pipeline::SegmentOutcome`, ошибки
//! движков описывает `tts::SynthesisError`.
//! Здесь только то, что прерывает запуск целиком.

use thiserror::Error;

use crate::media::runner::ProcessError;

/// Ошибки библиотеки subtts
#[derive(Debug, Error)]
pub enum SubTtsError {
    /// Ошибка ввода-вывода
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Ошибка сериализации/десериализации JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Ошибка чтения или записи WAV
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// Ошибка парсинга субтитров
    #[error("Subtitle parsing error: {0}")]
    SubtitleParsing(String),

    /// Некорректные временные метки в субтитрах
    #[error("Invalid subtitle timing: {0}")]
    InvalidTiming(String),

    /// Ошибка чтения словаря замен
    #[error("Dictionary error: {0}")]
    Dictionary(String),

    /// Внешний процесс завершился с ошибкой
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Ошибка сведения пакета сегментов
    #[error("Batch {batch} mix failed: {source}")]
    BatchMix {
        batch: usize,
        #[source]
        source: ProcessError,
    },

    /// Ошибка объединения пакетов в мастер-дорожку
    #[error("Batch merge failed: {0}")]
    BatchMerge(#[source] ProcessError),

    /// Ошибка замены аудиодорожки в видео
    #[error("Remux failed: {0}")]
    Remux(#[source] ProcessError),

    /// Ошибка обработки аудио
    #[error("Audio processing error: {0}")]
    AudioProcessing(String),

    /// Ошибка конфигурации
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Файл не найден
    #[error("File not found: {0}")]
    FileNotFound(String),
}

/// Тип Result для библиотеки subtts
pub type Result<T> = std::result::Result<T, SubTtsError>;
