//! Основной файл библиотеки subtts
//!
//! Библиотека превращает дорожку субтитров SRT в синхронизированную
//! озвучку: синтез речи, подгонка темпа под окна субтитров, сведение
//! сегментов и нормализация громкости. Вся обработка звука выполняется
//! через ffmpeg.

pub mod config;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod progress;
pub mod subtitle;
pub mod tts;
pub mod utils;

pub use config::SubTtsConfig;
pub use error::{Result, SubTtsError};
pub use pipeline::{ConvertReport, SubTts};
pub use progress::ProgressUpdate;
