//! Модуль для работы с аудио
//!
//! Внешний инструмент скрыт за `runner::FilterGraphRunner`, обработка семплов
//! выполняется в процессе (`wav`).

pub mod dub;
pub mod loudness;
pub mod remux;
pub mod runner;
pub mod stretch;
pub mod wav;

pub use loudness::{LoudnessNormalizer, NormalizeOutcome};
pub use runner::{FfmpegRunner, FilterGraphRunner, FilterJob, ProcessError};
pub use stretch::{fit, FitOutcome, SpeedFit};
