//! Модуль для работы с субтитрами

pub mod cue;
pub mod dictionary;
pub mod fixer;
pub mod parser;

pub use cue::{validate_cues, Cue, CueIssue};
pub use dictionary::Dictionary;
