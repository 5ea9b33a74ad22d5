//! Модель субтитра

use std::fmt;
use std::time::Duration;

/// Один субтитр: временное окно и текст
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    /// Порядковый номер из файла
    pub index: usize,
    /// Время начала
    pub start: Duration,
    /// Время окончания
    pub end: Duration,
    /// Текст субтитра
    pub text: String,
}

impl Cue {
    /// Создать новый экземпляр Cue
    pub fn new(index: usize, start: Duration, end: Duration, text: impl Into<String>) -> Self {
        Self {
            index,
            start,
            end,
            text: text.into(),
        }
    }

    pub fn start_secs(&self) -> f64 {
        self.start.as_secs_f64()
    }

    pub fn end_secs(&self) -> f64 {
        self.end.as_secs_f64()
    }

    /// Длительность окна в секундах; отрицательна для перевёрнутых окон
    pub fn window_secs(&self) -> f64 {
        self.end_secs() - self.start_secs()
    }

    /// Окно имеет положительную длительность
    pub fn has_valid_window(&self) -> bool {
        self.end > self.start
    }

    /// Текст пустой или состоит из пробелов
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Проблема с временными метками, найденная при проверке
#[derive(Debug, Clone, PartialEq)]
pub enum CueIssue {
    /// Окончание не позже начала
    InvalidWindow { index: usize, start: f64, end: f64 },
    /// Начало раньше окончания предыдущего субтитра
    Overlap {
        index: usize,
        start: f64,
        previous_end: f64,
    },
}

impl fmt::Display for CueIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidWindow { index, start, end } => write!(
                f,
                "subtitle {}: end ({:.3}s) <= start ({:.3}s)",
                index, end, start
            ),
            Self::Overlap {
                index,
                start,
                previous_end,
            } => write!(
                f,
                "subtitle {}: start ({:.3}s) < previous end ({:.3}s)",
                index, start, previous_end
            ),
        }
    }
}

/// Проверить временные метки в порядке следования субтитров
pub fn validate_cues(cues: &[Cue]) -> Vec<CueIssue> {
    let mut issues = Vec::new();

    for (i, cue) in cues.iter().enumerate() {
        if !cue.has_valid_window() {
            issues.push(CueIssue::InvalidWindow {
                index: cue.index,
                start: cue.start_secs(),
                end: cue.end_secs(),
            });
        }
        if i > 0 && cue.start < cues[i - 1].end {
            issues.push(CueIssue::Overlap {
                index: cue.index,
                start: cue.start_secs(),
                previous_end: cues[i - 1].end_secs(),
            });
        }
    }

    issues
}
