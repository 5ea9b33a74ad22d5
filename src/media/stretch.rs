//! Подгонка длительности речи под окно субтитра.
//!
//! `speed_factor` здесь означает отношение новой длительности к исходной:
//! значения меньше 1 укорачивают речь, больше 1 удлиняют. Пороги
//! `speedup`/`slowdown` ограничивают этот коэффициент сверху и снизу.
//! Сам темп меняет ffmpeg фильтром `atempo` (с сохранением высоты тона),
//! его параметр обратен коэффициенту длительности.

use std::path::Path;

use crate::config::{consts, SpeedPolicy};
use crate::media::runner::FilterJob;

/// Коэффициенты ближе к 1 не требуют обработки
const IDENTITY_EPSILON: f64 = 1e-3;

/// Пределы одного фильтра atempo
const ATEMPO_MIN: f64 = 0.5;
const ATEMPO_MAX: f64 = 2.0;

/// Результат подгонки
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedFit {
    /// Отношение новой длительности к исходной
    pub speed_factor: f64,
    /// Длительность после подгонки (секунды)
    pub adjusted_duration: f64,
    /// Коэффициент был ограничен порогом или минимальной длительностью
    pub clamped: bool,
}

impl SpeedFit {
    /// Параметр фильтра atempo
    pub fn tempo(&self) -> f64 {
        1.0 / self.speed_factor
    }

    pub fn is_identity(&self) -> bool {
        (self.speed_factor - 1.0).abs() < IDENTITY_EPSILON
    }
}

/// Почему подгонка не выполнялась
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FitSkip {
    /// Автоподстройка выключена
    Disabled,
    /// Речь слишком короткая для осмысленной подгонки
    RawTooShort { raw: f64 },
    /// Окно субтитра пустое
    EmptyWindow { window: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FitOutcome {
    Fitted(SpeedFit),
    Skipped(FitSkip),
}

/// Вычислить коэффициент, при котором речь укладывается в окно с допуском
pub fn fit(raw_duration: f64, window_duration: f64, policy: &SpeedPolicy) -> FitOutcome {
    if !policy.auto_adjust_enabled {
        return FitOutcome::Skipped(FitSkip::Disabled);
    }
    if raw_duration < consts::MIN_MEANINGFUL_DURATION {
        return FitOutcome::Skipped(FitSkip::RawTooShort { raw: raw_duration });
    }
    if window_duration <= 0.0 {
        return FitOutcome::Skipped(FitSkip::EmptyWindow {
            window: window_duration,
        });
    }

    let max_allowed = window_duration + consts::FIT_TOLERANCE;
    let mut speed_factor = max_allowed / raw_duration;
    let mut clamped = false;

    if policy.speedup_enabled && speed_factor > 1.0 + policy.speedup_threshold {
        speed_factor = 1.0 + policy.speedup_threshold;
        clamped = true;
    }
    if policy.slowdown_enabled && speed_factor < 1.0 - policy.slowdown_threshold {
        speed_factor = 1.0 - policy.slowdown_threshold;
        clamped = true;
    }

    let mut adjusted_duration = raw_duration * speed_factor;

    // Минимальная длительность важнее порогов
    if adjusted_duration < consts::MIN_ADJUSTED_DURATION {
        speed_factor = consts::MIN_ADJUSTED_DURATION / raw_duration;
        adjusted_duration = consts::MIN_ADJUSTED_DURATION;
        clamped = true;
    }

    FitOutcome::Fitted(SpeedFit {
        speed_factor,
        adjusted_duration,
        clamped,
    })
}

/// Цепочка atempo: один фильтр принимает только [0.5, 2.0]
pub fn atempo_chain(tempo: f64) -> String {
    let mut filters = Vec::new();
    let mut remaining = tempo;

    while remaining > ATEMPO_MAX {
        filters.push(format!("atempo={:.6}", ATEMPO_MAX));
        remaining /= ATEMPO_MAX;
    }
    while remaining < ATEMPO_MIN {
        filters.push(format!("atempo={:.6}", ATEMPO_MIN));
        remaining /= ATEMPO_MIN;
    }
    filters.push(format!("atempo={:.6}", remaining));

    filters.join(",")
}

/// Задание на изменение темпа без изменения высоты тона
pub fn stretch_job(input: &Path, output: &Path, fit: &SpeedFit, use_rubberband: bool) -> FilterJob {
    let mut chain = atempo_chain(fit.tempo());
    if use_rubberband {
        chain.push_str(",rubberband=pitch=1.0");
    }
    FilterJob::to_file(output)
        .input(input)
        .simple_filter(chain)
        .pipeline_format()
}
