//! Размещение сегментов на временной шкале
//!
//! Чистая функция над субтитрами и результатами их подготовки: возвращает
//! полный список сегментов речи и тишины, ничего не читая и не записывая.

use std::path::PathBuf;

use log::{debug, warn};

use crate::config::consts;
use crate::subtitle::Cue;

/// Подготовленная речь для одного субтитра
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechClip {
    /// WAV в формате конвейера
    pub path: PathBuf,
    /// Фактическая длительность (секунды)
    pub duration: f64,
}

/// Почему у субтитра нет речи
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Текст пустой
    BlankText,
    /// Окончание субтитра не позже начала
    InvalidWindow,
    /// Движок синтеза вернул ошибку
    Synthesis(String),
    /// Синтезированное аудио не удалось обработать
    Audio(String),
}

/// Результат подготовки речи для одного субтитра
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentOutcome {
    Ready(SpeechClip),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Speech,
    Silence,
}

/// Источник звука сегмента
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentAudio {
    Speech(SpeechClip),
    Silence,
}

/// Сегмент на временной шкале (секунды от начала)
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Момент, с которого звучит сегмент
    pub start: f64,
    /// Номинальное окончание
    pub end: f64,
    /// Начало отрезка шкалы, за который отвечает сегмент.
    /// Отличается от `start` только у сдвинутой речи.
    pub slot_start: f64,
    pub audio: SegmentAudio,
    /// Номер субтитра; `None` для тишины между субтитрами
    pub cue_index: Option<usize>,
}

impl Segment {
    pub fn silence(start: f64, end: f64, cue_index: Option<usize>) -> Self {
        Self {
            start,
            end,
            slot_start: start,
            audio: SegmentAudio::Silence,
            cue_index,
        }
    }

    pub fn kind(&self) -> SegmentKind {
        match self.audio {
            SegmentAudio::Speech(_) => SegmentKind::Speech,
            SegmentAudio::Silence => SegmentKind::Silence,
        }
    }

    /// Длительность звука: у речи фактическая, у тишины по окну
    pub fn audio_duration(&self) -> f64 {
        match &self.audio {
            SegmentAudio::Speech(clip) => clip.duration,
            SegmentAudio::Silence => (self.end - self.start).max(0.0),
        }
    }
}

/// Разместить сегменты.
///
/// `outcomes[i]` относится к `cues[i]`; отсутствующий результат считается
/// пропуском. Результат упорядочен по `start`.
///
/// Субтитры с `end <= start` не дают сегментов и, в отличие от простого
/// правила "окончание предыдущего = его `end`", не сдвигают окончание
/// предыдущего: зазор следующего субтитра считается от последнего
/// корректного окна. Тишина перед первым корректным субтитром строится
/// тем же правилом зазора, поэтому некорректный первый субтитр её не ломает.
///
/// Субтитр без речи (пустой текст, ошибка синтеза или обработки) получает
/// тишину на всё своё окно, а не пропускается. На слух это то же самое,
/// но входов сведения становится на один больше, и шкала остаётся
/// покрытой без пропусков.
pub fn place(cues: &[Cue], outcomes: &[SegmentOutcome]) -> Vec<Segment> {
    let mut segments = Vec::with_capacity(cues.len() * 2 + 1);
    let mut last_end = 0.0f64;
    // Уже размещён хотя бы один корректный субтитр
    let mut has_previous = false;

    for (i, cue) in cues.iter().enumerate() {
        let start = cue.start_secs();
        let end = cue.end_secs();

        if end <= start {
            debug!("Subtitle {} has an empty window, skipping", cue.index);
            continue;
        }

        if start > last_end {
            segments.push(Segment::silence(last_end, start, None));
        }

        let clip = match outcomes.get(i) {
            _ if cue.is_blank() => None,
            Some(SegmentOutcome::Ready(clip)) => Some(clip),
            Some(SegmentOutcome::Skipped(reason)) => {
                debug!("Subtitle {} has no speech ({:?}), placing silence", cue.index, reason);
                None
            }
            None => None,
        };

        match clip {
            None => segments.push(Segment::silence(start, end, Some(cue.index))),
            Some(clip) => {
                let mut placed_start = start;
                if has_previous && start - last_end < consts::MIN_GAP {
                    placed_start += consts::SHIFT_DELAY;
                    warn_on_collision(cue, placed_start, clip.duration, next_valid_start(&cues[i + 1..]));
                }
                segments.push(Segment {
                    start: placed_start,
                    end,
                    slot_start: start,
                    audio: SegmentAudio::Speech(clip.clone()),
                    cue_index: Some(cue.index),
                });
            }
        }

        last_end = end;
        has_previous = true;
    }

    // Сдвиг в коротком окне может обогнать следующий сегмент
    segments.sort_by(|a, b| a.start.total_cmp(&b.start));
    segments
}

fn next_valid_start(rest: &[Cue]) -> Option<f64> {
    rest.iter()
        .find(|cue| cue.has_valid_window())
        .map(|cue| cue.start_secs())
}

fn warn_on_collision(cue: &Cue, placed_start: f64, duration: f64, next_start: Option<f64>) {
    if placed_start >= cue.end_secs() {
        warn!(
            "Subtitle {}: shifted start {:.3}s is past its end {:.3}s",
            cue.index,
            placed_start,
            cue.end_secs()
        );
    }
    if let Some(next_start) = next_start {
        if placed_start + duration > next_start {
            warn!(
                "Subtitle {}: shifted speech runs until {:.3}s, past the next subtitle at {:.3}s",
                cue.index,
                placed_start + duration,
                next_start
            );
        }
    }
}
