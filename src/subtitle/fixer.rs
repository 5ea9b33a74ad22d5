//! Предварительная правка временных меток: сортировка по началу,
//! устранение наложений, перенумерация.

use std::path::Path;
use std::time::Duration;

use log::info;

use crate::error::{Result, SubTtsError};
use crate::subtitle::cue::Cue;
use crate::subtitle::parser;

/// Минимальная длительность субтитра после правки
pub const MIN_FIXED_DURATION: Duration = Duration::from_millis(500);

/// Отсортировать субтитры и убрать наложения
pub fn fix_timestamps(mut cues: Vec<Cue>) -> Vec<Cue> {
    cues.sort_by_key(|cue| cue.start);

    for i in 0..cues.len() {
        if let Some(next_start) = cues.get(i + 1).map(|next| next.start) {
            if cues[i].end > next_start {
                cues[i].end = next_start;
            }
            if cues[i].end <= cues[i].start {
                cues[i].end = cues[i].start + MIN_FIXED_DURATION;
            }
        }
    }

    for (i, cue) in cues.iter_mut().enumerate() {
        cue.index = i + 1;
    }

    cues
}

/// Исправить файл и записать результат
pub fn fix_srt_file<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output: Q) -> Result<usize> {
    let cues = parser::parse_srt_file(&input)?;
    if cues.is_empty() {
        return Err(SubTtsError::SubtitleParsing(format!(
            "No valid subtitle entries found in {}",
            input.as_ref().display()
        )));
    }

    let fixed = fix_timestamps(cues);
    std::fs::write(&output, parser::format_srt(&fixed))?;
    info!(
        "Corrected subtitle file written to {} ({} entries)",
        output.as_ref().display(),
        fixed.len()
    );

    Ok(fixed.len())
}
