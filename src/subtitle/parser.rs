//! Модуль для парсинга субтитров
//!
//! Разбирает SRT: номер, строка `HH:MM:SS,mmm --> HH:MM:SS,mmm`, текст,
//! пустая строка. Кодировка файла определяется автоматически.
//! Блоки с неразборчивым таймингом или слишком малым числом строк пропускаются.

use std::path::Path;
use std::time::Duration;

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, WINDOWS_1252};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, SubTtsError};
use crate::subtitle::cue::Cue;

static TIMING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(\d+):(\d{1,2}):(\d{1,2})[,.](\d{1,3})\s*-->\s*(\d+):(\d{1,2}):(\d{1,2})[,.](\d{1,3})",
    )
    .expect("timing regex is valid")
});

static BLOCK_SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t]*\n").expect("separator regex is valid"));

/// Парсинг SRT файла
pub fn parse_srt_file<P: AsRef<Path>>(path: P) -> Result<Vec<Cue>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| {
        SubTtsError::FileNotFound(format!("Failed to open subtitle file {}: {}", path.display(), e))
    })?;
    parse_srt_bytes(&bytes)
}

/// Парсинг SRT из байтов с определением кодировки
pub fn parse_srt_bytes(bytes: &[u8]) -> Result<Vec<Cue>> {
    let (text, encoding) = decode_text(bytes);
    debug!("Subtitle encoding detected as {}", encoding.name());
    Ok(parse_srt_str(&text))
}

/// Парсинг SRT из уже декодированного текста
pub fn parse_srt_str(content: &str) -> Vec<Cue> {
    let normalized = content.replace("\r\n", "\n").replace('\r', "\n");
    let mut cues = Vec::new();

    for (position, block) in BLOCK_SEPARATOR_RE
        .split(normalized.trim())
        .enumerate()
    {
        let lines: Vec<&str> = block.lines().collect();
        match parse_block(&lines, position + 1) {
            Some(cue) => cues.push(cue),
            None if block.trim().is_empty() => {}
            None => warn!("Skipping malformed subtitle block {}", position + 1),
        }
    }

    cues
}

/// Декодировать байты файла: BOM, затем строгий UTF-8, затем эвристика UTF-16,
/// иначе Windows-1252
pub fn decode_text(bytes: &[u8]) -> (String, &'static Encoding) {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return (text.into_owned(), encoding);
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return (text.to_string(), encoding_rs::UTF_8);
    }

    if let Some(encoding) = sniff_utf16(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(bytes);
        return (text.into_owned(), encoding);
    }

    let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
    (text.into_owned(), WINDOWS_1252)
}

/// UTF-16 без BOM: ASCII-текст даёт нулевой байт в каждой паре
fn sniff_utf16(bytes: &[u8]) -> Option<&'static Encoding> {
    if bytes.len() < 4 || bytes.len() % 2 != 0 {
        return None;
    }
    let pairs = bytes.len() / 2;
    let even_zeros = bytes.iter().step_by(2).filter(|b| **b == 0).count();
    let odd_zeros = bytes.iter().skip(1).step_by(2).filter(|b| **b == 0).count();

    if odd_zeros * 2 > pairs && even_zeros * 8 < pairs {
        Some(UTF_16LE)
    } else if even_zeros * 2 > pairs && odd_zeros * 8 < pairs {
        Some(UTF_16BE)
    } else {
        None
    }
}

fn parse_block(lines: &[&str], position: usize) -> Option<Cue> {
    if lines.len() < 2 {
        return None;
    }

    // Номер может отсутствовать; тогда блок начинается сразу с тайминга
    let (index, timing_line, text_lines) = match lines[0].trim().parse::<usize>() {
        Ok(index) => (index, lines[1], &lines[2..]),
        Err(_) if lines[0].contains("-->") => (position, lines[0], &lines[1..]),
        Err(_) => return None,
    };

    let (start, end) = parse_timing_line(timing_line)?;
    let text = text_lines
        .iter()
        .map(|line| line.trim_end())
        .collect::<Vec<&str>>()
        .join("\n");

    Some(Cue::new(index, start, end, text))
}

/// Парсинг строки `HH:MM:SS,mmm --> HH:MM:SS,mmm`
pub fn parse_timing_line(line: &str) -> Option<(Duration, Duration)> {
    let caps = TIMING_RE.captures(line)?;
    let field = |i: usize| caps.get(i).map(|m| m.as_str());

    let start = to_duration(field(1)?, field(2)?, field(3)?, field(4)?)?;
    let end = to_duration(field(5)?, field(6)?, field(7)?, field(8)?)?;
    Some((start, end))
}

fn to_duration(hours: &str, minutes: &str, seconds: &str, fraction: &str) -> Option<Duration> {
    let hours = hours.parse::<u64>().ok()?;
    let minutes = minutes.parse::<u64>().ok()?;
    let seconds = seconds.parse::<u64>().ok()?;
    if minutes >= 60 || seconds >= 60 {
        return None;
    }

    let ms = fraction.parse::<u64>().ok()?;
    let millis = match fraction.len() {
        1 => ms * 100,
        2 => ms * 10,
        _ => ms,
    };

    Some(Duration::from_millis(
        hours * 3_600_000 + minutes * 60_000 + seconds * 1000 + millis,
    ))
}

/// Форматировать метку времени как `HH:MM:SS,mmm`
pub fn format_timestamp(time: Duration) -> String {
    let total_ms = time.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

/// Сериализовать субтитры в SRT
pub fn format_srt(cues: &[Cue]) -> String {
    let mut out = String::new();
    for cue in cues {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            cue.index,
            format_timestamp(cue.start),
            format_timestamp(cue.end),
            cue.text
        ));
    }
    out
}
