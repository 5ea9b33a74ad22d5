//! Итоговое кодирование: MP3 и замена аудиодорожки в видео

use std::path::Path;

use log::{error, info};

use crate::config::consts;
use crate::error::{Result, SubTtsError};
use crate::media::runner::{FilterGraphRunner, FilterJob};

/// Кодирование в MP3
pub fn encode_mp3_job(input: &Path, output: &Path) -> FilterJob {
    FilterJob::to_file(output).input(input).args([
        "-c:a".to_string(),
        "mp3".to_string(),
        "-b:a".to_string(),
        consts::OUTPUT_BITRATE.to_string(),
    ])
}

/// Видео копируется без перекодирования, звук заменяется на AAC
pub fn remux_job(video: &Path, audio: &Path, output: &Path) -> FilterJob {
    FilterJob::to_file(output)
        .input(video)
        .input(audio)
        .args([
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            consts::OUTPUT_BITRATE.to_string(),
        ])
        .map("0:v:0")
        .map("1:a:0")
}

/// Заменить звук в видео. Ошибка фатальна для запуска.
pub async fn remux(runner: &dyn FilterGraphRunner, video: &Path, audio: &Path, output: &Path) -> Result<()> {
    if !video.is_file() {
        return Err(SubTtsError::FileNotFound(video.display().to_string()));
    }
    if !audio.is_file() {
        return Err(SubTtsError::FileNotFound(audio.display().to_string()));
    }

    runner
        .run(&remux_job(video, audio, output))
        .await
        .map_err(|e| {
            error!("Remux of {} failed: {}", video.display(), e);
            SubTtsError::Remux(e)
        })?;

    info!("Video written to {}", output.display());
    Ok(())
}
