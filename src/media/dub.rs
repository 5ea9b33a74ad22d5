//! Сведение озвучки с оригинальной дорожкой
//!
//! Обе дорожки приводятся к стерео 48 кГц, после чего сводятся потоково:
//! файл целиком в память не загружается.

use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::{debug, info};

use crate::config::{consts, DubConfig};
use crate::error::{Result, SubTtsError};
use crate::media::loudness::{LoudnessNormalizer, NormalizeOutcome};
use crate::media::remux;
use crate::media::runner::{FilterGraphRunner, FilterJob};
use crate::media::wav::{db_to_gain, gain_to_db, to_i16};

const DUB_CHANNELS: u16 = 2;
const I16_SCALE: f64 = 32768.0;

/// Итоги сведения
#[derive(Debug, Clone, PartialEq)]
pub struct DubReport {
    /// Уровень оригинала до обработки
    pub original_dbfs: f64,
    /// Усиление нормализации оригинала, если она понадобилась
    pub original_normalize_db: Option<f64>,
    /// Длина результата в кадрах
    pub frames: u64,
}

/// Линейные усиления левого и правого канала для панорамы `pan` (-1.0 - 1.0).
///
/// Один канал усиливается, другой ослабляется так, чтобы при крайнем
/// положении противоположный канал замолкал.
pub fn pan_gains(pan: f64) -> (f64, f64) {
    let pan = pan.clamp(-1.0, 1.0);
    let max_boost_db = gain_to_db(2.0);
    let boost_db = pan.abs() * max_boost_db;
    let reduce_factor = 2.0 - db_to_gain(boost_db);
    let reduce_gain = reduce_factor.max(0.0);
    let boost_gain = db_to_gain(boost_db / 2.0);

    if pan < 0.0 {
        (boost_gain, reduce_gain)
    } else {
        (reduce_gain, boost_gain)
    }
}

/// Усиление нормализации оригинала или `None`, если уровень в допуске
pub fn original_correction_db(original_dbfs: f64) -> Option<f64> {
    if !original_dbfs.is_finite() {
        return None;
    }
    let deviation = consts::SEGMENT_TARGET_DBFS - original_dbfs;
    if deviation.abs() > consts::DUB_LOUDNESS_TOLERANCE_DB {
        Some(deviation)
    } else {
        None
    }
}

/// Коэффициенты по каналам: громкость и панорама
fn channel_gains(volume_db: f64, pan: f64, channels: u16) -> Vec<f64> {
    let gain = db_to_gain(volume_db);
    let (left, right) = pan_gains(pan);
    (0..channels as usize)
        .map(|ch| match (channels, ch) {
            (1, _) => gain,
            (_, 0) => gain * left,
            (_, 1) => gain * right,
            _ => gain,
        })
        .collect()
}

fn open_pcm16(path: &Path) -> Result<WavReader<std::io::BufReader<std::fs::File>>> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(SubTtsError::AudioProcessing(format!(
            "{} is not 16-bit PCM",
            path.display()
        )));
    }
    Ok(reader)
}

/// RMS-уровень файла за один проход
fn measure_dbfs(path: &Path) -> Result<f64> {
    let mut reader = open_pcm16(path)?;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;
    for sample in reader.samples::<i16>() {
        let value = sample? as f64 / I16_SCALE;
        sum_sq += value * value;
        count += 1;
    }
    if count == 0 || sum_sq == 0.0 {
        return Ok(f64::NEG_INFINITY);
    }
    Ok(gain_to_db((sum_sq / count as f64).sqrt()))
}

/// Свести два WAV одинакового формата. Длина результата равна длине оригинала.
pub fn mix_wav_files(original: &Path, dubbed: &Path, output: &Path, config: &DubConfig) -> Result<DubReport> {
    let original_dbfs = measure_dbfs(original)?;
    let original_normalize_db = original_correction_db(original_dbfs);
    if let Some(db) = original_normalize_db {
        info!("Original track is at {:.1} dBFS, applying {:+.1} dB", original_dbfs, db);
    }

    let mut original_reader = open_pcm16(original)?;
    let mut dubbed_reader = open_pcm16(dubbed)?;
    let spec = original_reader.spec();
    let dubbed_spec = dubbed_reader.spec();
    if spec.sample_rate != dubbed_spec.sample_rate || spec.channels != dubbed_spec.channels {
        return Err(SubTtsError::AudioProcessing(format!(
            "dub tracks differ in format: {} Hz/{} ch vs {} Hz/{} ch",
            spec.sample_rate, spec.channels, dubbed_spec.sample_rate, dubbed_spec.channels
        )));
    }

    let channels = spec.channels.max(1);
    let original_gains = channel_gains(
        config.original_volume_db + original_normalize_db.unwrap_or(0.0),
        -config.balance,
        channels,
    );
    let dubbed_gains = channel_gains(config.dubbed_volume_db, config.balance, channels);
    debug!("Dub gains: original {:?}, dubbed {:?}", original_gains, dubbed_gains);

    let mut writer = WavWriter::create(
        output,
        WavSpec {
            channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        },
    )?;

    let mut dubbed_samples = dubbed_reader.samples::<i16>();
    let mut written = 0u64;
    for (i, sample) in original_reader.samples::<i16>().enumerate() {
        let ch = i % channels as usize;
        let original_value = sample? as f64 / I16_SCALE;
        let dubbed_value = match dubbed_samples.next() {
            Some(sample) => sample? as f64 / I16_SCALE,
            None => 0.0,
        };
        let mixed = original_value * original_gains[ch] + dubbed_value * dubbed_gains[ch];
        writer.write_sample(to_i16(mixed as f32))?;
        written += 1;
    }
    writer.finalize()?;

    Ok(DubReport {
        original_dbfs,
        original_normalize_db,
        frames: written / channels as u64,
    })
}

/// Перекодировать любую дорожку в стерео 48 кГц PCM
pub fn dub_format_job(input: &Path, output: &Path) -> FilterJob {
    FilterJob::to_file(output).input(input).args([
        "-vn".to_string(),
        "-ac".to_string(),
        DUB_CHANNELS.to_string(),
        "-ar".to_string(),
        consts::DUB_SAMPLE_RATE.to_string(),
        "-c:a".to_string(),
        "pcm_s16le".to_string(),
    ])
}

/// Файлы, созданные при сведении
#[derive(Debug, Clone)]
pub struct DubArtifacts {
    pub report: DubReport,
    pub normalization: NormalizeOutcome,
    pub mp3: PathBuf,
}

/// Полное сведение: формат, смешивание, нормализация, MP3
pub async fn dub(
    runner: &dyn FilterGraphRunner,
    original: &Path,
    dubbed: &Path,
    config: &DubConfig,
    two_pass_loudnorm: bool,
    work_dir: &Path,
    output_mp3: &Path,
) -> Result<DubArtifacts> {
    let original_wav = work_dir.join("dub_original.wav");
    let dubbed_wav = work_dir.join("dub_speech.wav");
    let mixed_wav = work_dir.join("dub_mixed.wav");
    let normalized_wav = work_dir.join("dub_normalized.wav");

    runner.run(&dub_format_job(original, &original_wav)).await?;
    runner.run(&dub_format_job(dubbed, &dubbed_wav)).await?;

    let report = mix_wav_files(&original_wav, &dubbed_wav, &mixed_wav, config)?;
    info!("Dub mix rendered: {} frames", report.frames);

    let normalization = LoudnessNormalizer::new(runner, two_pass_loudnorm)
        .with_format(consts::DUB_SAMPLE_RATE, DUB_CHANNELS)
        .normalize(&mixed_wav, &normalized_wav)
        .await?;

    runner.run(&remux::encode_mp3_job(&normalized_wav, output_mp3)).await?;

    Ok(DubArtifacts {
        report,
        normalization,
        mp3: output_mp3.to_path_buf(),
    })
}
