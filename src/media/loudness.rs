//! Нормализация громкости
//!
//! Два места применения: каждый сегмент речи приводится к -20 dBFS простым
//! усилением, итоговый файл проходит двухпроходный loudnorm. Если измерение
//! или применение loudnorm не удалось, файл обрабатывается компрессором и
//! приводится к -20 dBFS без внешнего инструмента.

use std::path::Path;

use log::{debug, info, warn};
use hound::{WavReader, WavWriter};
use serde::Deserialize;

use crate::config::consts;
use crate::error::{Result, SubTtsError};
use crate::media::runner::{FilterGraphRunner, FilterJob, OutputTarget};
use crate::media::wav::{self, Compressor, CompressorParams};

/// Результаты первого прохода loudnorm
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessStats {
    pub input_i: f64,
    pub input_tp: f64,
    pub input_lra: f64,
    pub input_thresh: f64,
}

/// ffmpeg печатает значения строками
#[derive(Debug, Deserialize)]
struct RawLoudnessStats {
    input_i: String,
    input_tp: String,
    input_lra: String,
    input_thresh: String,
}

impl LoudnessStats {
    /// Извлечь JSON-блок измерений из диагностики ffmpeg
    pub fn parse(diagnostics: &str) -> Result<Self> {
        let start = diagnostics.find('{');
        let end = diagnostics.rfind('}');
        let json = match (start, end) {
            (Some(start), Some(end)) if start < end => &diagnostics[start..=end],
            _ => {
                return Err(SubTtsError::AudioProcessing(
                    "loudness measurement output has no JSON block".to_string(),
                ))
            }
        };

        let raw: RawLoudnessStats = serde_json::from_str(json)?;
        Ok(Self {
            input_i: parse_measurement("input_i", &raw.input_i)?,
            input_tp: parse_measurement("input_tp", &raw.input_tp)?,
            input_lra: parse_measurement("input_lra", &raw.input_lra)?,
            input_thresh: parse_measurement("input_thresh", &raw.input_thresh)?,
        })
    }
}

fn parse_measurement(name: &str, value: &str) -> Result<f64> {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(SubTtsError::AudioProcessing(format!(
            "loudness measurement {} is not a finite number: '{}'",
            name, value
        ))),
    }
}

fn loudnorm_target() -> String {
    format!(
        "loudnorm=I={}:TP={}:LRA={}",
        consts::LOUDNORM_I,
        consts::LOUDNORM_TP,
        consts::LOUDNORM_LRA
    )
}

/// Первый проход: только измерение
pub fn measure_job(input: &Path) -> FilterJob {
    FilterJob::new(OutputTarget::Null)
        .input(input)
        .simple_filter(format!("{}:print_format=json", loudnorm_target()))
}

/// Второй проход: линейная коррекция по измерениям
pub fn apply_job(input: &Path, output: &Path, stats: &LoudnessStats, sample_rate: u32, channels: u16) -> FilterJob {
    FilterJob::to_file(output)
        .input(input)
        .simple_filter(format!(
            "{}:measured_I={}:measured_TP={}:measured_LRA={}:measured_thresh={}:linear=true",
            loudnorm_target(),
            stats.input_i,
            stats.input_tp,
            stats.input_lra,
            stats.input_thresh
        ))
        .args([
            "-ar".to_string(),
            sample_rate.to_string(),
            "-ac".to_string(),
            channels.to_string(),
        ])
}

/// Чем закончилась нормализация итогового файла
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeOutcome {
    TwoPass(LoudnessStats),
    Fallback { reason: String },
}

impl NormalizeOutcome {
    pub fn is_two_pass(&self) -> bool {
        matches!(self, Self::TwoPass(_))
    }
}

/// Нормализатор итогового файла
pub struct LoudnessNormalizer<'a> {
    runner: &'a dyn FilterGraphRunner,
    two_pass: bool,
    sample_rate: u32,
    channels: u16,
}

impl<'a> LoudnessNormalizer<'a> {
    pub fn new(runner: &'a dyn FilterGraphRunner, two_pass: bool) -> Self {
        Self {
            runner,
            two_pass,
            sample_rate: consts::SAMPLE_RATE,
            channels: consts::CHANNELS,
        }
    }

    /// Формат выхода второго прохода
    pub fn with_format(mut self, sample_rate: u32, channels: u16) -> Self {
        self.sample_rate = sample_rate;
        self.channels = channels;
        self
    }

    /// Нормализовать `input` в `output`.
    ///
    /// Ошибка возвращается только если `input` не читается как WAV.
    pub async fn normalize(&self, input: &Path, output: &Path) -> Result<NormalizeOutcome> {
        if self.two_pass {
            match self.two_pass_normalize(input, output).await {
                Ok(stats) => {
                    info!(
                        "Loudness normalized: I={} LUFS, TP={} dB, LRA={} LU",
                        stats.input_i, stats.input_tp, stats.input_lra
                    );
                    return Ok(NormalizeOutcome::TwoPass(stats));
                }
                Err(e) => {
                    warn!("Two-pass loudness normalization failed, using compression fallback: {}", e);
                    compress_and_normalize(input, output)?;
                    return Ok(NormalizeOutcome::Fallback { reason: e.to_string() });
                }
            }
        }

        compress_and_normalize(input, output)?;
        Ok(NormalizeOutcome::Fallback {
            reason: "two-pass normalization disabled".to_string(),
        })
    }

    async fn two_pass_normalize(&self, input: &Path, output: &Path) -> Result<LoudnessStats> {
        let measured = self.runner.run(&measure_job(input)).await?;
        let stats = LoudnessStats::parse(&measured.stderr)?;
        debug!("Loudness measurement: {:?}", stats);

        self.runner
            .run(&apply_job(input, output, &stats, self.sample_rate, self.channels))
            .await?;
        Ok(stats)
    }
}

/// Компрессия и усиление до -20 dBFS.
///
/// Работает потоково в два прохода: сжатый сигнал пишется во временный файл
/// рядом с `output` с подсчётом уровня, затем к нему применяется усиление.
pub fn compress_and_normalize(input: &Path, output: &Path) -> Result<()> {
    let reader = WavReader::open(input)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;
    let pcm = wav::pcm16_spec(spec.sample_rate, channels as u16);

    let scratch_dir = match output.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let compressed = tempfile::Builder::new()
        .prefix("subtts_compressed_")
        .suffix(".wav")
        .tempfile_in(scratch_dir)?;

    let mut compressor = Compressor::new(&CompressorParams::default(), spec.sample_rate);
    let mut writer = WavWriter::create(compressed.path(), pcm)?;
    let mut frame = Vec::with_capacity(channels);
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;

    wav::for_each_sample(reader, |sample| {
        frame.push(sample);
        if frame.len() == channels {
            compressor.process_frame(&mut frame);
            for sample in frame.drain(..) {
                let value = wav::to_i16(sample);
                let level = value as f64 / i16::MAX as f64;
                sum_sq += level * level;
                count += 1;
                writer.write_sample(value)?;
            }
        }
        Ok(())
    })?;
    writer.finalize()?;

    let gain_db = if count > 0 && sum_sq > 0.0 {
        consts::SEGMENT_TARGET_DBFS - wav::gain_to_db((sum_sq / count as f64).sqrt())
    } else {
        0.0
    };
    debug!("Fallback gain after compression: {:+.2} dB", gain_db);

    let gain = wav::db_to_gain(gain_db) as f32;
    let mut writer = WavWriter::create(output, pcm)?;
    wav::for_each_sample(WavReader::open(compressed.path())?, |sample| {
        writer.write_sample(wav::to_i16(sample * gain))?;
        Ok(())
    })?;
    writer.finalize()?;
    Ok(())
}

/// Привести сегмент речи к -20 dBFS.
/// Возвращает применённое усиление; тишина записывается без изменений.
pub fn normalize_segment(input: &Path, output: &Path) -> Result<Option<f64>> {
    let mut audio = wav::read_wav(input)?;
    let gain = wav::normalize_to_dbfs(&mut audio, consts::SEGMENT_TARGET_DBFS);
    wav::write_wav(output, &audio)?;
    Ok(gain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::runner::{ProcessError, ProcessOutput};
    use crate::media::wav::AudioBuffer;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const MEASUREMENT: &str = r#"[Parsed_loudnorm_0 @ 0x55d]
{
	"input_i" : "-27.61",
	"input_tp" : "-4.47",
	"input_lra" : "18.06",
	"input_thresh" : "-39.20",
	"output_i" : "-22.96",
	"normalization_type" : "dynamic",
	"target_offset" : "0.96"
}
"#;

    /// Возвращает заданную диагностику первого прохода, второй проход копирует вход
    struct ScriptedRunner {
        measurement: String,
        fail_apply: bool,
        jobs: Mutex<Vec<FilterJob>>,
    }

    impl ScriptedRunner {
        fn new(measurement: &str, fail_apply: bool) -> Self {
            Self {
                measurement: measurement.to_string(),
                fail_apply,
                jobs: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl FilterGraphRunner for ScriptedRunner {
        async fn run(&self, job: &FilterJob) -> std::result::Result<ProcessOutput, ProcessError> {
            self.jobs.lock().unwrap().push(job.clone());
            match job.output_path() {
                None => Ok(ProcessOutput {
                    stdout: String::new(),
                    stderr: self.measurement.clone(),
                }),
                Some(_) if self.fail_apply => Err(ProcessError {
                    program: "ffmpeg".to_string(),
                    status: Some(1),
                    diagnostics: "Error applying loudnorm".to_string(),
                }),
                Some(output) => {
                    std::fs::copy(&job.inputs[0], output).unwrap();
                    Ok(ProcessOutput::default())
                }
            }
        }
    }

    fn write_tone(path: &Path) {
        let samples = (0..48_000).map(|i| 0.3 * ((i as f32) * 0.03).sin()).collect();
        wav::write_wav(path, &AudioBuffer::new(samples, consts::SAMPLE_RATE, 1)).unwrap();
    }

    #[test]
    fn test_parse_measurement_block() {
        let stats = LoudnessStats::parse(MEASUREMENT).unwrap();
        assert_eq!(stats.input_i, -27.61);
        assert_eq!(stats.input_tp, -4.47);
        assert_eq!(stats.input_lra, 18.06);
        assert_eq!(stats.input_thresh, -39.2);
    }

    #[test]
    fn test_parse_rejects_malformed_output() {
        assert!(LoudnessStats::parse("no json here").is_err());
        assert!(LoudnessStats::parse("{ \"input_i\": \"-20\" }").is_err());
        let silent = MEASUREMENT.replace("-27.61", "-inf");
        assert!(LoudnessStats::parse(&silent).is_err());
    }

    #[test]
    fn test_apply_job_passes_measurements() {
        let stats = LoudnessStats::parse(MEASUREMENT).unwrap();
        let job = apply_job(Path::new("in.wav"), Path::new("out.wav"), &stats, 24_000, 1);
        let args = crate::media::runner::FfmpegRunner::build_args(&job);
        assert!(args.contains(
            &"loudnorm=I=-23:TP=-1.5:LRA=11:measured_I=-27.61:measured_TP=-4.47:measured_LRA=18.06:measured_thresh=-39.2:linear=true"
                .to_string()
        ));
    }

    #[tokio::test]
    async fn test_two_pass_success() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_tone(&input);

        let runner = ScriptedRunner::new(MEASUREMENT, false);
        let outcome = LoudnessNormalizer::new(&runner, true)
            .normalize(&input, &output)
            .await
            .unwrap();

        assert!(outcome.is_two_pass());
        assert_eq!(runner.jobs.lock().unwrap().len(), 2);
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_malformed_measurement_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_tone(&input);

        let runner = ScriptedRunner::new("[loudnorm] { broken", false);
        let outcome = LoudnessNormalizer::new(&runner, true)
            .normalize(&input, &output)
            .await
            .unwrap();

        assert!(matches!(outcome, NormalizeOutcome::Fallback { .. }));
        let normalized = wav::read_wav(&output).unwrap();
        assert!((normalized.dbfs() - consts::SEGMENT_TARGET_DBFS).abs() < 0.1);
    }

    #[tokio::test]
    async fn test_failed_second_pass_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_tone(&input);

        let runner = ScriptedRunner::new(MEASUREMENT, true);
        let outcome = LoudnessNormalizer::new(&runner, true)
            .normalize(&input, &output)
            .await
            .unwrap();

        match outcome {
            NormalizeOutcome::Fallback { reason } => assert!(reason.contains("Error applying loudnorm")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(output.exists());
    }

    #[test]
    fn test_fallback_streams_stereo_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("mix.wav");
        let output = dir.path().join("mix_norm.wav");
        let samples = (0..96_000).map(|i| 0.6 * ((i / 2) as f32 * 0.02).sin()).collect();
        wav::write_wav(&input, &AudioBuffer::new(samples, 48_000, 2)).unwrap();

        compress_and_normalize(&input, &output).unwrap();

        let normalized = wav::read_wav(&output).unwrap();
        assert_eq!(normalized.channels, 2);
        assert_eq!(normalized.sample_rate, 48_000);
        assert_eq!(normalized.frame_count(), 48_000);
        assert!((normalized.dbfs() - consts::SEGMENT_TARGET_DBFS).abs() < 0.1);
        // промежуточный файл удалён
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_fallback_keeps_silence_silent() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("silent.wav");
        let output = dir.path().join("silent_norm.wav");
        wav::write_silence(&input, 0.5).unwrap();

        compress_and_normalize(&input, &output).unwrap();
        let normalized = wav::read_wav(&output).unwrap();
        assert_eq!(normalized.frame_count(), 12_000);
        assert!(normalized.samples.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_normalize_segment_reaches_target() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("seg.wav");
        let output = dir.path().join("seg_norm.wav");
        write_tone(&input);

        let gain = normalize_segment(&input, &output).unwrap().unwrap();
        assert!(gain < 0.0);
        assert!((wav::read_wav(&output).unwrap().dbfs() + 20.0).abs() < 0.1);

        let silent = dir.path().join("silent.wav");
        let silent_out = dir.path().join("silent_norm.wav");
        wav::write_silence(&silent, 0.5).unwrap();
        assert_eq!(normalize_segment(&silent, &silent_out).unwrap(), None);
        assert!(silent_out.exists());
    }

    #[test]
    fn test_normalize_segment_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("seg.wav");
        std::fs::write(&input, b"not a wav").unwrap();
        assert!(normalize_segment(&input, &dir.path().join("out.wav")).is_err());
    }
}
