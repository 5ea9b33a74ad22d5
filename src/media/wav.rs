//! # WAV
//!
//! Чтение и запись WAV, измерение уровня и простая обработка семплов:
//! усиление, компрессия динамического диапазона, генерация тишины.
//! Семплы хранятся как f32 в диапазоне [-1.0, 1.0], каналы чередуются.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::config::consts;
use crate::error::{Result, SubTtsError};

/// Аудио в памяти
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Чередующиеся семплы
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Тишина заданной длительности в формате конвейера
    pub fn silence(duration_secs: f64) -> Self {
        let frames = (duration_secs.max(0.0) * consts::SAMPLE_RATE as f64).round() as usize;
        Self::new(
            vec![0.0; frames * consts::CHANNELS as usize],
            consts::SAMPLE_RATE,
            consts::CHANNELS,
        )
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_secs(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Уровень относительно полной шкалы; `-inf` для тишины
    pub fn dbfs(&self) -> f64 {
        dbfs(&self.samples)
    }
}

/// Прочитать WAV любого PCM или float формата
pub fn read_wav<P: AsRef<Path>>(path: P) -> Result<AudioBuffer> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let mut samples = Vec::with_capacity(reader.len() as usize);
    for_each_sample(reader, |sample| {
        samples.push(sample);
        Ok(())
    })?;

    Ok(AudioBuffer::new(samples, spec.sample_rate, spec.channels))
}

/// Пройти по семплам файла по одному, не загружая его целиком
pub fn for_each_sample<R, F>(mut reader: WavReader<R>, mut visit: F) -> Result<()>
where
    R: std::io::Read,
    F: FnMut(f32) -> Result<()>,
{
    let spec = reader.spec();
    match spec.sample_format {
        SampleFormat::Float => {
            for sample in reader.samples::<f32>() {
                visit(sample?)?;
            }
        }
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            for sample in reader.samples::<i32>() {
                visit(sample? as f32 / scale)?;
            }
        }
    }
    Ok(())
}

/// Формат 16-битного PCM с теми же частотой и каналами
pub fn pcm16_spec(sample_rate: u32, channels: u16) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Записать 16-битный PCM WAV
pub fn write_wav<P: AsRef<Path>>(path: P, audio: &AudioBuffer) -> Result<()> {
    let mut writer = WavWriter::create(path, pcm16_spec(audio.sample_rate, audio.channels))?;
    for sample in &audio.samples {
        writer.write_sample(to_i16(*sample))?;
    }
    writer.finalize()?;
    Ok(())
}

/// Длительность по заголовку, без чтения семплов
pub fn wav_duration_secs<P: AsRef<Path>>(path: P) -> Result<f64> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(SubTtsError::AudioProcessing("WAV header has zero sample rate".to_string()));
    }
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

/// Создать файл тишины заданной длительности
pub fn write_silence<P: AsRef<Path>>(path: P, duration_secs: f64) -> Result<()> {
    write_wav(path, &AudioBuffer::silence(duration_secs))
}

pub fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

pub fn db_to_gain(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

pub fn gain_to_db(gain: f64) -> f64 {
    20.0 * gain.log10()
}

/// RMS-уровень относительно полной шкалы
pub fn dbfs(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return f64::NEG_INFINITY;
    }
    let sum_sq: f64 = samples.iter().map(|s| (*s as f64) * (*s as f64)).sum();
    let rms = (sum_sq / samples.len() as f64).sqrt();
    if rms == 0.0 {
        f64::NEG_INFINITY
    } else {
        gain_to_db(rms)
    }
}

/// Усиление в децибелах с ограничением по полной шкале
pub fn apply_gain_db(samples: &mut [f32], db: f64) {
    let gain = db_to_gain(db) as f32;
    for sample in samples.iter_mut() {
        *sample = (*sample * gain).clamp(-1.0, 1.0);
    }
}

/// Привести уровень к целевому dBFS. Тишина не меняется.
/// Возвращает применённое усиление.
pub fn normalize_to_dbfs(audio: &mut AudioBuffer, target_dbfs: f64) -> Option<f64> {
    let current = audio.dbfs();
    if !current.is_finite() {
        return None;
    }
    let change = target_dbfs - current;
    apply_gain_db(&mut audio.samples, change);
    Some(change)
}

/// Параметры компрессора
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressorParams {
    pub threshold_db: f64,
    pub ratio: f64,
    pub attack_ms: f64,
    pub release_ms: f64,
}

impl Default for CompressorParams {
    fn default() -> Self {
        Self {
            threshold_db: consts::COMPRESSOR_THRESHOLD_DB,
            ratio: consts::COMPRESSOR_RATIO,
            attack_ms: consts::COMPRESSOR_ATTACK_MS,
            release_ms: consts::COMPRESSOR_RELEASE_MS,
        }
    }
}

/// Компрессор динамического диапазона, обрабатывающий поток кадров.
///
/// Уровень измеряется как RMS по окну длиной `attack` перед текущим кадром.
/// Ослабление растёт не быстрее, чем за `attack`, и спадает за `release`.
/// Память ограничена окном измерения, длина потока не важна.
pub struct Compressor {
    threshold: f64,
    ratio: f64,
    attack_frames: f64,
    release_frames: f64,
    /// Энергии последних кадров, кольцевой буфер
    window: Vec<f64>,
    next: usize,
    filled: usize,
    window_sum: f64,
    attenuation: f64,
}

impl Compressor {
    pub fn new(params: &CompressorParams, sample_rate: u32) -> Self {
        let frames_per_ms = sample_rate as f64 / 1000.0;
        let attack_frames = (params.attack_ms * frames_per_ms).max(1.0);
        let release_frames = (params.release_ms * frames_per_ms).max(1.0);

        Self {
            threshold: db_to_gain(params.threshold_db),
            ratio: params.ratio,
            attack_frames,
            release_frames,
            window: vec![0.0; attack_frames as usize],
            next: 0,
            filled: 0,
            window_sum: 0.0,
            attenuation: 0.0,
        }
    }

    /// Обработать один кадр (все каналы) на месте
    pub fn process_frame(&mut self, frame: &mut [f32]) {
        if self.ratio <= 1.0 || frame.is_empty() {
            return;
        }

        let energy = frame.iter().map(|s| (*s as f64) * (*s as f64)).sum::<f64>() / frame.len() as f64;

        let rms = if self.filled == 0 {
            0.0
        } else {
            (self.window_sum.max(0.0) / self.filled as f64).sqrt()
        };
        let over_db = if rms > 0.0 {
            gain_to_db(rms / self.threshold).max(0.0)
        } else {
            0.0
        };
        let max_attenuation = (1.0 - 1.0 / self.ratio) * over_db;

        if rms > self.threshold && self.attenuation <= max_attenuation {
            self.attenuation = (self.attenuation + max_attenuation / self.attack_frames).min(max_attenuation);
        } else {
            let step = self.attenuation.max(max_attenuation) / self.release_frames;
            self.attenuation = (self.attenuation - step).max(0.0);
        }

        if self.attenuation > 0.0 {
            let gain = db_to_gain(-self.attenuation) as f32;
            for sample in frame.iter_mut() {
                *sample *= gain;
            }
        }

        // В окно идёт энергия до ослабления
        if self.filled == self.window.len() {
            self.window_sum -= self.window[self.next];
        } else {
            self.filled += 1;
        }
        self.window[self.next] = energy;
        self.window_sum += energy;
        self.next = (self.next + 1) % self.window.len();
    }
}
