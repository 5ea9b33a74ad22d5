//! Конвейер озвучки субтитров
//!
//! Подготовка речи для каждого субтитра (синтез, подгонка темпа, нормализация)
//! выполняется параллельно и изолированно: ошибка одного субтитра превращается
//! в тишину. Размещение, сведение и итоговая нормализация выполняются
//! последовательно над полным набором результатов.

pub mod mixer;
pub mod placement;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, error, info, warn};
use tokio::sync::mpsc::Sender;
use tokio::sync::Semaphore;

use crate::config::{consts, SpeedPolicy, SubTtsConfig};
use crate::error::{Result, SubTtsError};
use crate::media::dub;
use crate::media::loudness::{self, LoudnessNormalizer, NormalizeOutcome};
use crate::media::remux;
use crate::media::runner::{FfmpegRunner, FilterGraphRunner, FilterJob};
use crate::media::stretch::{self, FitOutcome, FitSkip};
use crate::media::wav;
use crate::progress::{send_progress, ProgressUpdate};
use crate::subtitle::{parser, validate_cues, Cue, Dictionary};
use crate::tts::{self, prepare_text_for_tts, SpeechSynthesizer};
use crate::utils::ScratchDir;

pub use mixer::MixInput;
pub use placement::{place, Segment, SegmentAudio, SegmentKind, SegmentOutcome, SkipReason, SpeechClip};


/// Мастер-дорожка
pub const FINAL_OUTPUT_WAV: &str = "final_output.wav";
/// Мастер-дорожка в MP3
pub const FINAL_OUTPUT_MP3: &str = "final_output.mp3";
/// Сведение с оригиналом
pub const FINAL_MIX_MP3: &str = "final_mix.mp3";
/// Видео с заменённой дорожкой
pub const FINAL_VIDEO_MP4: &str = "final_video.mp4";

/// Итоги запуска
#[derive(Debug, Clone)]
pub struct ConvertReport {
    pub master_wav: PathBuf,
    pub master_mp3: PathBuf,
    /// Всего субтитров
    pub cues: usize,
    /// Субтитров с речью
    pub spoken: usize,
    /// Субтитров, где речь не получилась
    pub failed: usize,
    /// Сегментов на шкале
    pub segments: usize,
    pub normalization: NormalizeOutcome,
}

/// Параметры подготовки одного субтитра, общие для всех задач
struct PrepareContext {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    runner: Arc<dyn FilterGraphRunner>,
    voice: String,
    adjust_timing: bool,
    speed: SpeedPolicy,
    use_rubberband: bool,
    work_dir: PathBuf,
}

/// Основная структура для работы с библиотекой
pub struct SubTts {
    config: SubTtsConfig,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    runner: Arc<dyn FilterGraphRunner>,
    progress: Option<Sender<ProgressUpdate>>,
}

impl SubTts {
    /// Создать новый экземпляр SubTts: движок по конфигурации, ffmpeg из PATH
    pub fn new(config: SubTtsConfig) -> Result<Self> {
        config.validate()?;
        let synthesizer: Arc<dyn SpeechSynthesizer> = Arc::from(tts::build_synthesizer(&config)?);
        let runner = Arc::new(FfmpegRunner::locate(config.ffmpeg_path.as_deref())?);
        Ok(Self::with_components(config, synthesizer, runner))
    }

    /// Создать экземпляр с заданными движком и инструментом
    pub fn with_components(
        config: SubTtsConfig,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        runner: Arc<dyn FilterGraphRunner>,
    ) -> Self {
        Self {
            config,
            synthesizer,
            runner,
            progress: None,
        }
    }

    /// Установить канал прогресса
    pub fn with_progress(mut self, sender: Sender<ProgressUpdate>) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn config(&self) -> &SubTtsConfig {
        &self.config
    }

    /// Озвучить SRT и записать мастер-дорожку в `output_dir`
    pub async fn convert(&self, srt_path: &Path, output_dir: &Path) -> Result<ConvertReport> {
        info!("Starting conversion of {}", srt_path.display());
        send_progress(&self.progress, ProgressUpdate::Started).await;

        send_progress(&self.progress, ProgressUpdate::ParsingSubtitles).await;
        let cues = self.load_cues(srt_path)?;
        let texts = self.load_texts(&cues)?;

        let scratch = ScratchDir::new(self.config.temp_dir.as_deref(), self.config.keep_temp_files)?;
        let outcomes = self.prepare_all(&cues, texts, scratch.subdir("segments")?).await;

        send_progress(&self.progress, ProgressUpdate::Placing).await;
        let segments = place(&cues, &outcomes);
        let spoken = segments
            .iter()
            .filter(|s| s.kind() == SegmentKind::Speech)
            .count();
        let failed = outcomes
            .iter()
            .filter(|o| {
                matches!(
                    o,
                    SegmentOutcome::Skipped(SkipReason::Synthesis(_)) | SegmentOutcome::Skipped(SkipReason::Audio(_))
                )
            })
            .count();
        info!(
            "Placed {} segments: {} spoken, {} failed of {} subtitles",
            segments.len(),
            spoken,
            failed,
            cues.len()
        );

        let inputs = materialize(&segments, &scratch.subdir("silence")?)?;
        let raw_master = scratch.path().join("master_raw.wav");
        mixer::mix(
            self.runner.as_ref(),
            &inputs,
            scratch.path(),
            &raw_master,
            &self.progress,
        )
        .await?;

        tokio::fs::create_dir_all(output_dir).await?;
        let master_wav = output_dir.join(FINAL_OUTPUT_WAV);
        let normalization = LoudnessNormalizer::new(self.runner.as_ref(), self.config.final_loudnorm)
            .normalize(&raw_master, &master_wav)
            .await?;
        send_progress(
            &self.progress,
            ProgressUpdate::Normalizing {
                two_pass: normalization.is_two_pass(),
            },
        )
        .await;

        send_progress(&self.progress, ProgressUpdate::Encoding).await;
        let master_mp3 = output_dir.join(FINAL_OUTPUT_MP3);
        self.runner
            .run(&remux::encode_mp3_job(&master_wav, &master_mp3))
            .await?;

        send_progress(&self.progress, ProgressUpdate::Finished).await;
        info!("Master track written to {}", master_wav.display());

        Ok(ConvertReport {
            master_wav,
            master_mp3,
            cues: cues.len(),
            spoken,
            failed,
            segments: segments.len(),
            normalization,
        })
    }

    /// Свести озвучку с оригиналом. По умолчанию берётся мастер-дорожка из `output_dir`.
    pub async fn dub(&self, original: &Path, dubbed: Option<&Path>, output_dir: &Path) -> Result<PathBuf> {
        let dubbed = dubbed
            .map(Path::to_path_buf)
            .unwrap_or_else(|| output_dir.join(FINAL_OUTPUT_WAV));
        for path in [original, dubbed.as_path()] {
            if !path.is_file() {
                return Err(SubTtsError::FileNotFound(path.display().to_string()));
            }
        }

        tokio::fs::create_dir_all(output_dir).await?;
        let scratch = ScratchDir::new(self.config.temp_dir.as_deref(), self.config.keep_temp_files)?;
        let output = output_dir.join(FINAL_MIX_MP3);

        let artifacts = dub::dub(
            self.runner.as_ref(),
            original,
            &dubbed,
            &self.config.dub,
            self.config.final_loudnorm,
            scratch.path(),
            &output,
        )
        .await?;

        info!("Dub mix written to {}", artifacts.mp3.display());
        Ok(artifacts.mp3)
    }

    /// Заменить звук в видео. По умолчанию берётся сведение из `output_dir`.
    pub async fn remux(&self, video: &Path, audio: Option<&Path>, output_dir: &Path) -> Result<PathBuf> {
        let audio = audio
            .map(Path::to_path_buf)
            .unwrap_or_else(|| output_dir.join(FINAL_MIX_MP3));
        tokio::fs::create_dir_all(output_dir).await?;

        let output = output_dir.join(FINAL_VIDEO_MP4);
        remux::remux(self.runner.as_ref(), video, &audio, &output).await?;
        Ok(output)
    }

    /// Прочитать и проверить субтитры
    fn load_cues(&self, srt_path: &Path) -> Result<Vec<Cue>> {
        let mut cues = parser::parse_srt_file(srt_path)?;
        if cues.is_empty() {
            return Err(SubTtsError::SubtitleParsing(format!(
                "no subtitles found in {}",
                srt_path.display()
            )));
        }
        info!("Loaded {} subtitles", cues.len());

        let issues = validate_cues(&cues);
        if !issues.is_empty() {
            if self.config.strict_timing {
                let report: Vec<String> = issues.iter().map(|i| i.to_string()).collect();
                error!("Subtitle timing check failed: {}", report.join("; "));
                return Err(SubTtsError::InvalidTiming(report.join("; ")));
            }
            for issue in &issues {
                warn!("{}", issue);
            }
            cues.sort_by_key(|cue| cue.start);
        }

        Ok(cues)
    }

    /// Текст для синтеза: без разметки, с заменами из словаря
    fn load_texts(&self, cues: &[Cue]) -> Result<Vec<String>> {
        let dictionary = match &self.config.dictionary_path {
            Some(path) => {
                let dictionary = Dictionary::load(path)?;
                info!("Loaded {} dictionary entries", dictionary.len());
                dictionary
            }
            None => Dictionary::default(),
        };

        Ok(cues
            .iter()
            .map(|cue| dictionary.apply(&prepare_text_for_tts(&cue.text)))
            .collect())
    }

    /// Параллельная подготовка речи; результат `i` относится к `cues[i]`
    async fn prepare_all(&self, cues: &[Cue], texts: Vec<String>, work_dir: PathBuf) -> Vec<SegmentOutcome> {
        let total = cues.len();
        let context = Arc::new(PrepareContext {
            synthesizer: self.synthesizer.clone(),
            runner: self.runner.clone(),
            voice: self.config.voice.clone(),
            adjust_timing: self.config.adjust_timing,
            speed: self.config.speed,
            use_rubberband: self.config.use_rubberband,
            work_dir,
        });

        info!(
            "Preparing speech for {} subtitles with {} ({} at a time)",
            total,
            self.synthesizer.name(),
            self.config.max_concurrent_synthesis
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_synthesis.max(1)));
        let completed = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::with_capacity(total);

        for (i, (cue, text)) in cues.iter().zip(texts).enumerate() {
            let context = context.clone();
            let semaphore = semaphore.clone();
            let completed = completed.clone();
            let progress = self.progress.clone();
            let window = cue.window_secs();
            let cue_index = cue.index;
            let valid_window = cue.has_valid_window();

            tasks.push(tokio::spawn(async move {
                let outcome = match semaphore.acquire().await {
                    // Такие субтитры не попадут на шкалу
                    Ok(_) if !valid_window => SegmentOutcome::Skipped(SkipReason::InvalidWindow),
                    Ok(_permit) => prepare_cue(&context, i, cue_index, &text, window).await,
                    Err(e) => SegmentOutcome::Skipped(SkipReason::Audio(e.to_string())),
                };
                let current = completed.fetch_add(1, Ordering::SeqCst) + 1;
                send_progress(&progress, ProgressUpdate::Synthesizing { current, total }).await;
                (i, outcome)
            }));
        }

        let mut outcomes = vec![SegmentOutcome::Skipped(SkipReason::Audio("task did not finish".to_string())); total];
        for result in join_all(tasks).await {
            match result {
                Ok((i, outcome)) => outcomes[i] = outcome,
                Err(e) => error!("Speech preparation task failed: {}", e),
            }
        }
        outcomes
    }
}

/// Синтез, приведение к формату, подгонка темпа, нормализация
async fn prepare_cue(ctx: &PrepareContext, position: usize, cue_index: usize, text: &str, window: f64) -> SegmentOutcome {
    if text.trim().is_empty() {
        debug!("Subtitle {} is blank, no synthesis", cue_index);
        return SegmentOutcome::Skipped(SkipReason::BlankText);
    }

    let speech = match ctx.synthesizer.synthesize(text, &ctx.voice).await {
        Ok(speech) => speech,
        Err(e) => {
            warn!("Synthesis failed for subtitle {}: {}", cue_index, e);
            return SegmentOutcome::Skipped(SkipReason::Synthesis(e.to_string()));
        }
    };

    let stem = ctx.work_dir.join(format!("speech_{:05}", position));
    let encoded = stem.with_extension(format!("raw.{}", speech.container.extension()));
    let converted = stem.with_extension("wav");

    if let Err(e) = tokio::fs::write(&encoded, &speech.audio).await {
        warn!("Cannot store speech for subtitle {}: {}", cue_index, e);
        return SegmentOutcome::Skipped(SkipReason::Audio(e.to_string()));
    }
    let convert = FilterJob::to_file(&converted).input(&encoded).pipeline_format();
    if let Err(e) = ctx.runner.run(&convert).await {
        warn!("Cannot convert speech for subtitle {}: {}", cue_index, e);
        return SegmentOutcome::Skipped(SkipReason::Audio(e.to_string()));
    }

    let raw_duration = match wav::wav_duration_secs(&converted) {
        Ok(duration) => duration,
        Err(e) => {
            warn!("Cannot read speech for subtitle {}: {}", cue_index, e);
            return SegmentOutcome::Skipped(SkipReason::Audio(e.to_string()));
        }
    };

    let (fitted_path, duration) = if ctx.adjust_timing {
        fit_speech(ctx, &converted, &stem, cue_index, raw_duration, window).await
    } else {
        (converted.clone(), raw_duration)
    };

    let normalized = stem.with_extension("norm.wav");
    let path = match loudness::normalize_segment(&fitted_path, &normalized) {
        Ok(_) => normalized,
        Err(e) => {
            warn!("Normalization failed for subtitle {}, keeping level: {}", cue_index, e);
            fitted_path
        }
    };

    SegmentOutcome::Ready(SpeechClip { path, duration })
}

/// Подогнать речь под окно; при ошибке остаётся исходная речь
async fn fit_speech(
    ctx: &PrepareContext,
    converted: &Path,
    stem: &Path,
    cue_index: usize,
    raw_duration: f64,
    window: f64,
) -> (PathBuf, f64) {
    let fit = match stretch::fit(raw_duration, window, &ctx.speed) {
        FitOutcome::Fitted(fit) => fit,
        FitOutcome::Skipped(FitSkip::Disabled) => return (converted.to_path_buf(), raw_duration),
        FitOutcome::Skipped(skip) => {
            warn!("Subtitle {}: speed fit skipped ({:?})", cue_index, skip);
            return (converted.to_path_buf(), raw_duration);
        }
    };

    if fit.is_identity() {
        return (converted.to_path_buf(), raw_duration);
    }
    debug!(
        "Subtitle {}: {:.3}s -> {:.3}s (factor {:.3}{})",
        cue_index,
        raw_duration,
        fit.adjusted_duration,
        fit.speed_factor,
        if fit.clamped { ", clamped" } else { "" }
    );

    let stretched = stem.with_extension("fit.wav");
    let job = stretch::stretch_job(converted, &stretched, &fit, ctx.use_rubberband);
    if let Err(e) = ctx.runner.run(&job).await {
        warn!("Time stretch failed for subtitle {}, using raw speech: {}", cue_index, e);
        return (converted.to_path_buf(), raw_duration);
    }

    let duration = wav::wav_duration_secs(&stretched).unwrap_or(fit.adjusted_duration);
    (stretched, duration)
}

/// Записать файлы тишины и собрать входы сведения
pub fn materialize(segments: &[Segment], silence_dir: &Path) -> Result<Vec<MixInput>> {
    let min_duration = 1.0 / consts::SAMPLE_RATE as f64;
    let mut inputs = Vec::with_capacity(segments.len());

    for (i, segment) in segments.iter().enumerate() {
        match &segment.audio {
            SegmentAudio::Speech(clip) => inputs.push(MixInput {
                path: clip.path.clone(),
                offset: segment.start,
                duration: clip.duration,
            }),
            SegmentAudio::Silence => {
                let duration = segment.audio_duration();
                if duration < min_duration {
                    debug!("Skipping empty silence at {:.3}s", segment.start);
                    continue;
                }
                let path = silence_dir.join(format!("silence_{:05}.wav", i));
                wav::write_silence(&path, duration)?;
                inputs.push(MixInput {
                    path,
                    offset: segment.start,
                    duration,
                });
            }
        }
    }

    Ok(inputs)
}
