//! Тестовые двойники внешнего инструмента и движка синтеза

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hound::{SampleFormat, WavSpec, WavWriter};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::consts;
use crate::media::runner::{FilterGraph, FilterGraphRunner, FilterJob, OutputTarget, ProcessError, ProcessOutput};
use crate::media::wav::{self, AudioBuffer};
use crate::subtitle::Cue;
use crate::tts::{AudioContainer, SpeechSynthesizer, SynthesisError, SynthesizedSpeech};

pub const VALID_MEASUREMENT: &str = r#"[Parsed_loudnorm_0 @ 0x1]
{
	"input_i" : "-24.80",
	"input_tp" : "-6.10",
	"input_lra" : "7.30",
	"input_thresh" : "-35.20"
}"#;

static ATEMPO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"atempo=([0-9.]+)").unwrap());
static ADELAY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(\d+):a\]adelay=(\d+)\|").unwrap());

pub fn cue(index: usize, start: f64, end: f64, text: &str) -> Cue {
    Cue::new(
        index,
        Duration::from_millis((start * 1000.0).round() as u64),
        Duration::from_millis((end * 1000.0).round() as u64),
        text,
    )
}

pub fn tone(duration: f64, sample_rate: u32, channels: u16) -> AudioBuffer {
    let frames = (duration * sample_rate as f64).round() as usize;
    let samples = (0..frames * channels as usize)
        .map(|i| 0.2 * ((i / channels as usize) as f32 * 0.05).sin())
        .collect();
    AudioBuffer::new(samples, sample_rate, channels)
}

pub fn tone_wav_bytes(duration: f64) -> Vec<u8> {
    let audio = tone(duration, consts::SAMPLE_RATE, 1);
    let spec = WavSpec {
        channels: 1,
        sample_rate: consts::SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
        for sample in &audio.samples {
            writer.write_sample(wav::to_i16(*sample)).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

type JobPredicate = Box<dyn Fn(&FilterJob) -> bool + Send + Sync>;

/// Записывает задания и создаёт правдоподобные выходные файлы
pub struct RecordingRunner {
    pub jobs: Mutex<Vec<FilterJob>>,
    measurement: String,
    fail_when: Option<JobPredicate>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            measurement: VALID_MEASUREMENT.to_string(),
            fail_when: None,
        }
    }

    pub fn with_measurement(mut self, measurement: &str) -> Self {
        self.measurement = measurement.to_string();
        self
    }

    pub fn failing_when(mut self, predicate: impl Fn(&FilterJob) -> bool + Send + Sync + 'static) -> Self {
        self.fail_when = Some(Box::new(predicate));
        self
    }

    pub fn jobs(&self) -> Vec<FilterJob> {
        self.jobs.lock().unwrap().clone()
    }

    /// Задания со сложным графом (сведение пакетов и объединение)
    pub fn mix_jobs(&self) -> Vec<FilterJob> {
        self.jobs()
            .into_iter()
            .filter(|job| matches!(job.filter, Some(FilterGraph::Complex { .. })))
            .collect()
    }

    fn output_format(job: &FilterJob) -> (u32, u16) {
        let mut sample_rate = consts::SAMPLE_RATE;
        let mut channels = consts::CHANNELS;
        for pair in job.output_args.windows(2) {
            match pair[0].as_str() {
                "-ar" => sample_rate = pair[1].parse().unwrap(),
                "-ac" => channels = pair[1].parse().unwrap(),
                _ => {}
            }
        }
        (sample_rate, channels)
    }

    fn input_duration(path: &Path) -> f64 {
        wav::wav_duration_secs(path).unwrap_or(1.0)
    }

    fn output_duration(job: &FilterJob) -> f64 {
        if let Some(pos) = job.output_args.iter().position(|a| a == "-t") {
            return job.output_args[pos + 1].parse().unwrap();
        }
        match &job.filter {
            Some(FilterGraph::Complex { graph, .. }) => ADELAY_RE
                .captures_iter(graph)
                .map(|c| {
                    let input: usize = c[1].parse().unwrap();
                    let delay: f64 = c[2].parse::<f64>().unwrap() / 1000.0;
                    delay + Self::input_duration(&job.inputs[input])
                })
                .fold(0.0, f64::max),
            Some(FilterGraph::Simple(chain)) => {
                let tempo: f64 = ATEMPO_RE
                    .captures_iter(chain)
                    .map(|c| c[1].parse::<f64>().unwrap())
                    .product();
                Self::input_duration(&job.inputs[0]) / tempo
            }
            None => Self::input_duration(&job.inputs[0]),
        }
    }
}

#[async_trait]
impl FilterGraphRunner for RecordingRunner {
    async fn run(&self, job: &FilterJob) -> Result<ProcessOutput, ProcessError> {
        self.jobs.lock().unwrap().push(job.clone());

        if let Some(predicate) = &self.fail_when {
            if predicate(job) {
                return Err(ProcessError {
                    program: "ffmpeg".to_string(),
                    status: Some(1),
                    diagnostics: "scripted failure".to_string(),
                });
            }
        }

        let output = match &job.output {
            OutputTarget::Null => {
                return Ok(ProcessOutput {
                    stdout: String::new(),
                    stderr: self.measurement.clone(),
                })
            }
            OutputTarget::File(path) => path.clone(),
        };

        let is_wav = output.extension().and_then(|e| e.to_str()) == Some("wav");
        if is_wav {
            let (sample_rate, channels) = Self::output_format(job);
            let duration = Self::output_duration(job);
            wav::write_wav(&output, &tone(duration, sample_rate, channels)).unwrap();
        } else {
            std::fs::write(&output, b"encoded").unwrap();
        }

        Ok(ProcessOutput::default())
    }
}

/// Движок с заданными длительностями и ошибками по тексту
pub struct ScriptedSynthesizer {
    durations: HashMap<String, f64>,
    failures: HashSet<String>,
    default_duration: f64,
    delay: Duration,
    pub calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedSynthesizer {
    pub fn new() -> Self {
        Self {
            durations: HashMap::new(),
            failures: HashSet::new(),
            default_duration: 1.0,
            delay: Duration::from_millis(0),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_duration(mut self, text: &str, duration: f64) -> Self {
        self.durations.insert(text.to_string(), duration);
        self
    }

    pub fn failing_on(mut self, text: &str) -> Self {
        self.failures.insert(text.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSynthesizer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn synthesize(&self, text: &str, _voice: &str) -> Result<SynthesizedSpeech, SynthesisError> {
        self.calls.lock().unwrap().push(text.to_string());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failures.contains(text) {
            return Err(SynthesisError::Engine {
                engine: "scripted".to_string(),
                message: format!("cannot say '{}'", text),
            });
        }

        let duration = self.durations.get(text).copied().unwrap_or(self.default_duration);
        Ok(SynthesizedSpeech {
            audio: tone_wav_bytes(duration),
            container: AudioContainer::Wav,
        })
    }
}
