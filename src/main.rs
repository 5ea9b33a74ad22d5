use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{debug, info};
use tokio::sync::mpsc;

use subtts::config::TtsEngine;
use subtts::progress::ProgressUpdate;
use subtts::subtitle::fixer;
use subtts::utils::logger::init_logger;
use subtts::{SubTts, SubTtsConfig};

/// Озвучка субтитров с синхронизацией по времени
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Подробный вывод
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synthesize a master track from an SRT file
    Convert {
        /// Subtitle file
        srt: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
        /// Synthesis engine
        #[arg(long, value_parser = parse_engine)]
        engine: Option<TtsEngine>,
        /// Voice identifier
        #[arg(long)]
        voice: Option<String>,
        /// Replacement dictionary (`key=value` per line)
        #[arg(long)]
        dictionary: Option<PathBuf>,
        /// Keep synthesized durations unchanged
        #[arg(long)]
        no_adjust: bool,
        /// Disable automatic tempo fitting
        #[arg(long)]
        no_auto_adjust: bool,
        /// Maximum slowdown in percent
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100), conflicts_with = "no_slowdown")]
        slowdown: Option<u8>,
        /// Do not limit the slowdown
        #[arg(long)]
        no_slowdown: bool,
        /// Maximum speedup in percent
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100), conflicts_with = "no_speedup")]
        speedup: Option<u8>,
        /// Do not limit the speedup
        #[arg(long)]
        no_speedup: bool,
        /// Concurrent synthesis requests
        #[arg(long)]
        jobs: Option<usize>,
        /// Warn about bad timestamps instead of failing
        #[arg(long)]
        lenient: bool,
        /// API key for the online engine
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },

    /// Mix the master track with the original audio
    Dub {
        /// Original audio or video
        original: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
        /// Dubbed track (defaults to final_output.wav in the output directory)
        #[arg(long)]
        dubbed: Option<PathBuf>,
        /// Original volume change in dB
        #[arg(long, allow_hyphen_values = true)]
        original_volume: Option<f64>,
        /// Dubbed volume change in dB
        #[arg(long, allow_hyphen_values = true)]
        dubbed_volume: Option<f64>,
        /// Stereo balance, -100 (left) to 100 (right)
        #[arg(long, allow_hyphen_values = true, value_parser = clap::value_parser!(i8).range(-100..=100))]
        balance: Option<i8>,
    },

    /// Replace the audio track of a video
    Remux {
        /// Source video
        video: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
        /// Audio track (defaults to final_mix.mp3 in the output directory)
        #[arg(long)]
        audio: Option<PathBuf>,
    },

    /// Sort subtitles, clip overlaps and renumber
    FixSrt {
        /// Input subtitle file
        #[arg(short, long)]
        input: PathBuf,
        /// Corrected subtitle file
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Output directory
    #[arg(long, default_value = "output")]
    out: PathBuf,
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

impl CommonArgs {
    fn load_config(&self) -> Result<SubTtsConfig> {
        match &self.config {
            Some(path) => SubTtsConfig::from_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display())),
            None => Ok(SubTtsConfig::default()),
        }
    }
}

fn parse_engine(value: &str) -> std::result::Result<TtsEngine, String> {
    match value {
        "offline" => Ok(TtsEngine::Offline),
        "online" => Ok(TtsEngine::Online),
        other => Err(format!("unknown engine '{}', expected offline or online", other)),
    }
}

/// Пишет события прогресса в лог
fn spawn_progress_logger() -> (mpsc::Sender<ProgressUpdate>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(100);
    let handle = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            match update {
                ProgressUpdate::Synthesizing { current, total } => {
                    if current == total || current % 10 == 0 {
                        info!("Synthesized {}/{}", current, total);
                    }
                }
                ProgressUpdate::MixingBatch { index, total } => info!("Mixing batch {}/{}", index, total),
                ProgressUpdate::Normalizing { two_pass } => {
                    info!("Loudness normalized ({})", if two_pass { "two-pass" } else { "fallback" })
                }
                other => debug!("Progress: {:?}", other),
            }
        }
    });
    (tx, handle)
}

fn build(config: SubTtsConfig, progress: Option<mpsc::Sender<ProgressUpdate>>) -> Result<SubTts> {
    let subtts = SubTts::new(config).context("Failed to initialize pipeline")?;
    Ok(match progress {
        Some(sender) => subtts.with_progress(sender),
        None => subtts,
    })
}

async fn run_convert(srt: &Path, out: &Path, config: SubTtsConfig) -> Result<()> {
    let (tx, logger) = spawn_progress_logger();
    let subtts = build(config, Some(tx))?;
    let report = subtts
        .convert(srt, out)
        .await
        .with_context(|| format!("Failed to convert {}", srt.display()))?;
    drop(subtts);
    let _ = logger.await;

    println!(
        "{} subtitles, {} spoken, {} failed -> {}",
        report.cues,
        report.spoken,
        report.failed,
        report.master_mp3.display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match cli.command {
        Commands::Convert {
            srt,
            common,
            engine,
            voice,
            dictionary,
            no_adjust,
            no_auto_adjust,
            slowdown,
            no_slowdown,
            speedup,
            no_speedup,
            jobs,
            lenient,
            api_key,
        } => {
            let mut config = common.load_config()?;
            if let Some(engine) = engine {
                config.engine = engine;
            }
            if let Some(voice) = voice {
                config.voice = voice;
            }
            if dictionary.is_some() {
                config.dictionary_path = dictionary;
            }
            if no_adjust {
                config.adjust_timing = false;
            }
            if no_auto_adjust {
                config.speed.auto_adjust_enabled = false;
            }
            if let Some(percent) = slowdown {
                config.speed.slowdown_enabled = true;
                config.speed.slowdown_threshold = f64::from(percent) / 100.0;
            }
            if no_slowdown {
                config.speed.slowdown_enabled = false;
            }
            if let Some(percent) = speedup {
                config.speed.speedup_enabled = true;
                config.speed.speedup_threshold = f64::from(percent) / 100.0;
            }
            if no_speedup {
                config.speed.speedup_enabled = false;
            }
            if let Some(jobs) = jobs {
                config.max_concurrent_synthesis = jobs;
            }
            if lenient {
                config.strict_timing = false;
            }
            if let Some(key) = api_key {
                config.openai.api_key = key;
            }

            run_convert(&srt, &common.out, config).await
        }
        Commands::Dub {
            original,
            common,
            dubbed,
            original_volume,
            dubbed_volume,
            balance,
        } => {
            let mut config = common.load_config()?;
            if let Some(db) = original_volume {
                config.dub.original_volume_db = db;
            }
            if let Some(db) = dubbed_volume {
                config.dub.dubbed_volume_db = db;
            }
            if let Some(balance) = balance {
                config.dub.balance = f64::from(balance) / 100.0;
            }

            let output = build(config, None)?
                .dub(&original, dubbed.as_deref(), &common.out)
                .await
                .with_context(|| format!("Failed to mix with {}", original.display()))?;
            println!("{}", output.display());
            Ok(())
        }
        Commands::Remux { video, common, audio } => {
            let config = common.load_config()?;
            let output = build(config, None)?
                .remux(&video, audio.as_deref(), &common.out)
                .await
                .with_context(|| format!("Failed to remux {}", video.display()))?;
            println!("{}", output.display());
            Ok(())
        }
        Commands::FixSrt { input, output } => {
            let count = fixer::fix_srt_file(&input, &output)
                .with_context(|| format!("Failed to fix {}", input.display()))?;
            println!("{} subtitles written to {}", count, output.display());
            Ok(())
        }
    }
}
