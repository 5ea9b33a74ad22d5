//! Пакетное сведение сегментов в мастер-дорожку
//!
//! Внешний инструмент принимает ограниченное число входов, поэтому сегменты
//! сводятся пакетами, а пакеты затем объединяются. Задержки абсолютные
//! (от начала шкалы), так что пакеты объединяются без сдвига.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use log::{error, info};
use tokio::sync::mpsc::Sender;

use crate::config::consts;
use crate::error::{Result, SubTtsError};
use crate::media::runner::{FilterGraphRunner, FilterJob};
use crate::progress::{send_progress, ProgressUpdate};

const OUTPUT_LABEL: &str = "outa";

/// Вход сведения: файл и его место на шкале
#[derive(Debug, Clone, PartialEq)]
pub struct MixInput {
    pub path: PathBuf,
    /// Задержка от начала шкалы (секунды)
    pub offset: f64,
    /// Длительность звука (секунды)
    pub duration: f64,
}

/// Разбить входы на последовательные пакеты не больше `max_inputs`
pub fn partition(inputs: &[MixInput], max_inputs: usize) -> Vec<&[MixInput]> {
    inputs.chunks(max_inputs.max(1)).collect()
}

fn delay_ms(offset: f64) -> u64 {
    (offset.max(0.0) * 1000.0).round() as u64
}

/// Задержать каждый вход и сложить с ослаблением
fn overlay_graph(delays_ms: &[u64]) -> String {
    let mut graph = String::new();
    for (i, ms) in delays_ms.iter().enumerate() {
        let _ = write!(graph, "[{i}:a]adelay={ms}|{ms}[a{i}];");
    }
    for i in 0..delays_ms.len() {
        let _ = write!(graph, "[a{i}]");
    }
    let weights = vec!["1"; delays_ms.len()].join(" ");
    let _ = write!(
        graph,
        "amix=inputs={}:duration=longest:dropout_transition=0:weights={}:normalize=0,volume={}[{}]",
        delays_ms.len(),
        weights,
        consts::MIX_ATTENUATION,
        OUTPUT_LABEL
    );
    graph
}

/// Граф сведения одного пакета
pub fn batch_graph(batch: &[MixInput]) -> String {
    let delays: Vec<u64> = batch.iter().map(|input| delay_ms(input.offset)).collect();
    overlay_graph(&delays)
}

/// Граф объединения пакетов
pub fn merge_graph(batch_count: usize) -> String {
    overlay_graph(&vec![0; batch_count])
}

/// Длительность объединённой дорожки, чтобы не обрезать хвост (секунды)
pub fn merge_duration(inputs: &[MixInput]) -> u64 {
    let max_end = inputs
        .iter()
        .map(|input| input.offset + input.duration)
        .fold(0.0f64, f64::max);
    let longest = inputs.iter().map(|input| input.duration).fold(0.0f64, f64::max);
    max_end.max(max_end + longest).floor() as u64 + 1
}

pub fn batch_job(batch: &[MixInput], output: &Path) -> FilterJob {
    batch
        .iter()
        .fold(FilterJob::to_file(output), |job, input| job.input(&input.path))
        .complex_filter(batch_graph(batch), OUTPUT_LABEL)
        .pipeline_format()
}

pub fn merge_job(batches: &[PathBuf], duration_secs: u64, output: &Path) -> FilterJob {
    batches
        .iter()
        .fold(FilterJob::to_file(output), |job, path| job.input(path))
        .complex_filter(merge_graph(batches.len()), OUTPUT_LABEL)
        .args(["-t".to_string(), duration_secs.to_string()])
        .pipeline_format()
}

/// Свести все входы в `output`. Любая ошибка прерывает запуск.
pub async fn mix(
    runner: &dyn FilterGraphRunner,
    inputs: &[MixInput],
    work_dir: &Path,
    output: &Path,
    progress: &Option<Sender<ProgressUpdate>>,
) -> Result<PathBuf> {
    if inputs.is_empty() {
        return Err(SubTtsError::AudioProcessing("no segments to mix".to_string()));
    }

    let batches = partition(inputs, consts::MAX_INPUTS);
    let total = batches.len();
    info!("Mixing {} segments in {} batch(es)", inputs.len(), total);

    // Единственный пакет сразу становится мастер-дорожкой
    if total == 1 {
        send_progress(progress, ProgressUpdate::MixingBatch { index: 1, total }).await;
        runner
            .run(&batch_job(batches[0], output))
            .await
            .map_err(|source| batch_failed(0, source))?;
        return Ok(output.to_path_buf());
    }

    let mut batch_files = Vec::with_capacity(total);
    for (index, batch) in batches.iter().enumerate() {
        send_progress(progress, ProgressUpdate::MixingBatch { index: index + 1, total }).await;
        let path = work_dir.join(format!("batch_{:03}.wav", index));
        runner
            .run(&batch_job(batch, &path))
            .await
            .map_err(|source| batch_failed(index, source))?;
        batch_files.push(path);
    }

    send_progress(progress, ProgressUpdate::MergingBatches).await;
    runner
        .run(&merge_job(&batch_files, merge_duration(inputs), output))
        .await
        .map_err(|source| {
            error!("Merging {} batches failed: {}", total, source);
            SubTtsError::BatchMerge(source)
        })?;

    Ok(output.to_path_buf())
}

fn batch_failed(batch: usize, source: crate::media::runner::ProcessError) -> SubTtsError {
    error!("Batch {} mix failed: {}", batch, source);
    SubTtsError::BatchMix { batch, source }
}
