use std::path::{Path, PathBuf};

use super::support::{tone, RecordingRunner};
use crate::error::SubTtsError;
use crate::media::runner::FilterGraph;
use crate::media::wav;
use crate::pipeline::mixer::{mix, MixInput};

fn write_inputs(dir: &Path, count: usize) -> Vec<MixInput> {
    (0..count)
        .map(|i| {
            let path = dir.join(format!("seg_{:03}.wav", i));
            wav::write_wav(&path, &tone(0.5, 24_000, 1)).unwrap();
            MixInput {
                path,
                offset: i as f64 * 0.1,
                duration: 0.5,
            }
        })
        .collect()
}

#[tokio::test]
async fn test_scenario_d_two_level_mix() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_inputs(dir.path(), 250);
    let output = dir.path().join("master.wav");
    let runner = RecordingRunner::new();

    let master = mix(&runner, &inputs, dir.path(), &output, &None).await.unwrap();
    assert_eq!(master, output);

    let jobs = runner.mix_jobs();
    assert_eq!(jobs.len(), 4);
    let sizes: Vec<_> = jobs[..3].iter().map(|j| j.inputs.len()).collect();
    assert_eq!(sizes, vec![100, 100, 50]);

    // пакеты по порядку, без потерь
    let batched: Vec<PathBuf> = jobs[..3].iter().flat_map(|j| j.inputs.clone()).collect();
    let expected: Vec<PathBuf> = inputs.iter().map(|i| i.path.clone()).collect();
    assert_eq!(batched, expected);

    let merge = &jobs[3];
    assert_eq!(merge.inputs.len(), 3);
    assert_eq!(merge.output_path(), Some(output.as_path()));
    match &merge.filter {
        Some(FilterGraph::Complex { graph, .. }) => {
            assert!(graph.contains("[2:a]adelay=0|0[a2]"));
            assert!(graph.contains("amix=inputs=3"));
        }
        other => panic!("unexpected merge filter: {:?}", other),
    }
    // последний сегмент кончается на 25.4, плюс самый длинный 0.5
    let t = merge.output_args.iter().position(|a| a == "-t").unwrap();
    assert_eq!(merge.output_args[t + 1], "26");
}

#[tokio::test]
async fn test_single_batch_becomes_master() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_inputs(dir.path(), 3);
    let output = dir.path().join("master.wav");
    let runner = RecordingRunner::new();

    mix(&runner, &inputs, dir.path(), &output, &None).await.unwrap();

    let jobs = runner.mix_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].output_path(), Some(output.as_path()));
    assert!((wav::wav_duration_secs(&output).unwrap() - 0.7).abs() < 1e-3);
}

#[tokio::test]
async fn test_batch_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_inputs(dir.path(), 150);
    let output = dir.path().join("master.wav");
    let runner = RecordingRunner::new().failing_when(|job| {
        job.output_path()
            .map(|p| p.ends_with("batch_001.wav"))
            .unwrap_or(false)
    });

    let err = mix(&runner, &inputs, dir.path(), &output, &None).await.unwrap_err();
    match err {
        SubTtsError::BatchMix { batch, source } => {
            assert_eq!(batch, 1);
            assert_eq!(source.diagnostics, "scripted failure");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(!output.exists());
}

#[tokio::test]
async fn test_merge_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_inputs(dir.path(), 101);
    let output = dir.path().join("master.wav");
    let runner = RecordingRunner::new().failing_when(|job| job.inputs.iter().any(|p| p.ends_with("batch_000.wav")));

    let err = mix(&runner, &inputs, dir.path(), &output, &None).await.unwrap_err();
    assert!(matches!(err, SubTtsError::BatchMerge(_)));
}

#[tokio::test]
async fn test_nothing_to_mix() {
    let dir = tempfile::tempdir().unwrap();
    let runner = RecordingRunner::new();
    let err = mix(&runner, &[], dir.path(), &dir.path().join("m.wav"), &None)
        .await
        .unwrap_err();
    assert!(matches!(err, SubTtsError::AudioProcessing(_)));
    assert!(runner.jobs().is_empty());
}
