use super::support::{tone, RecordingRunner};
use crate::config::consts;
use crate::media::loudness::{LoudnessNormalizer, NormalizeOutcome};
use crate::media::runner::OutputTarget;
use crate::media::wav;

#[tokio::test]
async fn test_malformed_measurement_never_fails_the_run() {
    let measurements = [
        "",
        "no json at all",
        "{ \"input_i\" : \"-23.0\" ",
        "{ \"input_i\" : \"nan\", \"input_tp\" : \"-1\", \"input_lra\" : \"1\", \"input_thresh\" : \"-30\" }",
        "{ \"input_i\" : \"-inf\", \"input_tp\" : \"-inf\", \"input_lra\" : \"0.0\", \"input_thresh\" : \"-70.0\" }",
    ];

    for measurement in measurements {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("master_raw.wav");
        let output = dir.path().join("final_output.wav");
        wav::write_wav(&input, &tone(2.0, consts::SAMPLE_RATE, 1)).unwrap();

        let runner = RecordingRunner::new().with_measurement(measurement);
        let outcome = LoudnessNormalizer::new(&runner, true)
            .normalize(&input, &output)
            .await
            .unwrap();

        assert!(matches!(outcome, NormalizeOutcome::Fallback { .. }), "{:?}", measurement);
        let normalized = wav::read_wav(&output).unwrap();
        assert!((normalized.dbfs() - consts::SEGMENT_TARGET_DBFS).abs() < 0.1);
        assert_eq!(normalized.frame_count(), 48_000);
        // второй проход не запускался
        assert_eq!(runner.jobs().len(), 1);
    }
}

#[tokio::test]
async fn test_failed_measurement_process_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("master_raw.wav");
    let output = dir.path().join("final_output.wav");
    wav::write_wav(&input, &tone(1.0, consts::SAMPLE_RATE, 1)).unwrap();

    let runner = RecordingRunner::new().failing_when(|job| job.output == OutputTarget::Null);
    let outcome = LoudnessNormalizer::new(&runner, true)
        .normalize(&input, &output)
        .await
        .unwrap();

    match outcome {
        NormalizeOutcome::Fallback { reason } => assert!(reason.contains("scripted failure")),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(output.exists());
}

#[tokio::test]
async fn test_disabled_two_pass_skips_external_tool() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("master_raw.wav");
    let output = dir.path().join("final_output.wav");
    wav::write_wav(&input, &tone(1.0, consts::SAMPLE_RATE, 1)).unwrap();

    let runner = RecordingRunner::new();
    let outcome = LoudnessNormalizer::new(&runner, false)
        .normalize(&input, &output)
        .await
        .unwrap();

    assert!(!outcome.is_two_pass());
    assert!(runner.jobs().is_empty());
}

#[tokio::test]
async fn test_unreadable_input_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("master_raw.wav");
    std::fs::write(&input, b"garbage").unwrap();

    let runner = RecordingRunner::new().with_measurement("broken");
    let result = LoudnessNormalizer::new(&runner, true)
        .normalize(&input, &dir.path().join("out.wav"))
        .await;
    assert!(result.is_err());
}
