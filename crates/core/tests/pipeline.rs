use std::path::Path;

use audio_haptics_core::{
    AppConfig, AudioTrack, HapticError, HapticEvent, HapticPatternDocument, PipelineOrchestrator,
};

/// Minimal 16-bit mono PCM WAV encoder.
fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) {
    let data_len = (samples.len() * 2) as u32;
    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    std::fs::write(path, bytes).unwrap();
}

/// Short decaying bursts every `interval` seconds, the first at `interval / 2`.
fn click_train(seconds: f32, sample_rate: u32, interval: f32) -> Vec<f32> {
    let len = (seconds * sample_rate as f32) as usize;
    let step = (interval * sample_rate as f32) as usize;
    let mut samples = vec![0.0_f32; len];
    for start in (step / 2..len).step_by(step) {
        for (i, slot) in samples[start..].iter_mut().take(800).enumerate() {
            let decay = (-(i as f32) / 120.0).exp();
            *slot = decay * if i % 2 == 0 { 0.9 } else { -0.9 };
        }
    }
    samples
}

#[test]
fn silent_track_produces_an_empty_but_valid_document() {
    let pipeline = PipelineOrchestrator::new(&AppConfig::default()).unwrap();
    let track = AudioTrack::new(vec![0.0; 4 * 22_050], 22_050).unwrap();

    let output = pipeline.process(&track).unwrap();
    assert_eq!(output.document.transient_count(), 0);
    assert!(output.beats.is_empty());
    assert_eq!(output.mfcc_synced.rows(), 39);
    assert_eq!(output.mfcc_synced.cols(), 1);
    assert_eq!(output.chroma_synced.original.rows(), 12);

    let value: serde_json::Value =
        serde_json::from_slice(&output.document.serialize().unwrap()).unwrap();
    assert_eq!(value["Version"], 1.0);
    assert_eq!(value["Events"], serde_json::json!([]));
    for field in ["Project", "CreationDate", "Description", "Author"] {
        assert!(value["Metadata"][field].is_string(), "{field} missing");
    }
}

#[test]
fn click_track_converts_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("clicks.wav");
    write_wav(&input, &click_train(4.0, 44_100, 0.5), 44_100);

    let pipeline = PipelineOrchestrator::new(&AppConfig::default()).unwrap();
    let written = pipeline.run(&input).unwrap();
    assert_eq!(written, dir.path().join("clicks.ahap"));

    let document = HapticPatternDocument::load(&written).unwrap();
    assert!(document.transient_count() >= 6, "{:?}", document.events());

    let mut previous = -1.0;
    for event in document.events() {
        let HapticEvent::Transient {
            timestamp,
            intensity,
            sharpness,
        } = *event
        else {
            panic!("unexpected event {event:?}");
        };
        assert!(timestamp > previous);
        previous = timestamp;
        assert!((0.0..=1.0).contains(&intensity));
        assert_eq!(intensity, sharpness);

        let phase = (timestamp - 0.25).rem_euclid(0.5);
        assert!(phase < 0.07 || phase > 0.43, "transient at {timestamp} is off the click grid");
    }
}

#[test]
fn explicit_output_path_is_honoured() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("clicks.wav");
    let output = dir.path().join("custom.json");
    write_wav(&input, &click_train(2.0, 22_050, 0.5), 22_050);

    let pipeline = PipelineOrchestrator::new(&AppConfig::default()).unwrap();
    let result = pipeline.run_to(&input, &output).unwrap();

    assert!(output.exists());
    assert!(!dir.path().join("clicks.ahap").exists());
    assert!(result.document.is_finalized());
}

#[test]
fn undecodable_input_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("noise.wav");
    std::fs::write(&input, b"definitely not a riff header").unwrap();

    let pipeline = PipelineOrchestrator::new(&AppConfig::default()).unwrap();
    let err = pipeline.run(&input).unwrap_err();

    assert!(
        matches!(err, HapticError::UnsupportedFormat(_) | HapticError::Decode(_)),
        "{err:?}"
    );
    assert!(!dir.path().join("noise.ahap").exists());
}

#[test]
fn missing_input_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = PipelineOrchestrator::new(&AppConfig::default()).unwrap();

    let err = pipeline.run(dir.path().join("absent.mp3")).unwrap_err();
    assert!(matches!(err, HapticError::Io(_)));
}

#[test]
fn custom_metadata_flows_into_the_document() {
    let mut config = AppConfig::default();
    config.document.author = "Integration".into();
    config.output_extension = "haptic".into();

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("clicks.wav");
    write_wav(&input, &click_train(2.0, 22_050, 0.5), 22_050);

    let written = PipelineOrchestrator::new(&config).unwrap().run(&input).unwrap();
    assert_eq!(written.extension().unwrap(), "haptic");
    let document = HapticPatternDocument::load(&written).unwrap();
    assert_eq!(document.metadata().author, "Integration");
}
