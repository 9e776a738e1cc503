//! End-to-end conversion from an audio file to a persisted haptic pattern.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    analysis::{BeatTracking, FeatureKind, FeatureMatrix, FeatureSource, OnsetDetection, SpectralFeatureSource},
    audio::AudioTrack,
    config::{AppConfig, DocumentConfig},
    haptics::HapticEventSynthesizer,
    pattern::{HapticPatternDocument, PatternMetadata},
    sync::{BeatGrid, BeatSynchronizer},
    Result,
};

/// Which signal a feature matrix was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Original,
    Harmonic,
    Percussive,
}

impl Stream {
    pub const ALL: [Stream; 3] = [Stream::Original, Stream::Harmonic, Stream::Percussive];

    pub fn label(self) -> &'static str {
        match self {
            Stream::Original => "original",
            Stream::Harmonic => "harmonic",
            Stream::Percussive => "percussive",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Receives intermediate results while a track is processed. Every method
/// defaults to doing nothing.
pub trait AnalysisObserver {
    fn on_features(&self, _stream: Stream, _kind: FeatureKind, _matrix: &FeatureMatrix) {}

    fn on_onsets(&self, _onsets: &OnsetDetection) {}

    fn on_beats(&self, _beats: &BeatTracking) {}

    fn on_synced(&self, _stream: Stream, _kind: FeatureKind, _matrix: &FeatureMatrix) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl AnalysisObserver for NoopObserver {}

/// Mel, chroma and MFCC matrices of one stream.
#[derive(Debug, Clone)]
pub struct StreamFeatures {
    pub mel: FeatureMatrix,
    pub chroma: FeatureMatrix,
    pub mfcc: FeatureMatrix,
}

/// Beat-synchronised chroma for each stream.
#[derive(Debug, Clone)]
pub struct SyncedChroma {
    pub original: FeatureMatrix,
    pub harmonic: FeatureMatrix,
    pub percussive: FeatureMatrix,
}

/// Everything a single run produces.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub document: HapticPatternDocument,
    pub tempo_bpm: f32,
    pub beats: BeatGrid,
    pub onsets: OnsetDetection,
    /// MFCC of the original stream, one column per beat interval.
    pub mfcc_synced: FeatureMatrix,
    pub chroma_synced: SyncedChroma,
}

/// Sequences a [`FeatureSource`] through the whole conversion.
pub struct PipelineOrchestrator<S = SpectralFeatureSource> {
    source: S,
    synthesizer: HapticEventSynthesizer,
    document: DocumentConfig,
    output_extension: String,
    observer: Arc<dyn AnalysisObserver>,
}

impl PipelineOrchestrator<SpectralFeatureSource> {
    /// Orchestrator backed by the built-in spectral analysis.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let source = SpectralFeatureSource::new(config.analysis.clone())?;
        Self::with_source(source, config)
    }
}

impl<S: FeatureSource> PipelineOrchestrator<S> {
    pub fn with_source(source: S, config: &AppConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            source,
            synthesizer: HapticEventSynthesizer::new(f64::from(config.haptics.strength_scale)),
            document: config.document.clone(),
            output_extension: config.output_extension.clone(),
            observer: Arc::new(NoopObserver),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn AnalysisObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Output location for `input`: the same path with its extension
    /// replaced.
    pub fn output_path(&self, input: &Path) -> PathBuf {
        output_path_for(input, &self.output_extension)
    }

    /// Decodes `input` and writes the pattern next to it.
    pub fn run(&self, input: impl AsRef<Path>) -> Result<PathBuf> {
        let input = input.as_ref();
        let output = self.output_path(input);
        self.run_to(input, &output)?;
        Ok(output)
    }

    /// Decodes `input` and writes the pattern to `output`. Nothing is
    /// written unless every stage succeeds.
    pub fn run_to(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<PipelineOutput> {
        let input = input.as_ref();
        let output = output.as_ref();

        let track = self.source.decode(input)?;
        tracing::info!(
            ?input,
            sample_rate = track.sample_rate(),
            samples = track.len(),
            duration = track.duration(),
            "decoded audio"
        );

        let result = self.process(&track)?;
        result.document.persist(output)?;
        Ok(result)
    }

    /// Converts every file in turn. A failure is recorded for its file and
    /// the batch carries on.
    pub fn run_batch<I, P>(&self, inputs: I) -> Vec<(PathBuf, Result<PathBuf>)>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        inputs
            .into_iter()
            .map(|input| {
                let input = input.as_ref().to_path_buf();
                let result = self.run(&input);
                if let Err(err) = &result {
                    tracing::error!(?input, %err, "conversion failed");
                }
                (input, result)
            })
            .collect()
    }

    /// Runs every analysis stage on an already decoded track and builds the
    /// (not yet persisted) pattern document.
    pub fn process(&self, track: &AudioTrack) -> Result<PipelineOutput> {
        let (harmonic, percussive) = self.source.harmonic_percussive_split(track)?;
        tracing::info!(samples = harmonic.len(), "separated harmonic and percussive parts");

        let beats = self.source.detect_beats(&percussive)?;
        self.observer.on_beats(&beats);
        tracing::info!(tempo = beats.tempo_bpm, beats = beats.beats.len(), "tracked beats");
        if beats.beats.is_empty() {
            tracing::warn!("no beats found, synchronised features cover the whole track");
        }

        let onsets = self.source.detect_onsets(track)?;
        self.observer.on_onsets(&onsets);
        tracing::info!(onsets = onsets.timestamps.len(), "detected onsets");

        let original = self.features(Stream::Original, track)?;
        let harmonic = self.features(Stream::Harmonic, &harmonic)?;
        let percussive = self.features(Stream::Percussive, &percussive)?;

        let synchronizer = BeatSynchronizer::new(self.source.hop_length(), track.sample_rate());
        let synced = |stream: Stream, kind: FeatureKind, matrix: &FeatureMatrix| -> Result<FeatureMatrix> {
            let out = synchronizer.sync(matrix, &beats.beats, &kind.aggregate())?;
            self.observer.on_synced(stream, kind, &out);
            Ok(out)
        };
        let mfcc_synced = synced(Stream::Original, FeatureKind::Mfcc, &original.mfcc)?;
        let chroma_synced = SyncedChroma {
            harmonic: synced(Stream::Harmonic, FeatureKind::Chroma, &harmonic.chroma)?,
            percussive: synced(Stream::Percussive, FeatureKind::Chroma, &percussive.chroma)?,
            original: synced(Stream::Original, FeatureKind::Chroma, &original.chroma)?,
        };
        tracing::info!(segments = mfcc_synced.cols(), "synchronised features to beats");

        let events = self
            .synthesizer
            .synthesize(&onsets.timestamps, &onsets.strengths())?;
        let mut document = HapticPatternDocument::new(PatternMetadata::from_config(&self.document));
        document.extend(events)?;
        tracing::info!(events = document.len(), "built haptic pattern");

        Ok(PipelineOutput {
            document,
            tempo_bpm: beats.tempo_bpm,
            beats: beats.beats,
            onsets,
            mfcc_synced,
            chroma_synced,
        })
    }

    fn features(&self, stream: Stream, track: &AudioTrack) -> Result<StreamFeatures> {
        let mel = self.source.mel_spectrogram(track)?;
        let chroma = self.source.chromagram(track)?;
        let mfcc = self.source.mfcc(&mel, track.sample_rate())?;
        tracing::debug!(
            %stream,
            frames = mel.cols(),
            mel = mel.rows(),
            chroma = chroma.rows(),
            mfcc = mfcc.rows(),
            "extracted features"
        );

        self.observer.on_features(stream, FeatureKind::Mel, &mel);
        self.observer.on_features(stream, FeatureKind::Chroma, &chroma);
        self.observer.on_features(stream, FeatureKind::Mfcc, &mfcc);
        Ok(StreamFeatures { mel, chroma, mfcc })
    }
}

/// `input` with its final extension replaced by `extension` (or added
/// when it has none).
pub fn output_path_for(input: &Path, extension: &str) -> PathBuf {
    input.with_extension(extension)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{haptics::HapticEvent, HapticError};

    const SR: u32 = 1000;
    const HOP: usize = 10;

    /// Deterministic source: one frame per `HOP` samples and fixed onsets.
    struct StubSource {
        onsets: Vec<f64>,
        beats: Vec<f64>,
        fail_beats: bool,
    }

    impl StubSource {
        fn new(onsets: Vec<f64>, beats: Vec<f64>) -> Self {
            Self {
                onsets,
                beats,
                fail_beats: false,
            }
        }

        fn matrix(rows: usize, track: &AudioTrack) -> FeatureMatrix {
            let cols = 1 + track.len() / HOP;
            let data = (0..rows * cols).map(|i| (i % cols) as f32).collect();
            FeatureMatrix::new(rows, cols, data).unwrap()
        }
    }

    impl FeatureSource for StubSource {
        fn hop_length(&self) -> usize {
            HOP
        }

        fn decode(&self, _path: &Path) -> Result<AudioTrack> {
            AudioTrack::new(vec![0.0; 2 * SR as usize], SR)
        }

        fn harmonic_percussive_split(&self, track: &AudioTrack) -> Result<(AudioTrack, AudioTrack)> {
            Ok((track.clone(), track.clone()))
        }

        fn mel_spectrogram(&self, track: &AudioTrack) -> Result<FeatureMatrix> {
            Ok(Self::matrix(128, track))
        }

        fn chromagram(&self, track: &AudioTrack) -> Result<FeatureMatrix> {
            Ok(Self::matrix(12, track))
        }

        fn mfcc(&self, mel: &FeatureMatrix, _sample_rate: u32) -> Result<FeatureMatrix> {
            Ok(FeatureMatrix::zeros(39, mel.cols()))
        }

        fn detect_onsets(&self, track: &AudioTrack) -> Result<OnsetDetection> {
            let frames: Vec<usize> = self
                .onsets
                .iter()
                .map(|t| (t * f64::from(SR) / HOP as f64).round() as usize)
                .collect();
            let mut envelope = vec![0.0; 1 + track.len() / HOP];
            for &frame in &frames {
                envelope[frame] = 2.5;
            }
            Ok(OnsetDetection {
                timestamps: self.onsets.clone(),
                frames,
                envelope,
            })
        }

        fn detect_beats(&self, _percussive: &AudioTrack) -> Result<BeatTracking> {
            if self.fail_beats {
                return Err(HapticError::msg("beat tracker exploded"));
            }
            Ok(BeatTracking {
                tempo_bpm: 120.0,
                beats: BeatGrid::new(self.beats.clone())?,
            })
        }
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl AnalysisObserver for Recorder {
        fn on_features(&self, stream: Stream, kind: FeatureKind, _matrix: &FeatureMatrix) {
            self.calls.lock().unwrap().push(format!("features:{stream}.{kind}"));
        }

        fn on_synced(&self, stream: Stream, kind: FeatureKind, matrix: &FeatureMatrix) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("synced:{stream}.{kind}:{}", matrix.cols()));
        }
    }

    fn orchestrator(source: StubSource) -> PipelineOrchestrator<StubSource> {
        PipelineOrchestrator::with_source(source, &AppConfig::default()).unwrap()
    }

    fn track() -> AudioTrack {
        AudioTrack::new(vec![0.0; 2 * SR as usize], SR).unwrap()
    }

    #[test]
    fn onsets_become_scaled_transients() {
        let pipeline = orchestrator(StubSource::new(vec![0.25, 1.0], vec![0.5, 1.5]));
        let output = pipeline.process(&track()).unwrap();

        assert_eq!(
            output.document.events(),
            &[
                HapticEvent::Transient {
                    timestamp: 0.25,
                    intensity: 0.5,
                    sharpness: 0.5,
                },
                HapticEvent::Transient {
                    timestamp: 1.0,
                    intensity: 0.5,
                    sharpness: 0.5,
                },
            ]
        );
        assert_eq!(output.tempo_bpm, 120.0);
    }

    #[test]
    fn synced_features_have_one_column_per_beat_interval() {
        let pipeline = orchestrator(StubSource::new(vec![], vec![0.5, 1.0, 1.5]));
        let output = pipeline.process(&track()).unwrap();

        assert_eq!(output.mfcc_synced.rows(), 39);
        assert_eq!(output.mfcc_synced.cols(), 4);
        for chroma in [
            &output.chroma_synced.original,
            &output.chroma_synced.harmonic,
            &output.chroma_synced.percussive,
        ] {
            assert_eq!(chroma.rows(), 12);
            assert_eq!(chroma.cols(), 4);
        }
        // Stub chroma values equal the frame index; median of [0, 50) is 24.5.
        assert_eq!(output.chroma_synced.original.get(0, 0), 24.5);
    }

    #[test]
    fn observer_sees_every_stream() {
        let recorder = Arc::new(Recorder::default());
        let pipeline = orchestrator(StubSource::new(vec![0.1], vec![1.0]))
            .with_observer(recorder.clone());
        pipeline.process(&track()).unwrap();

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.iter().filter(|c| c.starts_with("features:")).count(), 9);
        assert!(calls.contains(&"features:percussive.mfcc".to_string()));
        assert!(calls.contains(&"synced:original.mfcc:2".to_string()));
        assert!(calls.contains(&"synced:harmonic.chroma:2".to_string()));
    }

    #[test]
    fn failures_abort_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("song.ahap");
        let mut source = StubSource::new(vec![0.1], vec![1.0]);
        source.fail_beats = true;

        let err = orchestrator(source)
            .run_to(dir.path().join("song.wav"), &output)
            .unwrap_err();
        assert!(format!("{err}").contains("exploded"));
        assert!(!output.exists());
    }

    #[test]
    fn run_writes_next_to_the_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("track.mp3");
        let pipeline = orchestrator(StubSource::new(vec![0.5], vec![]));

        let written = pipeline.run(&input).unwrap();
        assert_eq!(written, dir.path().join("track.ahap"));
        let loaded = HapticPatternDocument::load(&written).unwrap();
        assert_eq!(loaded.transient_count(), 1);
        assert_eq!(loaded.metadata().project, "Basis");
    }

    #[test]
    fn batch_keeps_going_after_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("a.wav");
        let bad = dir.path().join("missing").join("b.wav");
        let pipeline = orchestrator(StubSource::new(vec![], vec![]));

        let results = pipeline.run_batch([&bad, &good]);
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0].1, Err(HapticError::IoWrite { .. })));
        assert_eq!(results[1].1.as_ref().unwrap(), &dir.path().join("a.ahap"));
    }

    #[test]
    fn output_path_replaces_only_the_last_extension() {
        assert_eq!(
            output_path_for(Path::new("music/live.set.flac"), "ahap"),
            PathBuf::from("music/live.set.ahap")
        );
        assert_eq!(
            output_path_for(Path::new("noext"), "ahap"),
            PathBuf::from("noext.ahap")
        );
    }
}
