//! Frame-indexed acoustic features and the [`FeatureSource`] contract the
//! pipeline consumes them through.

pub mod beat;
pub mod chroma;
pub mod hpss;
pub mod mel;
pub mod mfcc;
pub mod onset;
pub mod stft;

use std::{fmt, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    audio::{self, AudioTrack},
    config::AnalysisConfig,
    sync::{Aggregate, BeatGrid},
    HapticError, Result,
};

use self::{beat::FrameRate, onset::PeakPicking, stft::Stft};

/// Rows of a stacked MFCC matrix per cepstral coefficient (value, delta, delta-delta).
pub const MFCC_STACK: usize = 3;

/// Dense (rows x cols) grid: rows are feature dimensions, columns are
/// analysis frames spaced one hop apart. Stored row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl FeatureMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Builds a matrix from row-major `data`.
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(HapticError::InvalidFeatureMatrix(format!(
                "{} values cannot fill a {rows}x{cols} matrix",
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Builds a matrix from equally long rows.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        if let Some(bad) = rows.iter().position(|row| row.len() != cols) {
            return Err(HapticError::InvalidFeatureMatrix(format!(
                "row {bad} has {} columns, expected {cols}",
                rows[bad].len()
            )));
        }
        let count = rows.len();
        Ok(Self {
            rows: count,
            cols,
            data: rows.into_iter().flatten().collect(),
        })
    }

    /// Stacks matrices with equal column counts on top of each other.
    pub fn vstack(parts: &[&FeatureMatrix]) -> Result<Self> {
        let cols = parts.first().map(|m| m.cols).unwrap_or(0);
        if parts.iter().any(|m| m.cols != cols) {
            return Err(HapticError::InvalidFeatureMatrix(
                "stacked matrices must share a column count".into(),
            ));
        }
        Ok(Self {
            rows: parts.iter().map(|m| m.rows).sum(),
            cols,
            data: parts.iter().flat_map(|m| m.data.iter().copied()).collect(),
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.data[row * self.cols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[f32] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn column(&self, col: usize) -> Vec<f32> {
        (0..self.rows).map(|row| self.get(row, col)).collect()
    }

    pub fn values(&self) -> &[f32] {
        &self.data
    }

    pub fn map(&self, f: impl Fn(f32) -> f32) -> Self {
        Self {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|v| f(*v)).collect(),
        }
    }

    /// `self (r x k) * rhs (k x c)`.
    pub fn matmul(&self, rhs: &FeatureMatrix) -> Result<Self> {
        if self.cols != rhs.rows {
            return Err(HapticError::InvalidFeatureMatrix(format!(
                "cannot multiply {}x{} by {}x{}",
                self.rows, self.cols, rhs.rows, rhs.cols
            )));
        }
        let mut out = FeatureMatrix::zeros(self.rows, rhs.cols);
        for r in 0..self.rows {
            for (k, weight) in self.row(r).iter().enumerate() {
                if *weight == 0.0 {
                    continue;
                }
                for (c, value) in rhs.row(k).iter().enumerate() {
                    out.data[r * rhs.cols + c] += weight * value;
                }
            }
        }
        Ok(out)
    }
}

/// The feature families the pipeline extracts, each with a fixed height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureKind {
    Mel,
    Chroma,
    Mfcc,
}

impl FeatureKind {
    pub fn rows(self, config: &AnalysisConfig) -> usize {
        match self {
            FeatureKind::Mel => config.n_mels,
            FeatureKind::Chroma => chroma::PITCH_CLASSES,
            FeatureKind::Mfcc => config.n_mfcc * MFCC_STACK,
        }
    }

    /// Aggregation used when synchronising this feature to beats. Pitch
    /// class energy is spiky, so chroma takes the median.
    pub fn aggregate(self) -> Aggregate {
        match self {
            FeatureKind::Chroma => Aggregate::Median,
            FeatureKind::Mel | FeatureKind::Mfcc => Aggregate::Mean,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FeatureKind::Mel => "mel",
            FeatureKind::Chroma => "chroma",
            FeatureKind::Mfcc => "mfcc",
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of onset detection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OnsetDetection {
    /// Onset times in seconds, ascending.
    pub timestamps: Vec<f64>,
    /// Frame index of every onset, parallel to `timestamps`.
    pub frames: Vec<usize>,
    /// Onset strength per analysis frame.
    pub envelope: Vec<f32>,
}

impl OnsetDetection {
    /// Strength envelope sampled at every onset frame, so the result pairs
    /// index-for-index with `timestamps`.
    pub fn strengths(&self) -> Vec<f64> {
        self.frames
            .iter()
            .map(|&frame| self.envelope.get(frame).copied().map(f64::from).unwrap_or(0.0))
            .collect()
    }
}

/// Result of beat tracking.
#[derive(Debug, Clone, Default)]
pub struct BeatTracking {
    /// Estimated tempo; 0 when no pulse was found.
    pub tempo_bpm: f32,
    pub beats: BeatGrid,
}

/// Supplier of decoded audio and frame-level features.
pub trait FeatureSource {
    /// Hop between consecutive feature frames, in samples.
    fn hop_length(&self) -> usize;

    fn decode(&self, path: &Path) -> Result<AudioTrack>;

    /// Returns `(harmonic, percussive)` at the input's sample rate and length.
    fn harmonic_percussive_split(&self, track: &AudioTrack) -> Result<(AudioTrack, AudioTrack)>;

    fn mel_spectrogram(&self, track: &AudioTrack) -> Result<FeatureMatrix>;

    fn chromagram(&self, track: &AudioTrack) -> Result<FeatureMatrix>;

    /// Cepstral coefficients stacked with their first and second deltas.
    fn mfcc(&self, mel_spectrogram: &FeatureMatrix, sample_rate: u32) -> Result<FeatureMatrix>;

    fn detect_onsets(&self, track: &AudioTrack) -> Result<OnsetDetection>;

    fn detect_beats(&self, percussive: &AudioTrack) -> Result<BeatTracking>;
}

/// [`FeatureSource`] built on an in-crate STFT.
#[derive(Debug)]
pub struct SpectralFeatureSource {
    config: AnalysisConfig,
    stft: Stft,
}

impl SpectralFeatureSource {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        let stft = Stft::new(config.n_fft, config.hop_length);
        Ok(Self { config, stft })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    fn frame_rate(&self, sample_rate: u32) -> FrameRate {
        FrameRate {
            sample_rate,
            hop_length: self.config.hop_length,
        }
    }

    fn power_spectrogram(&self, track: &AudioTrack) -> Result<FeatureMatrix> {
        Ok(self.stft.forward(track.samples())?.magnitude(2))
    }

    fn onset_envelope(&self, track: &AudioTrack) -> Result<Vec<f32>> {
        let mel = self.mel_spectrogram(track)?;
        let log_mel = mel::power_to_db(&mel, 1.0, Some(80.0));
        Ok(onset::onset_strength(&log_mel))
    }
}

impl FeatureSource for SpectralFeatureSource {
    fn hop_length(&self) -> usize {
        self.config.hop_length
    }

    fn decode(&self, path: &Path) -> Result<AudioTrack> {
        audio::decode_file(path, self.config.target_sample_rate)
    }

    fn harmonic_percussive_split(&self, track: &AudioTrack) -> Result<(AudioTrack, AudioTrack)> {
        let (harmonic, percussive) = hpss::split(&self.stft, track.samples(), self.config.hpss_kernel)?;
        Ok((
            AudioTrack::new(harmonic, track.sample_rate())?,
            AudioTrack::new(percussive, track.sample_rate())?,
        ))
    }

    fn mel_spectrogram(&self, track: &AudioTrack) -> Result<FeatureMatrix> {
        let filters = mel::mel_filterbank(track.sample_rate(), self.config.n_fft, self.config.n_mels);
        filters.matmul(&self.power_spectrogram(track)?)
    }

    fn chromagram(&self, track: &AudioTrack) -> Result<FeatureMatrix> {
        let mapping = chroma::pitch_class_map(track.sample_rate(), self.config.n_fft);
        Ok(chroma::chroma_from_power(&self.power_spectrogram(track)?, &mapping))
    }

    fn mfcc(&self, mel_spectrogram: &FeatureMatrix, _sample_rate: u32) -> Result<FeatureMatrix> {
        if mel_spectrogram.cols() == 0 {
            return Err(HapticError::InvalidFeatureMatrix(
                "mel spectrogram has no frames".into(),
            ));
        }
        let peak = mel_spectrogram.values().iter().copied().fold(0.0_f32, f32::max);
        let log_mel = mel::power_to_db(mel_spectrogram, peak, Some(80.0));
        let coeffs = mfcc::dct(&log_mel, self.config.n_mfcc);
        let first = mfcc::delta(&coeffs, 1);
        let second = mfcc::delta(&coeffs, 2);
        FeatureMatrix::vstack(&[&coeffs, &first, &second])
    }

    fn detect_onsets(&self, track: &AudioTrack) -> Result<OnsetDetection> {
        let envelope = self.onset_envelope(track)?;
        let params = PeakPicking::for_rate(
            track.sample_rate(),
            self.config.hop_length,
            self.config.onset_wait,
            self.config.onset_delta,
        );
        let frames = onset::pick_peaks(&envelope, &params);
        let rate = self.frame_rate(track.sample_rate());
        let timestamps = frames.iter().map(|&f| rate.frame_to_time(f)).collect();

        Ok(OnsetDetection {
            timestamps,
            frames,
            envelope,
        })
    }

    fn detect_beats(&self, percussive: &AudioTrack) -> Result<BeatTracking> {
        let envelope = self.onset_envelope(percussive)?;
        let rate = self.frame_rate(percussive.sample_rate());

        let Some(tempo_bpm) = beat::estimate_tempo(&envelope, rate, self.config.start_bpm) else {
            return Ok(BeatTracking::default());
        };
        let times: Vec<f64> = beat::track_beats(&envelope, rate, tempo_bpm)
            .into_iter()
            .map(|frame| rate.frame_to_time(frame))
            .collect();

        Ok(BeatTracking {
            tempo_bpm,
            beats: BeatGrid::new(times)?,
        })
    }
}
