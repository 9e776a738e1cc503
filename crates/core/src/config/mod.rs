use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{HapticError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub analysis: AnalysisConfig,
    pub haptics: HapticsConfig,
    pub document: DocumentConfig,
    /// Extension that replaces the input file's extension on output.
    pub output_extension: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            analysis: AnalysisConfig::default(),
            haptics: HapticsConfig::default(),
            document: DocumentConfig::default(),
            output_extension: "ahap".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads a JSON configuration file. Missing fields keep their defaults.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|err| HapticError::Config(format!("{}: {err}", path.display())))?;
        config.validate()?;
        tracing::debug!(?path, "loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.analysis.validate()?;
        if !(self.haptics.strength_scale.is_finite() && self.haptics.strength_scale > 0.0) {
            return Err(HapticError::Config(format!(
                "haptics.strength_scale must be positive, got {}",
                self.haptics.strength_scale
            )));
        }
        if self.output_extension.is_empty() || self.output_extension.contains('.') {
            return Err(HapticError::Config(format!(
                "output_extension `{}` must be a bare extension",
                self.output_extension
            )));
        }
        Ok(())
    }
}

/// Parameters of the spectral feature extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Rate every decoded track is resampled to.
    pub target_sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub n_mfcc: usize,
    /// Median filter length (in bins/frames) of the harmonic/percussive split.
    pub hpss_kernel: usize,
    /// Minimum number of frames between two onsets.
    pub onset_wait: usize,
    /// Threshold above the local mean an onset peak has to clear.
    pub onset_delta: f32,
    /// Centre of the tempo prior in beats per minute.
    pub start_bpm: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 22_050,
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            n_mfcc: 13,
            hpss_kernel: 31,
            onset_wait: 1,
            onset_delta: 0.07,
            start_bpm: 120.0,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("target_sample_rate", self.target_sample_rate as usize),
            ("n_fft", self.n_fft),
            ("hop_length", self.hop_length),
            ("n_mels", self.n_mels),
            ("n_mfcc", self.n_mfcc),
            ("hpss_kernel", self.hpss_kernel),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(HapticError::Config(format!("analysis.{name} must be non-zero")));
            }
        }
        if self.n_mfcc > self.n_mels {
            return Err(HapticError::Config(format!(
                "analysis.n_mfcc ({}) cannot exceed analysis.n_mels ({})",
                self.n_mfcc, self.n_mels
            )));
        }
        if !(self.start_bpm.is_finite() && self.start_bpm > 0.0) {
            return Err(HapticError::Config("analysis.start_bpm must be positive".into()));
        }
        Ok(())
    }
}

/// Settings for the onset to haptic event mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HapticsConfig {
    /// Onset strengths are divided by this before becoming intensity/sharpness.
    pub strength_scale: f32,
}

impl Default for HapticsConfig {
    fn default() -> Self {
        Self {
            strength_scale: 5.0,
        }
    }
}

/// Metadata written into every generated pattern document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    pub project: String,
    pub description: String,
    pub author: String,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            project: "Basis".to_string(),
            description: "Generated AHAP file from audio analysis.".to_string(),
            author: "Audio Haptics".to_string(),
        }
    }
}
