//! Core library for converting audio into haptic patterns.
//!
//! A [`FeatureSource`] decodes a track and extracts frame-level features,
//! the [`BeatSynchronizer`] folds those features onto the beat grid, the
//! [`HapticEventSynthesizer`] turns onsets into transient events and the
//! [`HapticPatternDocument`] collects and persists them.
//! [`PipelineOrchestrator`] runs the whole sequence for one file.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod haptics;
pub mod pattern;
pub mod pipeline;
pub mod sync;

pub use analysis::{
    BeatTracking, FeatureKind, FeatureMatrix, FeatureSource, OnsetDetection, SpectralFeatureSource,
};
pub use audio::AudioTrack;
pub use config::{AnalysisConfig, AppConfig, DocumentConfig, HapticsConfig};
pub use error::{HapticError, Result};
pub use haptics::{ControlCurve, ControlPoint, HapticEvent, HapticEventSynthesizer};
pub use pattern::{HapticPatternDocument, PatternMetadata};
pub use pipeline::{
    output_path_for, AnalysisObserver, NoopObserver, PipelineOrchestrator, PipelineOutput, Stream,
};
pub use sync::{Aggregate, Aggregator, BeatGrid, BeatSynchronizer};
