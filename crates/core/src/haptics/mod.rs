use serde::{Deserialize, Serialize};

use crate::{HapticError, Result};

/// Onset strengths are divided by this to obtain intensity and sharpness.
pub const DEFAULT_STRENGTH_SCALE: f64 = 5.0;

/// A single entry of a haptic pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum HapticEvent {
    /// Short pulse.
    Transient {
        timestamp: f64,
        intensity: f64,
        sharpness: f64,
    },
    /// Sustained vibration.
    Continuous {
        timestamp: f64,
        duration: f64,
        intensity: f64,
        sharpness: f64,
    },
    /// Plays a custom waveform file.
    AudioCustom {
        timestamp: f64,
        waveform: String,
        volume: f64,
    },
    /// Modulates a parameter over time.
    ControlCurve(ControlCurve),
}

impl HapticEvent {
    /// Time the entry starts at.
    pub fn timestamp(&self) -> f64 {
        match self {
            HapticEvent::Transient { timestamp, .. }
            | HapticEvent::Continuous { timestamp, .. }
            | HapticEvent::AudioCustom { timestamp, .. } => *timestamp,
            HapticEvent::ControlCurve(curve) => curve.start_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlCurve {
    pub parameter_id: String,
    pub start_time: f64,
    pub points: Vec<ControlPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ControlPoint {
    pub time: f64,
    #[serde(rename = "ParameterValue")]
    pub value: f64,
}

impl ControlPoint {
    pub fn new(time: f64, value: f64) -> Self {
        Self { time, value }
    }
}

/// Turns detected onsets into transient events.
///
/// Both intensity and sharpness are `strength / scale`; values are handed
/// over as-is and clamped by the pattern document on insertion.
#[derive(Debug, Clone, Copy)]
pub struct HapticEventSynthesizer {
    strength_scale: f64,
}

impl Default for HapticEventSynthesizer {
    fn default() -> Self {
        Self {
            strength_scale: DEFAULT_STRENGTH_SCALE,
        }
    }
}

impl HapticEventSynthesizer {
    pub fn new(strength_scale: f64) -> Self {
        Self { strength_scale }
    }

    pub fn strength_scale(&self) -> f64 {
        self.strength_scale
    }

    /// Pairs `timestamps[i]` with `strengths[i]`. Output order follows the
    /// input; close onsets are neither merged nor dropped.
    pub fn synthesize(&self, timestamps: &[f64], strengths: &[f64]) -> Result<Vec<HapticEvent>> {
        if timestamps.len() != strengths.len() {
            return Err(HapticError::MismatchedOnsetArrays {
                timestamps: timestamps.len(),
                strengths: strengths.len(),
            });
        }

        Ok(timestamps
            .iter()
            .zip(strengths)
            .map(|(&timestamp, &strength)| {
                let level = strength / self.strength_scale;
                HapticEvent::Transient {
                    timestamp,
                    intensity: level,
                    sharpness: level,
                }
            })
            .collect())
    }
}
