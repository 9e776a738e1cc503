//! Spectral-flux onset strength and peak picking.

use crate::FeatureMatrix;

/// Peak picking windows, in frames.
#[derive(Debug, Clone, Copy)]
pub struct PeakPicking {
    pub pre_max: usize,
    pub post_max: usize,
    pub pre_avg: usize,
    pub post_avg: usize,
    pub wait: usize,
    pub delta: f32,
}

impl PeakPicking {
    /// Windows of 30 ms (max) and 100 ms (average) around each candidate.
    pub fn for_rate(sample_rate: u32, hop_length: usize, wait: usize, delta: f32) -> Self {
        let frames = |seconds: f32| (seconds * sample_rate as f32 / hop_length as f32) as usize;
        Self {
            pre_max: frames(0.03),
            post_max: 1,
            pre_avg: frames(0.10),
            post_avg: frames(0.10) + 1,
            wait,
            delta,
        }
    }
}

/// Mean positive first difference of a dB mel spectrogram across bands.
/// The first frame has no predecessor and is 0.
pub fn onset_strength(log_mel: &FeatureMatrix) -> Vec<f32> {
    let frames = log_mel.cols();
    let bands = log_mel.rows().max(1) as f32;
    let mut envelope = vec![0.0_f32; frames];

    for t in 1..frames {
        let flux: f32 = (0..log_mel.rows())
            .map(|band| (log_mel.get(band, t) - log_mel.get(band, t - 1)).max(0.0))
            .sum();
        envelope[t] = flux / bands;
    }
    envelope
}

/// Returns the frames of local maxima that clear the local mean by
/// `delta` after min/max normalisation. A flat envelope has no peaks.
pub fn pick_peaks(envelope: &[f32], params: &PeakPicking) -> Vec<usize> {
    let (min, max) = envelope
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    let range = max - min;
    if envelope.is_empty() || !(range > f32::EPSILON) {
        return Vec::new();
    }

    let norm: Vec<f32> = envelope.iter().map(|v| (v - min) / range).collect();
    let len = norm.len();
    let mut peaks = Vec::new();
    let mut last: Option<usize> = None;

    for n in 0..len {
        let max_lo = n.saturating_sub(params.pre_max);
        let max_hi = (n + params.post_max).min(len);
        let local_max = norm[max_lo..max_hi].iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if norm[n] < local_max {
            continue;
        }

        let avg_lo = n.saturating_sub(params.pre_avg);
        let avg_hi = (n + params.post_avg).min(len);
        let window = &norm[avg_lo..avg_hi];
        let local_mean = window.iter().sum::<f32>() / window.len() as f32;
        if norm[n] < local_mean + params.delta {
            continue;
        }

        if last.map_or(true, |prev| n > prev + params.wait) {
            peaks.push(n);
            last = Some(n);
        }
    }
    peaks
}
