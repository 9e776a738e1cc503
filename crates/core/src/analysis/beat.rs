//! Tempo estimation and dynamic-programming beat tracking over an onset
//! strength envelope.

const MIN_BPM: f32 = 30.0;
const MAX_BPM: f32 = 300.0;
/// Width of the log-normal tempo prior, in octaves.
const PRIOR_STD_OCTAVES: f32 = 1.0;
/// How strongly the tracker penalises deviations from the beat period.
const TIGHTNESS: f32 = 100.0;

/// Frame-rate information needed to convert between lags and BPM.
#[derive(Debug, Clone, Copy)]
pub struct FrameRate {
    pub sample_rate: u32,
    pub hop_length: usize,
}

impl FrameRate {
    pub fn frames_per_second(&self) -> f32 {
        self.sample_rate as f32 / self.hop_length as f32
    }

    pub fn frame_to_time(&self, frame: usize) -> f64 {
        frame as f64 * self.hop_length as f64 / f64::from(self.sample_rate)
    }
}

/// Estimates the tempo by autocorrelating the envelope and weighting every
/// lag with a prior centred on `start_bpm`. Returns `None` for an envelope
/// without energy or too short to hold a single beat period.
pub fn estimate_tempo(envelope: &[f32], rate: FrameRate, start_bpm: f32) -> Option<f32> {
    if envelope.iter().all(|v| *v <= f32::EPSILON) {
        return None;
    }

    let fps = rate.frames_per_second();
    let min_lag = ((60.0 * fps / MAX_BPM).floor() as usize).max(1);
    let max_lag = ((60.0 * fps / MIN_BPM).ceil() as usize).min(envelope.len().saturating_sub(1));
    if min_lag > max_lag {
        return None;
    }

    let mean = envelope.iter().sum::<f32>() / envelope.len() as f32;
    let centred: Vec<f32> = envelope.iter().map(|v| v - mean).collect();

    let mut best: Option<(usize, f32)> = None;
    for lag in min_lag..=max_lag {
        let ac: f32 = centred[lag..]
            .iter()
            .zip(&centred)
            .map(|(a, b)| a * b)
            .sum();
        if ac <= 0.0 {
            continue;
        }
        let bpm = 60.0 * fps / lag as f32;
        let octaves = (bpm / start_bpm).log2() / PRIOR_STD_OCTAVES;
        let score = ac * (-0.5 * octaves * octaves).exp();
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((lag, score));
        }
    }

    best.map(|(lag, _)| 60.0 * fps / lag as f32)
}

/// Places beats on the envelope with the given tempo. Returns beat frames
/// in ascending order; weak leading and trailing beats are trimmed.
pub fn track_beats(envelope: &[f32], rate: FrameRate, bpm: f32) -> Vec<usize> {
    let len = envelope.len();
    if len == 0 || !(bpm > 0.0) {
        return Vec::new();
    }

    let period = (60.0 * rate.frames_per_second() / bpm).round().max(1.0) as usize;
    let local = local_score(envelope, period);

    let mut cumulative = vec![0.0_f32; len];
    let mut backlink: Vec<Option<usize>> = vec![None; len];
    for t in 0..len {
        let lo = t.saturating_sub(2 * period);
        let hi = t.saturating_sub((period / 2).max(1));
        let mut best: Option<(usize, f32)> = None;
        if t >= (period / 2).max(1) {
            for prev in lo..=hi {
                let ratio = (t - prev) as f32 / period as f32;
                let score = cumulative[prev] - TIGHTNESS * ratio.ln().powi(2);
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((prev, score));
                }
            }
        }

        match best {
            Some((prev, score)) if score > 0.0 => {
                cumulative[t] = local[t] + score;
                backlink[t] = Some(prev);
            }
            _ => cumulative[t] = local[t],
        }
    }

    let Some(mut beat) = last_beat(&cumulative) else {
        return Vec::new();
    };
    let mut beats = vec![beat];
    while let Some(prev) = backlink[beat] {
        beats.push(prev);
        beat = prev;
    }
    beats.reverse();

    trim_weak_beats(beats, &local)
}

/// Envelope normalised by its standard deviation and smoothed with a
/// Gaussian one beat period wide.
fn local_score(envelope: &[f32], period: usize) -> Vec<f32> {
    let len = envelope.len();
    let mean = envelope.iter().sum::<f32>() / len as f32;
    let variance = envelope.iter().map(|v| (v - mean).powi(2)).sum::<f32>()
        / (len.saturating_sub(1).max(1)) as f32;
    let std = variance.sqrt();
    let normalised: Vec<f32> = if std > f32::EPSILON {
        envelope.iter().map(|v| v / std).collect()
    } else {
        envelope.to_vec()
    };

    let radius = period as isize;
    let kernel: Vec<f32> = (-radius..=radius)
        .map(|j| (-0.5 * (j as f32 * 32.0 / period as f32).powi(2)).exp())
        .collect();

    (0..len)
        .map(|t| {
            kernel
                .iter()
                .enumerate()
                .filter_map(|(k, w)| {
                    let idx = t as isize + k as isize - radius;
                    (0..len as isize)
                        .contains(&idx)
                        .then(|| w * normalised[idx as usize])
                })
                .sum()
        })
        .collect()
}

/// Last local maximum of the cumulative score that reaches half the median
/// of all local maxima.
fn last_beat(cumulative: &[f32]) -> Option<usize> {
    let len = cumulative.len();
    let is_peak = |t: usize| {
        let left = if t == 0 { f32::NEG_INFINITY } else { cumulative[t - 1] };
        let right = if t + 1 == len { f32::NEG_INFINITY } else { cumulative[t + 1] };
        cumulative[t] > left && cumulative[t] >= right
    };

    let mut peaks: Vec<f32> = (0..len).filter(|&t| is_peak(t)).map(|t| cumulative[t]).collect();
    if peaks.is_empty() {
        return None;
    }
    peaks.sort_by(|a, b| a.total_cmp(b));
    let threshold = 0.5 * peaks[peaks.len() / 2];

    (0..len).rev().find(|&t| is_peak(t) && cumulative[t] >= threshold)
}

fn trim_weak_beats(beats: Vec<usize>, local: &[f32]) -> Vec<usize> {
    if beats.is_empty() {
        return beats;
    }
    let rms = (beats.iter().map(|&b| local[b].powi(2)).sum::<f32>() / beats.len() as f32).sqrt();
    let threshold = 0.5 * rms;

    let start = beats.iter().position(|&b| local[b] > threshold);
    let end = beats.iter().rposition(|&b| local[b] > threshold);
    match (start, end) {
        (Some(start), Some(end)) => beats[start..=end].to_vec(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: FrameRate = FrameRate {
        sample_rate: 22_050,
        hop_length: 512,
    };

    /// Impulses every `period` frames starting at `offset`.
    fn pulse_train(len: usize, period: usize, offset: usize) -> Vec<f32> {
        (0..len)
            .map(|t| if t >= offset && (t - offset) % period == 0 { 1.0 } else { 0.0 })
            .collect()
    }

    #[test]
    fn silent_envelope_has_no_tempo() {
        assert_eq!(estimate_tempo(&[0.0; 500], RATE, 120.0), None);
    }

    #[test]
    fn finds_tempo_of_regular_pulses() {
        // ~43 frames/second, so a 21 frame period is ~123 BPM.
        let envelope = pulse_train(860, 21, 3);
        let bpm = estimate_tempo(&envelope, RATE, 120.0).unwrap();
        let expected = 60.0 * RATE.frames_per_second() / 21.0;
        assert!((bpm - expected).abs() < 1.0, "got {bpm}, expected {expected}");
    }

    #[test]
    fn beats_follow_the_pulses() {
        let envelope = pulse_train(430, 21, 3);
        let bpm = 60.0 * RATE.frames_per_second() / 21.0;
        let beats = track_beats(&envelope, RATE, bpm);

        assert!(beats.len() > 15, "only {} beats", beats.len());
        assert!(beats.windows(2).all(|w| w[0] < w[1]));
        for beat in &beats {
            assert_eq!((beat - 3) % 21, 0, "beat {beat} off the grid");
        }
    }

    #[test]
    fn empty_input_yields_no_beats() {
        assert!(track_beats(&[], RATE, 120.0).is_empty());
        assert!(track_beats(&[1.0; 10], RATE, 0.0).is_empty());
    }

    #[test]
    fn frame_to_time_uses_hop() {
        assert!((RATE.frame_to_time(43) - 43.0 * 512.0 / 22_050.0).abs() < 1e-12);
    }
}
