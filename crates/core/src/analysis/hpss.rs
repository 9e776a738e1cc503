use crate::{FeatureMatrix, Result};

use super::stft::Stft;

/// Exponent of the soft Wiener masks.
const MASK_POWER: i32 = 2;

/// Splits `samples` into harmonic and percussive components.
///
/// Harmonic content is stable over time, so a median along the frame axis
/// keeps it; percussive content is broadband, so a median along the
/// frequency axis keeps that. The two medians become soft masks over the
/// complex spectrum, which is then inverted back to audio.
pub fn split(stft: &Stft, samples: &[f32], kernel: usize) -> Result<(Vec<f32>, Vec<f32>)> {
    let spectrum = stft.forward(samples)?;
    let magnitude = spectrum.magnitude(1);

    let harmonic = median_filter(&magnitude, kernel, Axis::Frames);
    let percussive = median_filter(&magnitude, kernel, Axis::Bins);
    let (harmonic_mask, percussive_mask) = soft_masks(&harmonic, &percussive);

    let harmonic = stft.inverse(&spectrum.masked(&harmonic_mask), samples.len())?;
    let percussive = stft.inverse(&spectrum.masked(&percussive_mask), samples.len())?;
    Ok((harmonic, percussive))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Bins,
    Frames,
}

fn median_filter(input: &FeatureMatrix, kernel: usize, axis: Axis) -> FeatureMatrix {
    let half = kernel / 2;
    let mut out = FeatureMatrix::zeros(input.rows(), input.cols());
    let mut window = Vec::with_capacity(2 * half + 1);

    for row in 0..input.rows() {
        for col in 0..input.cols() {
            window.clear();
            match axis {
                Axis::Frames => {
                    let lo = col.saturating_sub(half);
                    let hi = (col + half + 1).min(input.cols());
                    window.extend_from_slice(&input.row(row)[lo..hi]);
                }
                Axis::Bins => {
                    let lo = row.saturating_sub(half);
                    let hi = (row + half + 1).min(input.rows());
                    window.extend((lo..hi).map(|r| input.get(r, col)));
                }
            }
            out.set(row, col, median(&mut window));
        }
    }
    out
}

fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mid = values.len() / 2;
    let (_, upper, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    let upper = *upper;
    if values.len() % 2 == 1 {
        upper
    } else {
        let lower = values[..mid].iter().copied().fold(f32::NEG_INFINITY, f32::max);
        0.5 * (lower + upper)
    }
}

/// Wiener-style masks; cells where both references are zero get no energy.
fn soft_masks(harmonic: &FeatureMatrix, percussive: &FeatureMatrix) -> (FeatureMatrix, FeatureMatrix) {
    let mut h_mask = FeatureMatrix::zeros(harmonic.rows(), harmonic.cols());
    let mut p_mask = FeatureMatrix::zeros(harmonic.rows(), harmonic.cols());

    for row in 0..harmonic.rows() {
        for col in 0..harmonic.cols() {
            let h = harmonic.get(row, col).powi(MASK_POWER);
            let p = percussive.get(row, col).powi(MASK_POWER);
            let total = h + p;
            if total > f32::MIN_POSITIVE {
                h_mask.set(row, col, h / total);
                p_mask.set(row, col, p / total);
            }
        }
    }
    (h_mask, p_mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn energy(samples: &[f32]) -> f32 {
        samples.iter().map(|s| s * s).sum()
    }

    #[test]
    fn median_handles_odd_and_even_windows() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&mut []), 0.0);
    }

    #[test]
    fn steady_tone_is_mostly_harmonic() {
        let tone: Vec<f32> = (0..22_050)
            .map(|i| 0.5 * (2.0 * PI * 440.0 * i as f32 / 22_050.0).sin())
            .collect();
        let stft = Stft::new(1024, 256);
        let (harmonic, percussive) = split(&stft, &tone, 17).unwrap();

        assert_eq!(harmonic.len(), tone.len());
        assert_eq!(percussive.len(), tone.len());
        assert!(energy(&harmonic) > 10.0 * energy(&percussive));
    }

    #[test]
    fn clicks_are_mostly_percussive() {
        let mut clicks = vec![0.0_f32; 22_050];
        for start in (1000..22_050).step_by(4000) {
            clicks[start] = 1.0;
        }
        let stft = Stft::new(1024, 256);
        let (harmonic, percussive) = split(&stft, &clicks, 17).unwrap();

        assert!(energy(&percussive) > 10.0 * energy(&harmonic));
    }

    #[test]
    fn silence_splits_into_silence() {
        let stft = Stft::new(512, 128);
        let (harmonic, percussive) = split(&stft, &[0.0; 4096], 17).unwrap();
        assert!(harmonic.iter().chain(&percussive).all(|s| *s == 0.0));
    }
}
