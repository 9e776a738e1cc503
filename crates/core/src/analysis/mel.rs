use crate::FeatureMatrix;

const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4_f64.ln() / 27.0
}

/// Slaney mel scale: linear below 1 kHz, logarithmic above.
pub fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

pub fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Triangular, area-normalised filters covering 0 Hz to Nyquist.
/// Shape is (n_mels x n_fft/2+1).
pub fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize) -> FeatureMatrix {
    let bins = n_fft / 2 + 1;
    let nyquist = f64::from(sample_rate) / 2.0;
    let max_mel = hz_to_mel(nyquist);

    let edges: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(max_mel * i as f64 / (n_mels + 1) as f64))
        .collect();
    let bin_hz = f64::from(sample_rate) / n_fft as f64;

    let mut weights = FeatureMatrix::zeros(n_mels, bins);
    for m in 0..n_mels {
        let (lo, centre, hi) = (edges[m], edges[m + 1], edges[m + 2]);
        let enorm = 2.0 / (hi - lo);
        for bin in 0..bins {
            let f = bin as f64 * bin_hz;
            let lower = (f - lo) / (centre - lo);
            let upper = (hi - f) / (hi - centre);
            let w = lower.min(upper).max(0.0);
            if w > 0.0 {
                weights.set(m, bin, (w * enorm) as f32);
            }
        }
    }
    weights
}

/// Converts a power spectrogram to decibels relative to `reference`,
/// flooring at `top_db` below the loudest cell.
pub fn power_to_db(power: &FeatureMatrix, reference: f32, top_db: Option<f32>) -> FeatureMatrix {
    const AMIN: f32 = 1e-10;
    let ref_db = 10.0 * reference.max(AMIN).log10();

    let mut db = power.map(|value| 10.0 * value.max(AMIN).log10() - ref_db);
    if let Some(top_db) = top_db {
        let peak = db.values().iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let floor = peak - top_db;
        db = db.map(|value| value.max(floor));
    }
    db
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mel_scale_round_trips() {
        for hz in [0.0, 440.0, 999.0, 1000.0, 4000.0, 11_025.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
        assert!((hz_to_mel(1000.0) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn filterbank_has_requested_shape() {
        let bank = mel_filterbank(22_050, 2048, 128);
        assert_eq!(bank.rows(), 128);
        assert_eq!(bank.cols(), 1025);
        assert!(bank.values().iter().all(|w| *w >= 0.0));
        for m in 0..128 {
            assert!(bank.row(m).iter().any(|w| *w > 0.0), "empty filter {m}");
        }
    }

    #[test]
    fn power_to_db_clips_dynamic_range() {
        let power = FeatureMatrix::from_rows(vec![vec![1.0, 1e-12, 0.1]]).unwrap();
        let db = power_to_db(&power, 1.0, Some(80.0));
        assert!((db.get(0, 0) - 0.0).abs() < 1e-5);
        assert!((db.get(0, 1) + 80.0).abs() < 1e-5);
        assert!((db.get(0, 2) + 10.0).abs() < 1e-4);
    }
}
