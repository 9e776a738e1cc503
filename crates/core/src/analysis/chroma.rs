use crate::FeatureMatrix;

/// Reference frequency for A4.
const A4_FREQ: f64 = 440.0;
/// C1; bins below carry too little pitch resolution to be useful.
const MIN_FREQ: f64 = 32.7;

pub const PITCH_CLASSES: usize = 12;

/// Maps every STFT bin to the nearest pitch class (0 = C), or `None` when the
/// bin lies outside the musical range.
pub fn pitch_class_map(sample_rate: u32, n_fft: usize) -> Vec<Option<usize>> {
    let bin_hz = f64::from(sample_rate) / n_fft as f64;
    let nyquist = f64::from(sample_rate) / 2.0;

    (0..n_fft / 2 + 1)
        .map(|bin| {
            let freq = bin as f64 * bin_hz;
            if freq < MIN_FREQ || freq >= nyquist {
                return None;
            }
            let midi = 12.0 * (freq / A4_FREQ).log2() + 69.0;
            Some((midi.round() as i64).rem_euclid(PITCH_CLASSES as i64) as usize)
        })
        .collect()
}

/// Folds a power spectrogram (bins x frames) onto 12 pitch classes. Each
/// frame is normalised so its strongest class is 1.0; silent frames stay 0.
pub fn chroma_from_power(power: &FeatureMatrix, mapping: &[Option<usize>]) -> FeatureMatrix {
    let mut chroma = FeatureMatrix::zeros(PITCH_CLASSES, power.cols());

    for frame in 0..power.cols() {
        let mut column = [0.0_f32; PITCH_CLASSES];
        for (bin, class) in mapping.iter().enumerate().take(power.rows()) {
            if let Some(class) = class {
                column[*class] += power.get(bin, frame);
            }
        }

        let peak = column.iter().copied().fold(0.0_f32, f32::max);
        if peak > f32::MIN_POSITIVE {
            for (class, value) in column.iter().enumerate() {
                chroma.set(class, frame, value / peak);
            }
        }
    }

    chroma
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a440_maps_to_pitch_class_nine() {
        let sample_rate = 22_050;
        let n_fft = 4096;
        let mapping = pitch_class_map(sample_rate, n_fft);
        let bin = (440.0 * n_fft as f64 / f64::from(sample_rate)).round() as usize;
        assert_eq!(mapping[bin], Some(9));
        assert_eq!(mapping[0], None);
    }

    #[test]
    fn columns_are_max_normalised() {
        let mapping = vec![None, Some(0), Some(4), Some(7)];
        let power =
            FeatureMatrix::from_rows(vec![vec![5.0, 0.0], vec![2.0, 0.0], vec![1.0, 0.0], vec![4.0, 0.0]])
                .unwrap();
        let chroma = chroma_from_power(&power, &mapping);

        assert_eq!(chroma.rows(), 12);
        assert_eq!(chroma.get(7, 0), 1.0);
        assert_eq!(chroma.get(0, 0), 0.5);
        assert_eq!(chroma.get(4, 0), 0.25);
        assert!(chroma.column(1).iter().all(|v| *v == 0.0));
    }
}
