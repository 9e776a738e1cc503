use std::f64::consts::PI;

use crate::FeatureMatrix;

/// Window length of the delta regression.
const DELTA_WIDTH: usize = 9;

/// Orthonormal DCT-II along the row axis, keeping the first `n_coeffs` rows.
pub fn dct(log_mel: &FeatureMatrix, n_coeffs: usize) -> FeatureMatrix {
    let n = log_mel.rows();
    let mut out = FeatureMatrix::zeros(n_coeffs, log_mel.cols());

    let basis: Vec<Vec<f64>> = (0..n_coeffs)
        .map(|k| {
            let scale = if k == 0 {
                (1.0 / n as f64).sqrt()
            } else {
                (2.0 / n as f64).sqrt()
            };
            (0..n)
                .map(|i| scale * (PI * k as f64 * (2 * i + 1) as f64 / (2 * n) as f64).cos())
                .collect()
        })
        .collect();

    for frame in 0..log_mel.cols() {
        for (k, row) in basis.iter().enumerate() {
            let sum: f64 = row
                .iter()
                .enumerate()
                .map(|(i, b)| b * f64::from(log_mel.get(i, frame)))
                .sum();
            out.set(k, frame, sum as f32);
        }
    }
    out
}

/// Local polynomial derivative of every row along the frame axis.
///
/// `order` 1 fits a line and returns its slope, `order` 2 fits a parabola
/// and returns its curvature. Near the edges the fit window is shifted
/// inwards rather than padded. Rows shorter than three frames yield zeros.
pub fn delta(features: &FeatureMatrix, order: usize) -> FeatureMatrix {
    let frames = features.cols();
    let mut out = FeatureMatrix::zeros(features.rows(), frames);
    if frames < 3 {
        return out;
    }

    let mut width = DELTA_WIDTH.min(frames);
    if width % 2 == 0 {
        width -= 1;
    }
    let half = (width / 2) as isize;
    let weights = derivative_weights(half, order);

    for row in 0..features.rows() {
        let series = features.row(row);
        for t in 0..frames {
            let start = t.saturating_sub(half as usize).min(frames - width);
            let value: f64 = weights
                .iter()
                .zip(&series[start..start + width])
                .map(|(w, x)| w * f64::from(*x))
                .sum();
            out.set(row, t, value as f32);
        }
    }
    out
}

/// Least-squares weights for offsets `-half..=half`.
fn derivative_weights(half: isize, order: usize) -> Vec<f64> {
    let offsets: Vec<f64> = (-half..=half).map(|j| j as f64).collect();
    let n = offsets.len() as f64;

    if order <= 1 {
        let denom: f64 = offsets.iter().map(|j| j * j).sum();
        return offsets.iter().map(|j| j / denom).collect();
    }

    let mean_sq = offsets.iter().map(|j| j * j).sum::<f64>() / n;
    let centred: Vec<f64> = offsets.iter().map(|j| j * j - mean_sq).collect();
    let denom: f64 = centred.iter().map(|c| c * c).sum();
    centred.iter().map(|c| 2.0 * c / denom).collect()
}
