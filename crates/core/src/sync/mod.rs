//! Beat synchronisation: collapses a feature matrix to one column per beat
//! interval.

use serde::{Deserialize, Serialize};

use crate::{FeatureMatrix, HapticError, Result};

/// Strictly increasing beat times in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeatGrid {
    times: Vec<f64>,
}

impl BeatGrid {
    pub fn new(times: Vec<f64>) -> Result<Self> {
        if let Some(bad) = times.iter().find(|t| !(t.is_finite() && **t >= 0.0)) {
            return Err(HapticError::InvalidTimestamp(*bad));
        }
        if let Some(pair) = times.windows(2).find(|w| w[1] <= w[0]) {
            return Err(HapticError::InvalidTimestamp(pair[1]));
        }
        Ok(Self { times })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Frame index of every beat, `round(t * sr / hop)`, clamped to the
    /// last frame.
    pub fn frame_indices(&self, hop_length: usize, sample_rate: u32, frame_count: usize) -> Vec<usize> {
        let last = frame_count.saturating_sub(1);
        let frames_per_second = f64::from(sample_rate) / hop_length as f64;
        self.times
            .iter()
            .map(|t| ((t * frames_per_second).round() as usize).min(last))
            .collect()
    }
}

/// Reduces the values of one feature row inside one beat segment.
pub trait Aggregator {
    /// `values` is never empty.
    fn aggregate(&self, values: &mut [f32]) -> f32;
}

impl<F> Aggregator for F
where
    F: Fn(&mut [f32]) -> f32,
{
    fn aggregate(&self, values: &mut [f32]) -> f32 {
        self(values)
    }
}

/// Built-in aggregators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregate {
    Mean,
    Median,
}

impl Aggregator for Aggregate {
    fn aggregate(&self, values: &mut [f32]) -> f32 {
        match self {
            Aggregate::Mean => values.iter().sum::<f32>() / values.len() as f32,
            Aggregate::Median => {
                values.sort_unstable_by(|a, b| a.total_cmp(b));
                let mid = values.len() / 2;
                if values.len() % 2 == 1 {
                    values[mid]
                } else {
                    0.5 * (values[mid - 1] + values[mid])
                }
            }
        }
    }
}

/// Aligns frame-level features to a beat grid.
#[derive(Debug, Clone, Copy)]
pub struct BeatSynchronizer {
    hop_length: usize,
    sample_rate: u32,
}

impl BeatSynchronizer {
    pub fn new(hop_length: usize, sample_rate: u32) -> Self {
        Self {
            hop_length,
            sample_rate,
        }
    }

    pub fn sync(
        &self,
        features: &FeatureMatrix,
        beats: &BeatGrid,
        aggregator: &impl Aggregator,
    ) -> Result<FeatureMatrix> {
        sync(features, beats, self.hop_length, self.sample_rate, aggregator)
    }
}

/// Splits the frame axis at every beat and aggregates each segment into a
/// single column.
///
/// Segment boundaries are frame 0, the (sorted, deduplicated) beat frames
/// and the frame count, so `n` beats that land on distinct non-zero frames
/// produce `n + 1` columns. An empty grid aggregates the whole matrix.
pub fn sync(
    features: &FeatureMatrix,
    beats: &BeatGrid,
    hop_length: usize,
    sample_rate: u32,
    aggregator: &impl Aggregator,
) -> Result<FeatureMatrix> {
    let frames = features.cols();
    if frames == 0 {
        return Err(HapticError::InvalidFeatureMatrix(
            "cannot synchronise a matrix without frames".into(),
        ));
    }
    if hop_length == 0 || sample_rate == 0 {
        return Err(HapticError::InvalidFeatureMatrix(format!(
            "hop length ({hop_length}) and sample rate ({sample_rate}) must be positive"
        )));
    }

    let mut boundaries = Vec::with_capacity(beats.len() + 2);
    boundaries.push(0);
    boundaries.extend(beats.frame_indices(hop_length, sample_rate, frames));
    boundaries.push(frames);
    boundaries.sort_unstable();
    boundaries.dedup();

    let segments = boundaries.len() - 1;
    let mut synced = FeatureMatrix::zeros(features.rows(), segments);
    let mut scratch = Vec::new();

    for (segment, bounds) in boundaries.windows(2).enumerate() {
        for row in 0..features.rows() {
            scratch.clear();
            scratch.extend_from_slice(&features.row(row)[bounds[0]..bounds[1]]);
            synced.set(row, segment, aggregator.aggregate(&mut scratch));
        }
    }

    tracing::debug!(
        rows = features.rows(),
        frames,
        beats = beats.len(),
        segments,
        "synchronised features to beats"
    );
    Ok(synced)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 22_050;
    const HOP: usize = 512;

    fn frame_time(frame: usize) -> f64 {
        frame as f64 * HOP as f64 / f64::from(SR)
    }

    fn ramp(rows: usize, cols: usize) -> FeatureMatrix {
        FeatureMatrix::from_rows(
            (0..rows)
                .map(|r| (0..cols).map(|c| (r * 100 + c) as f32).collect())
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn one_column_per_beat_interval() {
        let features = ramp(3, 100);
        let beats = BeatGrid::new(vec![frame_time(10), frame_time(40), frame_time(75)]).unwrap();
        let synced = sync(&features, &beats, HOP, SR, &Aggregate::Mean).unwrap();

        assert_eq!(synced.rows(), 3);
        assert_eq!(synced.cols(), 4);
        // Segments are [0,10) [10,40) [40,75) [75,100).
        assert_eq!(synced.row(0), &[4.5, 24.5, 57.0, 87.0]);
        assert_eq!(synced.get(2, 0), 204.5);
    }

    #[test]
    fn empty_grid_aggregates_everything() {
        let features = ramp(2, 10);
        let synced = sync(&features, &BeatGrid::empty(), HOP, SR, &Aggregate::Mean).unwrap();
        assert_eq!(synced.cols(), 1);
        assert_eq!(synced.column(0), vec![4.5, 104.5]);
    }

    #[test]
    fn median_resists_outliers() {
        let features = FeatureMatrix::from_rows(vec![vec![1.0, 1.0, 100.0, 2.0, 2.0, 2.0]]).unwrap();
        let beats = BeatGrid::new(vec![frame_time(3)]).unwrap();
        let synced = sync(&features, &beats, HOP, SR, &Aggregate::Median).unwrap();
        assert_eq!(synced.row(0), &[1.0, 2.0]);
    }

    #[test]
    fn segment_aggregate_ignores_column_order() {
        let a = FeatureMatrix::from_rows(vec![vec![5.0, 1.0, 3.0, 9.0, 7.0, 8.0]]).unwrap();
        let b = FeatureMatrix::from_rows(vec![vec![3.0, 5.0, 1.0, 8.0, 9.0, 7.0]]).unwrap();
        let beats = BeatGrid::new(vec![frame_time(3)]).unwrap();

        for aggregate in [Aggregate::Mean, Aggregate::Median] {
            assert_eq!(
                sync(&a, &beats, HOP, SR, &aggregate).unwrap(),
                sync(&b, &beats, HOP, SR, &aggregate).unwrap()
            );
        }
    }

    #[test]
    fn beats_past_the_end_are_clamped() {
        let features = ramp(1, 10);
        let beats = BeatGrid::new(vec![frame_time(5), 3600.0]).unwrap();
        let synced = sync(&features, &beats, HOP, SR, &Aggregate::Mean).unwrap();
        // The far beat clamps onto frame 9: [0,5) [5,9) [9,10).
        assert_eq!(synced.row(0), &[2.0, 6.5, 9.0]);
    }

    #[test]
    fn beats_sharing_a_frame_collapse() {
        let features = ramp(1, 20);
        let t = frame_time(8);
        let beats = BeatGrid::new(vec![t, t + 0.001]).unwrap();
        let synced = sync(&features, &beats, HOP, SR, &Aggregate::Mean).unwrap();
        assert_eq!(synced.cols(), 2);
    }

    #[test]
    fn custom_aggregators_are_accepted() {
        let features = ramp(1, 10);
        let max = |values: &mut [f32]| values.iter().copied().fold(f32::MIN, f32::max);
        let beats = BeatGrid::new(vec![frame_time(4)]).unwrap();
        let synced = BeatSynchronizer::new(HOP, SR).sync(&features, &beats, &max).unwrap();
        assert_eq!(synced.row(0), &[3.0, 9.0]);
    }

    #[test]
    fn zero_frame_matrices_are_rejected() {
        let features = FeatureMatrix::zeros(12, 0);
        assert!(matches!(
            sync(&features, &BeatGrid::empty(), HOP, SR, &Aggregate::Median),
            Err(HapticError::InvalidFeatureMatrix(_))
        ));
    }

    #[test]
    fn grid_rejects_unordered_or_negative_times() {
        assert!(BeatGrid::new(vec![1.0, 0.5]).is_err());
        assert!(BeatGrid::new(vec![-0.1]).is_err());
        assert!(BeatGrid::new(vec![f64::NAN]).is_err());
    }
}
