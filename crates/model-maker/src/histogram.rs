//! Voxel count histogram over label values.

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::colors::LabelColorTable;
use crate::volume::{ScalarType, ScalarVolume};

/// Upper bound on histogram bins when no color table limits the range.
pub const MAX_HISTOGRAM_EXTENT: usize = 1_000_000;

/// Largest label value the histogram counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistogramExtent {
    /// Largest counted label.
    pub max: usize,
    /// Whether the scalar-type bound was replaced by [`MAX_HISTOGRAM_EXTENT`].
    pub clamped: bool,
}

impl HistogramExtent {
    /// Number of colors minus one with a color table, otherwise the scalar
    /// type maximum minus one, limited to [`MAX_HISTOGRAM_EXTENT`].
    pub fn compute(color_table: Option<&LabelColorTable>, scalar_type: ScalarType) -> Self {
        if let Some(table) = color_table {
            let max = table.number_of_colors().saturating_sub(1);
            debug!(extent_max = max, "Histogram range from color table");
            return Self {
                max,
                clamped: false,
            };
        }

        let bound = (scalar_type.max_value() - 1.0).floor();
        if bound < 0.0 || bound > MAX_HISTOGRAM_EXTENT as f64 {
            warn!(
                scalar_type = ?scalar_type,
                extent_max = MAX_HISTOGRAM_EXTENT,
                "No color table, histogram range clamped"
            );
            Self {
                max: MAX_HISTOGRAM_EXTENT,
                clamped: true,
            }
        } else {
            warn!(
                extent_max = bound,
                "No color table, histogram uses the full scalar range"
            );
            Self {
                max: bound as usize,
                clamped: false,
            }
        }
    }
}

/// Voxel counts for labels `0..=extent_max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelHistogram {
    counts: Vec<u64>,
}

impl LabelHistogram {
    /// Count voxels per label. Values outside `[0, extent_max]` are ignored.
    pub fn build(volume: &ScalarVolume, extent_max: usize) -> Self {
        let bins = extent_max + 1;
        let data = volume.data();
        let chunk = (data.len() / rayon::current_num_threads().max(1)).max(4096);

        let counts = data
            .par_chunks(chunk)
            .map(|slab| {
                let mut counts = vec![0u64; bins];
                for &v in slab {
                    if v >= 0 && (v as usize) < bins {
                        counts[v as usize] += 1;
                    }
                }
                counts
            })
            .reduce(
                || vec![0u64; bins],
                |mut a, b| {
                    for (x, y) in a.iter_mut().zip(b) {
                        *x += y;
                    }
                    a
                },
            );

        Self { counts }
    }

    /// Largest counted label.
    pub fn extent_max(&self) -> usize {
        self.counts.len() - 1
    }

    /// Voxels with value `label`; 0 outside the counted range.
    pub fn count(&self, label: i32) -> u64 {
        usize::try_from(label)
            .ok()
            .and_then(|l| self.counts.get(l))
            .copied()
            .unwrap_or(0)
    }

    /// Smallest and largest label with voxels, background excluded.
    ///
    /// An observed minimum of 0 (or below) becomes 1. `None` when the
    /// histogram is empty.
    pub fn observed_range(&self) -> Option<(i32, i32)> {
        let min = self.counts.iter().position(|&c| c > 0)? as i32;
        let max = self.counts.iter().rposition(|&c| c > 0)? as i32;
        Some((min.max(1), max))
    }

    /// Labels in `[min, max]` with a non-zero count, ascending.
    pub fn present_labels(&self, min: i32, max: i32) -> Vec<i32> {
        (min..=max).filter(|&l| self.count(l) > 0).collect()
    }
}
