//! Label selection: which labels a run turns into models.

use tracing::debug;

use crate::error::{ModelError, ModelResult};
use crate::histogram::LabelHistogram;

/// How the labels of a run were chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "pipeline-config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "pipeline-config", serde(rename_all = "snake_case"))]
pub enum SelectionMode {
    /// An explicit label list.
    Explicit,
    /// A contiguous `[start, end]` range.
    Range,
    /// Every label present in the volume.
    All,
}

/// The ordered labels of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    /// Selection mode.
    pub mode: SelectionMode,
    /// Labels in processing order. Empty in `All` mode until resolved
    /// against a histogram.
    pub labels: Vec<i32>,
    /// Whether the run makes several models.
    pub multiple: bool,
    /// Smallest selected label.
    pub labels_min: i32,
    /// Largest selected label.
    pub labels_max: i32,
}

impl LabelSet {
    /// Labels counted for the step budget. `All` mode counts one label
    /// until the histogram resolves it.
    pub fn estimated_count(&self) -> usize {
        if self.mode == SelectionMode::All && self.labels.is_empty() {
            1
        } else {
            self.labels.len()
        }
    }

    /// Replace an `All` selection with the observed label range.
    ///
    /// Every label in the range is visited, but only labels with voxels are
    /// counted for the step budget. Returns that count.
    pub fn resolve_all(&mut self, histogram: &LabelHistogram) -> ModelResult<usize> {
        if self.mode != SelectionMode::All {
            return Ok(self.labels.len());
        }
        let (min, max) = histogram.observed_range().ok_or_else(|| ModelError::NoLabels {
            details: "the volume has no labels within the histogram range".into(),
        })?;
        let present = histogram.present_labels(min, max).len();
        if present == 0 {
            return Err(ModelError::NoLabels {
                details: "the volume contains only background".into(),
            });
        }
        debug!(
            start_label = min,
            end_label = max,
            count = present,
            "Resolved all labels from histogram"
        );
        self.labels_min = min;
        self.labels_max = max;
        self.labels = (min..=max).collect();
        Ok(present)
    }
}

/// Turns the selection flags into a [`LabelSet`].
pub struct LabelSelector;

impl LabelSelector {
    /// Resolve the selection.
    ///
    /// `generate_all` wins over an explicit list, which wins over a range.
    /// A range needs `end >= start` with neither equal to −1.
    pub fn select(labels: &[i32], start: i32, end: i32, generate_all: bool) -> ModelResult<LabelSet> {
        if generate_all {
            return Ok(LabelSet {
                mode: SelectionMode::All,
                labels: Vec::new(),
                multiple: true,
                labels_min: 0,
                labels_max: 0,
            });
        }

        if !labels.is_empty() {
            let mut sorted = labels.to_vec();
            sorted.sort_unstable();
            sorted.dedup();
            let multiple = sorted.len() > 1;
            return Ok(LabelSet {
                mode: SelectionMode::Explicit,
                labels_min: sorted[0],
                labels_max: sorted[sorted.len() - 1],
                labels: sorted,
                multiple,
            });
        }

        if end >= start && start != -1 && end != -1 {
            return Ok(LabelSet {
                mode: SelectionMode::Range,
                labels: (start..=end).collect(),
                multiple: end > start,
                labels_min: start,
                labels_max: end,
            });
        }

        Err(ModelError::NoLabels {
            details: format!(
                "no label list, no valid range (start {}, end {}), and not generating all",
                start, end
            ),
        })
    }
}
