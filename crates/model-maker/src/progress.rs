//! Progress reporting and step accounting for model generation runs.
//!
//! A run knows its total number of steps before any label is processed:
//!
//! - singleton steps: 4 when several labels are requested, 1 otherwise
//! - repeated steps per label: 9, or 7 with joint smoothing
//! - intermediate saves per label: 3, or 1 with joint smoothing
//!
//! [`ProgressAccountant`] advances one step at a time and reports
//! `offset / total` to a [`ProgressReporter`]. Skipped labels still consume
//! their full allotment, so a successful run always ends at exactly 1.0.
//!
//! # Example
//!
//! ```
//! use model_maker::progress::{NoOpProgressReporter, ProgressAccountant, StepBudget};
//!
//! let budget = StepBudget::new(3, true, false, false);
//! assert_eq!(budget.total(), 4 + 3 * 9);
//!
//! let reporter = NoOpProgressReporter;
//! let mut accountant = ProgressAccountant::new(budget, &reporter);
//! accountant.advance("Read volume");
//! assert_eq!(accountant.offset(), 1);
//! ```

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Progress information passed to callbacks.
#[derive(Debug, Clone)]
pub struct Progress {
    /// Steps completed so far.
    pub current: u64,

    /// Total number of steps.
    pub total: u64,

    /// Human-readable message describing the step just completed.
    pub message: String,

    /// Elapsed time since the run started.
    pub elapsed: Duration,

    /// Estimated time remaining (if available).
    pub estimated_remaining: Option<Duration>,
}

impl Progress {
    /// Create a new progress report.
    pub fn new(current: u64, total: u64, message: impl Into<String>) -> Self {
        Self {
            current,
            total,
            message: message.into(),
            elapsed: Duration::ZERO,
            estimated_remaining: None,
        }
    }

    /// Get progress as a fraction (0.0 to 1.0).
    #[inline]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.current as f64) / (self.total as f64)
        }
    }

    /// Get progress as a percentage (0 to 100).
    #[inline]
    pub fn percent(&self) -> u32 {
        (self.fraction() * 100.0).round() as u32
    }

    /// Check if the run is complete.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.current >= self.total
    }
}

/// Callback function for progress reporting.
///
/// Returns `true` to continue, `false` to request cancellation.
pub type ProgressCallback = Box<dyn Fn(&Progress) -> bool + Send + Sync>;

/// Trait for types that receive progress updates.
pub trait ProgressReporter {
    /// Report progress. Returns `false` to request cancellation.
    fn report_progress(&self, current: u64, total: u64, message: &str) -> bool;
}

/// A no-op progress reporter that does nothing.
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    #[inline]
    fn report_progress(&self, _current: u64, _total: u64, _message: &str) -> bool {
        true
    }
}

/// A progress reporter that calls a callback.
pub struct CallbackProgressReporter<'a> {
    callback: &'a ProgressCallback,
    start_time: Instant,
}

impl<'a> CallbackProgressReporter<'a> {
    /// Create a new callback reporter.
    pub fn new(callback: &'a ProgressCallback) -> Self {
        Self {
            callback,
            start_time: Instant::now(),
        }
    }
}

impl ProgressReporter for CallbackProgressReporter<'_> {
    fn report_progress(&self, current: u64, total: u64, message: &str) -> bool {
        let elapsed = self.start_time.elapsed();
        let estimated_remaining = if current > 0 && current <= total {
            let rate = current as f64 / elapsed.as_secs_f64();
            if rate.is_finite() && rate > 0.0 {
                let remaining = (total - current) as f64 / rate;
                Some(Duration::from_secs_f64(remaining))
            } else {
                None
            }
        } else {
            None
        };

        let progress = Progress {
            current,
            total,
            message: message.to_string(),
            elapsed,
            estimated_remaining,
        };

        (self.callback)(&progress)
    }
}

/// Keeps every report, for replaying and comparing runs.
#[derive(Debug, Default)]
pub struct RecordingProgressReporter {
    events: Mutex<Vec<(u64, u64, String)>>,
}

impl RecordingProgressReporter {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All `(current, total, message)` reports so far.
    pub fn events(&self) -> Vec<(u64, u64, String)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ProgressReporter for RecordingProgressReporter {
    fn report_progress(&self, current: u64, total: u64, message: &str) -> bool {
        if let Ok(mut events) = self.events.lock() {
            events.push((current, total, message.to_string()));
        }
        true
    }
}

/// The step budget of a run, computed before any label is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepBudget {
    /// Steps run once per run.
    pub singleton: u64,
    /// Stage steps run for every label.
    pub repeated: u64,
    /// Intermediate model saves per label.
    pub saves_per_label: u64,
    /// Number of labels that consume steps.
    pub labels: u64,
}

impl StepBudget {
    /// Stage steps per label with per-label smoothing.
    pub const REPEATED_STEPS: u64 = 9;
    /// Stage steps per label when smoothing ran once for all labels.
    pub const JOINT_REPEATED_STEPS: u64 = 7;
    /// Steps run once when several labels are requested.
    pub const MULTIPLE_SINGLETON_STEPS: u64 = 4;
    /// Steps run once for a single-label run.
    pub const SINGLE_SINGLETON_STEPS: u64 = 1;

    /// Compute the budget for `labels` labels.
    pub fn new(labels: usize, multiple: bool, joint_smoothing: bool, save_intermediate: bool) -> Self {
        let repeated = if joint_smoothing {
            Self::JOINT_REPEATED_STEPS
        } else {
            Self::REPEATED_STEPS
        };
        let singleton = if multiple {
            Self::MULTIPLE_SINGLETON_STEPS
        } else {
            Self::SINGLE_SINGLETON_STEPS
        };
        let saves_per_label = match (save_intermediate, joint_smoothing) {
            (false, _) => 0,
            (true, true) => 1,
            (true, false) => 3,
        };

        Self {
            singleton,
            repeated,
            saves_per_label,
            labels: labels as u64,
        }
    }

    /// Same budget with a corrected label count.
    pub fn with_labels(self, labels: usize) -> Self {
        Self {
            labels: labels as u64,
            ..self
        }
    }

    /// Steps each counted label consumes.
    #[inline]
    pub fn per_label(&self) -> u64 {
        self.repeated + self.saves_per_label
    }

    /// Total number of steps in the run.
    #[inline]
    pub fn total(&self) -> u64 {
        self.singleton + self.labels * self.per_label()
    }

    /// Weight of a single step as a fraction of the run.
    #[inline]
    pub fn step_weight(&self) -> f64 {
        let total = self.total();
        if total == 0 { 0.0 } else { 1.0 / total as f64 }
    }
}

/// Running step offset of a run, reported after every step.
pub struct ProgressAccountant<'a> {
    budget: StepBudget,
    offset: u64,
    label_start: Option<u64>,
    cancelled: bool,
    reporter: &'a dyn ProgressReporter,
}

impl<'a> ProgressAccountant<'a> {
    /// Start accounting at offset 0.
    pub fn new(budget: StepBudget, reporter: &'a dyn ProgressReporter) -> Self {
        Self {
            budget,
            offset: 0,
            label_start: None,
            cancelled: false,
            reporter,
        }
    }

    /// Replace the budget, keeping the steps already taken.
    pub fn set_budget(&mut self, budget: StepBudget) {
        tracing::debug!(
            old_total = self.budget.total(),
            new_total = budget.total(),
            "Recomputed step budget"
        );
        self.budget = budget;
    }

    /// The current budget.
    #[inline]
    pub fn budget(&self) -> StepBudget {
        self.budget
    }

    /// Steps completed so far.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total steps of the run.
    #[inline]
    pub fn total(&self) -> u64 {
        self.budget.total()
    }

    /// Completed fraction in `[0, 1]`.
    #[inline]
    pub fn fraction(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.offset as f64 / total as f64
        }
    }

    /// Whether the reporter asked to stop.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Complete one step and report it.
    ///
    /// Returns `false` once the reporter has requested cancellation.
    pub fn advance(&mut self, message: &str) -> bool {
        self.offset += 1;
        debug_assert!(
            self.offset <= self.total(),
            "step {} exceeds budget {}",
            self.offset,
            self.total()
        );
        tracing::trace!(
            offset = self.offset,
            total = self.total(),
            message,
            "Progress"
        );
        if !self.reporter.report_progress(self.offset, self.total(), message) {
            self.cancelled = true;
        }
        !self.cancelled
    }

    /// Mark the start of a counted label.
    pub fn begin_label(&mut self) {
        self.label_start = Some(self.offset);
    }

    /// Consume whatever steps the current label has not used yet.
    ///
    /// Called after a label is written or skipped, so every counted label
    /// takes exactly [`StepBudget::per_label`] steps.
    pub fn finish_label(&mut self, message: &str) {
        let Some(start) = self.label_start.take() else {
            return;
        };
        let end = start + self.budget.per_label();
        while self.offset < end {
            self.advance(message);
        }
    }
}
