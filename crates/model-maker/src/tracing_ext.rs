//! Structured logging helpers for the model pipeline.
//!
//! The library only emits events; the binary decides where they go.
//! Targets:
//!
//! - `model_maker::timing`: stage durations from [`OperationTimer`]
//! - `model_maker::mesh_state`: vertex and face counts between stages
//! - `model_maker::io`: files read and written
//!
//! ```rust,ignore
//! use tracing_subscriber::EnvFilter;
//!
//! tracing_subscriber::fmt()
//!     .with_env_filter(EnvFilter::new("model_maker=debug"))
//!     .init();
//! ```

use std::path::Path;
use std::time::Instant;
use tracing::{Span, debug, info, trace, warn};

use crate::types::SurfaceMesh;

/// A stage timer that logs its duration on drop.
///
/// ```rust,ignore
/// use model_maker::tracing_ext::OperationTimer;
///
/// fn smooth_label() {
///     let _timer = OperationTimer::with_label("smooth", 5);
///     // ... do work ...
/// } // duration logged here
/// ```
pub struct OperationTimer {
    name: &'static str,
    label: Option<i32>,
    start: Instant,
    span: Span,
}

impl OperationTimer {
    /// Time a run-level operation.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!("model_operation", operation = name);
        debug!(target: "model_maker::timing", operation = name, "Starting operation");
        Self {
            name,
            label: None,
            start: Instant::now(),
            span,
        }
    }

    /// Time a stage of one label.
    pub fn with_label(name: &'static str, label: i32) -> Self {
        let span = tracing::info_span!("model_operation", operation = name, label);
        trace!(target: "model_maker::timing", operation = name, label, "Starting operation");
        Self {
            name,
            label: Some(label),
            start: Instant::now(),
            span,
        }
    }

    /// Elapsed milliseconds so far.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// The span opened for this operation.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        let elapsed_ms = format!("{:.2}", self.elapsed_ms());
        match self.label {
            Some(label) => debug!(
                target: "model_maker::timing",
                operation = self.name,
                label,
                elapsed_ms,
                "Stage completed"
            ),
            None => info!(
                target: "model_maker::timing",
                operation = self.name,
                elapsed_ms,
                "Operation completed"
            ),
        }
    }
}

/// Log mesh counts and extent at debug level.
pub fn log_mesh_stats(mesh: &SurfaceMesh, context: &str) {
    let (min_bounds, max_bounds) = mesh.bounds().unwrap_or_default();
    let dims = max_bounds - min_bounds;

    debug!(
        target: "model_maker::mesh_state",
        context,
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        dimensions = format!("{:.2} x {:.2} x {:.2}", dims.x, dims.y, dims.z),
        "Mesh state"
    );
}

/// Log a file read or write.
pub fn log_io_operation(operation: &str, path: &Path, success: bool) {
    if success {
        debug!(
            target: "model_maker::io",
            operation,
            path = %path.display(),
            "I/O operation completed"
        );
    } else {
        warn!(
            target: "model_maker::io",
            operation,
            path = %path.display(),
            "I/O operation failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_timer() {
        let timer = OperationTimer::with_label("decimate", 3);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed_ms() >= 5.0);
    }

    #[test]
    fn test_log_helpers_accept_empty_mesh() {
        log_mesh_stats(&SurfaceMesh::new(), "empty");
        log_io_operation("write", Path::new("model.vtk"), true);
    }
}
