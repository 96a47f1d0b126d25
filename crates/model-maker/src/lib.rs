//! Surface models from labeled volumes.
//!
//! This crate turns a segmentation, a 3D volume whose integer voxel values
//! are labels, into one triangle surface per label, in patient (LPS)
//! coordinates, and registers the surfaces in a model scene file.
//!
//! # Pipeline
//!
//! For each selected label:
//!
//! 1. **Threshold**: voxels of the label become 200, everything else 0
//! 2. **Isosurface**: the surface at 100.5 is extracted in voxel index space
//! 3. **Decimate**: quadric edge collapses reduce the triangle count while
//!    keeping topology, boundaries and feature edges
//! 4. **Orient**: winding is reversed when the voxel-to-patient transform
//!    flips handedness
//! 5. **Smooth**: windowed sinc or Laplacian smoothing
//! 6. **Transform**: vertices move from voxel indices to LPS millimeters
//! 7. **Normals and strips**: point or face normals, then triangle strips
//! 8. **Write**: a VTK legacy polydata file per model
//!
//! With joint smoothing, all labels are extracted as one surface and
//! smoothed together so neighboring labels keep matching boundaries.
//!
//! # Coordinate System
//!
//! Surfaces are built in voxel index (IJK) space with unit spacing. The
//! volume's IJK→RAS matrix, flipped to LPS, maps them to patient space at
//! the end. Face winding is **counter-clockwise when viewed from outside**
//! the labeled region.
//!
//! # Quick Start
//!
//! ```no_run
//! use model_maker::{ModelMaker, ModelMakerParams, NoOpProgressReporter};
//!
//! let params = ModelMakerParams {
//!     labels: vec![3],
//!     name: "Liver".into(),
//!     smooth: 20,
//!     ..Default::default()
//! };
//! let report = ModelMaker::new(params)
//!     .unwrap()
//!     .run("segmentation.nrrd".as_ref(), &NoOpProgressReporter)
//!     .unwrap();
//! println!("Wrote {} models to {}", report.made.len(), report.scene.display());
//! ```
//!
//! # Using the stages directly
//!
//! ```no_run
//! use model_maker::{DecimateParams, ScalarVolume, SmoothParams};
//! use model_maker::isosurface::extract_label;
//!
//! let volume = ScalarVolume::load("segmentation.nrrd").unwrap();
//! let surface = extract_label(&volume, 3);
//! let reduced = surface.decimate(&DecimateParams::with_target_reduction(0.5));
//! let smoothed = reduced.mesh.smooth(&SmoothParams::sinc(20));
//! smoothed.save("liver-ijk.vtk").unwrap();
//! ```
//!
//! # Error Handling
//!
//! Operations that touch files or run a whole pipeline return
//! `ModelResult<T>`, which is `Result<T, ModelError>`. Every error has an
//! [`ErrorKind`]: skips (no voxels, no name, no polygons) are recorded in the
//! run report, everything else ends the run.
//!
//! ```
//! use model_maker::{ErrorKind, ModelError, ScalarVolume};
//!
//! match ScalarVolume::load("missing.nrrd") {
//!     Ok(_) => println!("Loaded"),
//!     Err(ModelError::IoRead { path, .. }) => println!("Cannot read {:?}", path),
//!     Err(e) if e.kind() == ErrorKind::Format => println!("Bad file: {}", e),
//!     Err(e) => println!("Other error: {}", e),
//! }
//! ```
//!
//! # Supported Formats
//!
//! | Format | Extension | Load | Save | Notes |
//! |--------|-----------|------|------|-------|
//! | NRRD   | `.nrrd`, `.nhdr` | ✓ | ✓ | raw and text encodings, attached or detached data |
//! | VTK legacy polydata | `.vtk` | ✓ | ✓ | ASCII, polygons and triangle strips |
//! | Color table | `.txt`, `.ctbl`, `.csv` | ✓ | ✓ | `index name r g b a` or CSV |
//! | Model scene | `.mrml` | ✓ | ✓ | XML, unknown nodes kept as read |

mod error;
mod types;

#[cfg(test)]
mod edge_cases;

pub mod adjacency;
pub mod colors;
pub mod config;
pub mod decimate;
pub mod histogram;
pub mod io;
pub mod isosurface;
pub mod labels;
pub mod normals;
pub mod nrrd;
pub mod orient;
pub mod pipeline;
pub mod progress;
pub mod scene;
pub mod smooth;
pub mod strips;
pub mod tracing_ext;
pub mod transform;
pub mod volume;

// Core types
pub use error::{
    ErrorCode, ErrorKind, ErrorLocation, ModelError, ModelResult, RecoverySuggestion,
};
pub use types::{StripMesh, SurfaceMesh, Triangle, Vertex};
pub use volume::{ScalarType, ScalarVolume};

pub use adjacency::MeshAdjacency;
pub use colors::{ColorEntry, LabelColorTable};
pub use labels::{LabelSelector, LabelSet, SelectionMode};

// Stage parameters and entry points
pub use decimate::{DecimateParams, DecimateResult, decimate_mesh};
pub use normals::{NormalsOutput, NormalsParams, compute_normals};
pub use smooth::{FilterType, SmoothParams, smooth_mesh};
pub use strips::build_strips;

// Runs
pub use config::ModelMakerParams;
#[cfg(feature = "pipeline-config")]
pub use config::ConfigError;
pub use pipeline::{ModelMaker, RunReport, SkipReason, SkippedLabel, Stage};
pub use scene::{ModelArtifact, ModelCollectionBuilder, Scene, SceneTarget};

pub use progress::{
    CallbackProgressReporter, NoOpProgressReporter, Progress, ProgressAccountant,
    ProgressCallback, ProgressReporter, RecordingProgressReporter, StepBudget,
};

pub use tracing_ext::{OperationTimer, log_io_operation, log_mesh_stats};

impl SurfaceMesh {
    /// Load the triangles of a VTK polydata file. Strips are decoded.
    pub fn load(path: impl AsRef<std::path::Path>) -> ModelResult<Self> {
        Ok(io::load_vtk(path.as_ref())?.to_surface_mesh())
    }

    /// Save as VTK polydata with a `POLYGONS` section.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> ModelResult<()> {
        io::save_polygons(self, path.as_ref())
    }

    /// Reduce the triangle count.
    pub fn decimate(&self, params: &DecimateParams) -> DecimateResult {
        decimate::decimate_mesh(self, params)
    }

    /// Smooth vertex positions, keeping connectivity.
    pub fn smooth(&self, params: &SmoothParams) -> SurfaceMesh {
        smooth::smooth_mesh(self, params)
    }

    /// Apply a 4x4 transform to positions and normals.
    pub fn transformed(&self, matrix: &nalgebra::Matrix4<f64>) -> SurfaceMesh {
        transform::transform_mesh(self, matrix)
    }

    /// Flip the winding of every face.
    pub fn reversed(&self) -> SurfaceMesh {
        orient::reverse_orientation(self)
    }
}

impl ScalarVolume {
    /// Load a NRRD volume (`.nrrd` or `.nhdr`).
    pub fn load(path: impl AsRef<std::path::Path>) -> ModelResult<Self> {
        nrrd::load_nrrd(path.as_ref())
    }

    /// Save as a raw NRRD volume.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> ModelResult<()> {
        nrrd::save_nrrd(self, path.as_ref())
    }
}
