//! Model making runs: from a label volume to one surface model per label.
//!
//! A run selects its labels, counts their voxels when several labels are
//! requested, then takes every label through the same stages:
//!
//! ```text
//! threshold -> isosurface -> decimate -> orient -> smooth -> transform -> normals -> strips -> write
//! ```
//!
//! With joint smoothing all labels are extracted and smoothed together
//! once, and each label's faces are picked from that shared surface
//! instead of thresholding and extracting per label.
//!
//! Labels without voxels, without a usable name, or whose surface has no
//! polygons are skipped and reported. Any other error ends the run before
//! the scene file is written.
//!
//! # Example
//!
//! ```no_run
//! use model_maker::config::ModelMakerParams;
//! use model_maker::pipeline::ModelMaker;
//! use model_maker::progress::NoOpProgressReporter;
//!
//! let params = ModelMakerParams {
//!     generate_all: true,
//!     skip_unnamed: false,
//!     ..Default::default()
//! };
//! let report = ModelMaker::new(params)?
//!     .run("labels.nrrd".as_ref(), &NoOpProgressReporter)?;
//! println!("made {:?}, skipped {:?}", report.made_labels(), report.skipped_labels());
//! # Ok::<(), model_maker::ModelError>(())
//! ```

use std::path::{Path, PathBuf};

use nalgebra::Matrix4;
use tracing::{debug, info, warn};

use crate::colors::LabelColorTable;
use crate::config::ModelMakerParams;
use crate::decimate::decimate_mesh;
use crate::error::{ModelError, ModelResult};
use crate::histogram::{HistogramExtent, LabelHistogram};
use crate::io::{save_polygons, save_strip_mesh};
use crate::isosurface::{
    INSIDE_VALUE, LABEL_ISO_VALUE, OUTSIDE_VALUE, extract_isosurface, extract_labels,
};
use crate::labels::{LabelSelector, SelectionMode};
use crate::normals::compute_normals;
use crate::nrrd::load_nrrd;
use crate::orient::{needs_reversal, reverse_orientation};
use crate::progress::{ProgressAccountant, ProgressReporter, StepBudget};
use crate::scene::{DEFAULT_MODEL_COLOR, ModelArtifact, ModelCollectionBuilder, SceneTarget};
use crate::smooth::smooth_mesh;
use crate::strips::build_strips;
use crate::tracing_ext::{OperationTimer, log_mesh_stats};
use crate::transform::transform_mesh;
use crate::types::SurfaceMesh;
use crate::volume::ScalarVolume;

/// Color table names that mark a label as unnamed.
const INVALID_NAMES: [&str; 2] = ["invalid", "(none)"];

/// A step of a run, used to locate failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ReadVolume,
    Pad,
    Histogram,
    JointSmooth,
    Threshold,
    Isosurface,
    Decimate,
    Orient,
    Smooth,
    Transform,
    Normals,
    Strip,
    Write,
}

impl Stage {
    /// The flag most likely to get past a failure of this stage.
    pub fn parameter_hint(&self) -> Option<(&'static str, &'static str)> {
        match self {
            Stage::Decimate => Some(("--decimate", "a smaller target reduction")),
            Stage::Smooth | Stage::JointSmooth => Some(("--smooth", "fewer iterations")),
            Stage::Isosurface => Some(("--pad", "true")),
            Stage::Normals => Some(("--split-normals", "false")),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::ReadVolume => "volume reading",
            Stage::Pad => "padding",
            Stage::Histogram => "histogram",
            Stage::JointSmooth => "joint smoothing",
            Stage::Threshold => "threshold",
            Stage::Isosurface => "isosurface extraction",
            Stage::Decimate => "decimation",
            Stage::Orient => "orientation",
            Stage::Smooth => "smoothing",
            Stage::Transform => "space transform",
            Stage::Normals => "normals",
            Stage::Strip => "stripping",
            Stage::Write => "writing",
        };
        f.write_str(name)
    }
}

/// Why a label produced no model.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "pipeline-config", serde(tag = "reason", rename_all = "snake_case"))]
pub enum SkipReason {
    /// The histogram counted no voxels for the label.
    NoVoxels,
    /// The label has no usable name and unnamed labels are skipped.
    Unnamed { name: Option<String> },
    /// Extraction produced no polygons.
    NoPolygons,
    Other { details: String },
}

impl From<&ModelError> for SkipReason {
    fn from(err: &ModelError) -> Self {
        match err {
            ModelError::NoVoxels { .. } => SkipReason::NoVoxels,
            ModelError::UnnamedLabel { name, .. } => SkipReason::Unnamed { name: name.clone() },
            ModelError::EmptySurface { .. } => SkipReason::NoPolygons,
            other => SkipReason::Other {
                details: other.to_string(),
            },
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoVoxels => write!(f, "no voxels"),
            SkipReason::Unnamed { name: Some(name) } => write!(f, "unnamed ({})", name),
            SkipReason::Unnamed { name: None } => write!(f, "unnamed"),
            SkipReason::NoPolygons => write!(f, "no polygons"),
            SkipReason::Other { details } => write!(f, "{}", details),
        }
    }
}

/// A label that produced no model.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "pipeline-config", derive(serde::Serialize))]
pub struct SkippedLabel {
    pub label: i32,
    #[cfg_attr(feature = "pipeline-config", serde(flatten))]
    pub reason: SkipReason,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "pipeline-config", derive(serde::Serialize))]
pub struct RunReport {
    /// Models written, in label order.
    pub made: Vec<ModelArtifact>,
    /// Labels that were skipped, in label order.
    pub skipped: Vec<SkippedLabel>,
    /// Scene file the models were registered in.
    pub scene: PathBuf,
    /// Steps taken.
    pub steps: u64,
    /// Steps the run was budgeted for.
    pub total_steps: u64,
}

impl RunReport {
    pub fn made_labels(&self) -> Vec<i32> {
        self.made.iter().map(|m| m.label).collect()
    }

    pub fn skipped_labels(&self) -> Vec<i32> {
        self.skipped.iter().map(|s| s.label).collect()
    }
}

/// Runs the whole pipeline with one set of parameters.
#[derive(Debug, Clone)]
pub struct ModelMaker {
    params: ModelMakerParams,
}

impl ModelMaker {
    /// Check the parameters and prepare a run.
    pub fn new(params: ModelMakerParams) -> ModelResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &ModelMakerParams {
        &self.params
    }

    /// Scene file of a run on `input`: `--scene` when given, otherwise
    /// `<input stem>.mrml`.
    pub fn scene_target(&self, input: &Path) -> ModelResult<SceneTarget> {
        match &self.params.scene {
            Some(scene) => Ok(SceneTarget::parse(scene)),
            None => SceneTarget::default_for(input),
        }
    }

    /// Read a NRRD label volume and make its models.
    pub fn run(&self, input: &Path, reporter: &dyn ProgressReporter) -> ModelResult<RunReport> {
        if input.as_os_str().is_empty() {
            return Err(ModelError::MissingInput);
        }
        let target = self.scene_target(input)?;
        let volume = load_nrrd(input)?;
        self.run_volume(volume, &target, reporter)
    }

    /// Make the models of an already loaded volume.
    pub fn run_volume(
        &self,
        volume: ScalarVolume,
        target: &SceneTarget,
        reporter: &dyn ProgressReporter,
    ) -> ModelResult<RunReport> {
        let _timer = OperationTimer::new("model_maker");
        let params = &self.params;

        let mut selection = LabelSelector::select(
            &params.labels,
            params.start_label,
            params.end_label,
            params.generate_all,
        )?;
        let joint = params.joint_smoothing && selection.multiple;
        if params.joint_smoothing && !joint {
            debug!("Joint smoothing needs several labels, smoothing the single label on its own");
        }
        let budget = StepBudget::new(
            selection.estimated_count(),
            selection.multiple,
            joint,
            params.save_intermediate,
        );
        let mut progress = ProgressAccountant::new(budget, reporter);
        debug!(
            mode = ?selection.mode,
            multiple = selection.multiple,
            joint,
            total_steps = budget.total(),
            "Selected labels"
        );

        let color_table = params
            .color_table
            .as_deref()
            .map(load_color_table)
            .transpose()?;

        let root_dir = target.root_dir();
        std::fs::create_dir_all(&root_dir).map_err(|source| ModelError::OutputDirectory {
            path: root_dir.clone(),
            source,
        })?;
        let mut scene = ModelCollectionBuilder::open(
            target,
            params.model_hierarchy_file.as_deref(),
            params.color_table.as_deref(),
        )?;

        progress.advance("Read Volume");
        let volume = if params.pad {
            info!("Adding 1 pixel padding around the image, shifting origin");
            volume.padded()
        } else {
            volume
        };

        let mut histogram = None;
        let mut joint_surface = None;
        if selection.multiple {
            progress.advance("Pad Volume");

            let extent = HistogramExtent::compute(color_table.as_ref(), volume.scalar_type());
            let hist = {
                let _timer = OperationTimer::new("histogram");
                LabelHistogram::build(&volume, extent.max)
            };
            progress.advance("Histogram All Models");

            if selection.mode == SelectionMode::All {
                let present = selection.resolve_all(&hist)?;
                progress.set_budget(budget.with_labels(present));
            }

            if joint {
                let present: Vec<i32> = selection
                    .labels
                    .iter()
                    .copied()
                    .filter(|&l| hist.count(l) > 0)
                    .collect();
                let _timer = OperationTimer::new("joint_smooth");
                let surface = extract_labels(&volume, &present);
                let surface = if params.smooth > 0 {
                    smooth_mesh(&surface, &params.joint_smooth_params())
                } else {
                    surface
                };
                log_mesh_stats(&surface, "joint smoothed");
                progress.advance(&format!(
                    "Joint Smooth All Models ({} to process)",
                    present.len()
                ));
                joint_surface = Some(surface);
            } else {
                progress.advance("Prepare Label Surfaces");
            }
            histogram = Some(hist);
        }

        let ijk_to_lps = volume.ijk_to_lps();
        let reverse = needs_reversal(&ijk_to_lps);
        if reverse {
            debug!(
                determinant = ijk_to_lps.fixed_view::<3, 3>(0, 0).determinant(),
                "IJK to LPS flips handedness, surfaces will be reversed"
            );
        }

        let stages = LabelStages {
            params,
            multiple: selection.multiple,
            color_table: color_table.as_ref(),
            volume: &volume,
            histogram: histogram.as_ref(),
            joint_surface: joint_surface.as_ref(),
            ijk_to_lps,
            reverse,
            root_dir: &root_dir,
        };

        let mut made = Vec::new();
        let mut skipped = Vec::new();
        for &label in &selection.labels {
            if progress.is_cancelled() {
                warn!(label, "Run cancelled");
                return Err(ModelError::Cancelled { label });
            }
            let counted = match &histogram {
                Some(hist) => selection.mode != SelectionMode::All || hist.count(label) > 0,
                None => true,
            };
            if counted {
                progress.begin_label();
            }

            match stages.make_model(label, &mut progress) {
                Ok(artifact) => {
                    let color_name = stages.color_name(label);
                    scene.add_model(&artifact, &color_name);
                    info!(label, name = %artifact.name, path = %artifact.path.display(), "Made model");
                    progress.finish_label(&format!("Made {}", artifact.name));
                    made.push(artifact);
                }
                Err(err) if err.kind().is_fatal() => return Err(err),
                Err(err) => {
                    info!(label, reason = %err, "Skipping label");
                    skipped.push(SkippedLabel {
                        label,
                        reason: SkipReason::from(&err),
                    });
                    progress.finish_label(&format!("Skipped label {}", label));
                }
            }
        }

        let scene = scene.finish()?;
        info!(
            made = made.len(),
            skipped = skipped.len(),
            scene = %scene.path().display(),
            "Run complete"
        );
        Ok(RunReport {
            made,
            skipped,
            scene: scene.path().to_path_buf(),
            steps: progress.offset(),
            total_steps: progress.total(),
        })
    }
}

fn load_color_table(path: &Path) -> ModelResult<LabelColorTable> {
    LabelColorTable::load(path).map_err(|e| ModelError::ColorTableUnavailable {
        path: path.to_path_buf(),
        details: e.to_string(),
    })
}

/// Fail the stage if it left the mesh inconsistent.
fn check(stage: Stage, label: i32, mesh: &SurfaceMesh) -> ModelResult<()> {
    mesh.validate()
        .map_err(|details| ModelError::filter_failed(stage, label, details))
}

/// Everything the per-label stages share within a run.
struct LabelStages<'a> {
    params: &'a ModelMakerParams,
    multiple: bool,
    color_table: Option<&'a LabelColorTable>,
    volume: &'a ScalarVolume,
    histogram: Option<&'a LabelHistogram>,
    joint_surface: Option<&'a SurfaceMesh>,
    ijk_to_lps: Matrix4<f64>,
    reverse: bool,
    root_dir: &'a Path,
}

impl LabelStages<'_> {
    /// Model name of `label`, or the reason it has none.
    fn model_name(&self, label: i32) -> ModelResult<String> {
        let base = &self.params.name;
        if !self.multiple {
            return Ok(base.clone());
        }
        let skip_unnamed = self.params.skip_unnamed;
        match self.color_table {
            Some(table) => match table.color_name_as_file_name(label) {
                Some(name) => {
                    if skip_unnamed && (name.is_empty() || INVALID_NAMES.contains(&name.as_str())) {
                        Err(ModelError::UnnamedLabel {
                            label,
                            name: Some(name),
                        })
                    } else {
                        Ok(format!("{}_{}_{}", base, label, name))
                    }
                }
                None if skip_unnamed => Err(ModelError::UnnamedLabel { label, name: None }),
                None => Ok(format!("{}_{}", base, label)),
            },
            None if skip_unnamed => Err(ModelError::UnnamedLabel { label, name: None }),
            None => Ok(format!("{}_{}", base, label)),
        }
    }

    /// Name matched against hierarchy template nodes.
    fn color_name(&self, label: i32) -> String {
        match self.color_table {
            Some(table) => table.color_name_as_file_name(label).unwrap_or_default(),
            None => label.to_string(),
        }
    }

    fn color(&self, label: i32) -> [f64; 3] {
        self.color_table
            .and_then(|t| t.rgba(label))
            .map(|[r, g, b, _]| [r, g, b])
            .unwrap_or(DEFAULT_MODEL_COLOR)
    }

    fn make_model(&self, label: i32, progress: &mut ProgressAccountant<'_>) -> ModelResult<ModelArtifact> {
        if let Some(hist) = self.histogram {
            let voxels = hist.count(label);
            if voxels == 0 {
                return Err(ModelError::NoVoxels { label });
            }
            debug!(label, voxels, "Label voxel count");
        }
        let name = self.model_name(label)?;

        let mesh = match self.joint_surface {
            Some(surface) => {
                let mesh = surface.select_label(label);
                progress.advance(&format!("Threshold {}", name));
                if mesh.is_empty() {
                    return Err(ModelError::EmptySurface { label });
                }
                check(Stage::Threshold, label, &mesh)?;
                mesh
            }
            None => {
                let mask = self.volume.threshold(label, INSIDE_VALUE, OUTSIDE_VALUE);
                progress.advance(&format!("Threshold {}", name));

                let mesh = {
                    let _timer = OperationTimer::with_label("isosurface", label);
                    extract_isosurface(&mask, LABEL_ISO_VALUE)
                };
                progress.advance(&format!("Marching Cubes {}", name));
                if mesh.is_empty() {
                    info!(label, "No polygons can be created, there may be no voxels with this label");
                    return Err(ModelError::EmptySurface { label });
                }
                check(Stage::Isosurface, label, &mesh)?;
                self.save_intermediate(&mesh, &name, "MarchingCubes", "marching cubes", progress);
                mesh
            }
        };

        let decimated = {
            let _timer = OperationTimer::with_label("decimate", label);
            decimate_mesh(&mesh, &self.params.decimate_params())
        };
        progress.advance(&format!("Decimate {}", name));
        debug!(
            label,
            before = decimated.original_triangles,
            after = decimated.final_triangles,
            "Decimated"
        );
        let mut mesh = decimated.mesh;
        check(Stage::Decimate, label, &mesh)?;
        self.save_intermediate(&mesh, &name, "Decimated", "decimation", progress);

        if self.reverse {
            mesh = reverse_orientation(&mesh);
        }
        progress.advance(&format!("Reverse {}", name));

        if self.joint_surface.is_none() {
            if self.params.smooth > 0 {
                let _timer = OperationTimer::with_label("smooth", label);
                mesh = smooth_mesh(&mesh, &self.params.smooth_params());
                check(Stage::Smooth, label, &mesh)?;
            }
            progress.advance(&format!("Smooth {}", name));
            self.save_intermediate(&mesh, &name, "Smoothed", "smoothing", progress);
        }

        let mesh = transform_mesh(&mesh, &self.ijk_to_lps);
        check(Stage::Transform, label, &mesh)?;
        progress.advance(&format!("Transform {}", name));

        let normals = compute_normals(&mesh, &self.params.normals_params());
        check(Stage::Normals, label, &normals.mesh)?;
        progress.advance(&format!("Normals {}", name));

        let strips = build_strips(&normals.mesh, normals.face_normals.as_deref());
        progress.advance(&format!("Strip {}", name));
        log_mesh_stats(&normals.mesh, "final");

        let path = self.root_dir.join(format!("{}.vtk", name));
        save_strip_mesh(&strips, &path)?;
        progress.advance(&format!("Write {}", name));

        Ok(ModelArtifact {
            label,
            name,
            path,
            color: self.color(label),
        })
    }

    /// Write a pixel-space snapshot when intermediates are requested. A
    /// failed write is logged and does not stop the label.
    fn save_intermediate(
        &self,
        mesh: &SurfaceMesh,
        name: &str,
        suffix: &str,
        after: &str,
        progress: &mut ProgressAccountant<'_>,
    ) {
        if !self.params.save_intermediate {
            return;
        }
        let path = self.root_dir.join(format!("{}-{}.vtk", name, suffix));
        if let Err(err) = save_polygons(mesh, &path) {
            warn!(path = %path.display(), error = %err, "Failed to write intermediate model");
        }
        progress.advance(&format!("Writing intermediate model after {} {}", after, name));
    }
}
