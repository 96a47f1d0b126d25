//! Surface smoothing: windowed sinc and Laplacian relaxation.
//!
//! Both filters keep vertex count and connectivity. Vertices are classified
//! once up front (see [`MeshAdjacency::classify_vertices`]): fixed vertices
//! never move, vertices on exactly two constraint edges are smoothed along
//! those edges only, and the rest average their whole one-ring.

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::adjacency::{EdgeRules, EdgeTreatment, MeshAdjacency, VertexClass};
use crate::types::SurfaceMesh;

/// Smoothing filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "pipeline-config", serde(rename_all = "snake_case"))]
pub enum FilterType {
    /// Windowed sinc low-pass filter. Barely shrinks the surface.
    #[default]
    Sinc,
    /// Iterated Laplacian relaxation.
    Laplacian,
}

impl std::fmt::Display for FilterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterType::Sinc => write!(f, "sinc"),
            FilterType::Laplacian => write!(f, "laplacian"),
        }
    }
}

/// Smoothing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothParams {
    pub filter: FilterType,
    /// Number of iterations. 0 leaves the mesh unchanged.
    pub iterations: u32,
    /// Sinc pass band in `(0, 2)`. Lower values smooth more.
    pub pass_band: f64,
    /// Laplacian relaxation factor.
    pub relaxation: f64,
    /// Laplacian stops early once no vertex moves more than this fraction
    /// of the bounding box diagonal.
    pub convergence: f64,
    /// Dihedral angle in degrees for feature edge detection.
    pub feature_angle: f64,
    /// Detect feature edges and keep their vertices on them.
    pub feature_edge_smoothing: bool,
    /// Let boundary vertices slide along the boundary instead of pinning them.
    pub boundary_smoothing: bool,
    /// Treat edges shared by more than two faces as ordinary edges instead
    /// of pinning their vertices.
    pub non_manifold_smoothing: bool,
    /// Run the sinc filter in a unit-sized frame.
    pub normalize_coordinates: bool,
}

impl SmoothParams {
    /// Per-label windowed sinc: pass band 0.1, boundary and feature edges
    /// left alone.
    pub fn sinc(iterations: u32) -> Self {
        Self {
            filter: FilterType::Sinc,
            iterations,
            pass_band: 0.1,
            relaxation: 0.33,
            convergence: 0.0,
            feature_angle: 60.0,
            feature_edge_smoothing: false,
            boundary_smoothing: false,
            non_manifold_smoothing: false,
            normalize_coordinates: false,
        }
    }

    /// Per-label Laplacian: relaxation 0.33, no early stop.
    pub fn laplacian(iterations: u32) -> Self {
        Self {
            filter: FilterType::Laplacian,
            ..Self::sinc(iterations)
        }
    }

    /// Smoothing for a multi-label surface, where interfaces between labels
    /// are non-manifold and must move together.
    pub fn joint(iterations: u32) -> Self {
        Self {
            pass_band: 0.001,
            feature_angle: 120.0,
            non_manifold_smoothing: true,
            normalize_coordinates: true,
            ..Self::sinc(iterations)
        }
    }

    /// Params for `filter` with the per-label defaults.
    pub fn for_filter(filter: FilterType, iterations: u32) -> Self {
        match filter {
            FilterType::Sinc => Self::sinc(iterations),
            FilterType::Laplacian => Self::laplacian(iterations),
        }
    }

    fn edge_rules(&self) -> EdgeRules {
        EdgeRules {
            boundary: if self.boundary_smoothing {
                EdgeTreatment::Constraint
            } else {
                EdgeTreatment::Fixed
            },
            non_manifold: if self.non_manifold_smoothing {
                EdgeTreatment::Ordinary
            } else {
                EdgeTreatment::Fixed
            },
            feature_angle: self.feature_edge_smoothing.then_some(self.feature_angle),
        }
    }
}

impl Default for SmoothParams {
    fn default() -> Self {
        Self::sinc(10)
    }
}

/// Which neighbors a vertex averages over, if any.
enum Stencil {
    Fixed,
    Ring(Vec<u32>),
}

fn build_stencils(mesh: &SurfaceMesh, params: &SmoothParams) -> Vec<Stencil> {
    let positions: Vec<Point3<f64>> = mesh.vertices.iter().map(|v| v.position).collect();
    let adjacency = MeshAdjacency::build(&mesh.faces, positions.len());
    let constraints = adjacency.classify_vertices(&positions, &mesh.faces, &params.edge_rules());
    let rings = MeshAdjacency::vertex_neighbors(&mesh.faces, positions.len());

    let stencils: Vec<Stencil> = rings
        .into_iter()
        .zip(constraints.classes.iter().zip(constraints.constraint_neighbors))
        .map(|(ring, (class, constraint))| match class {
            VertexClass::Fixed => Stencil::Fixed,
            VertexClass::Constrained => Stencil::Ring(constraint),
            VertexClass::Simple => Stencil::Ring(ring),
        })
        .collect();

    let fixed = stencils.iter().filter(|s| matches!(s, Stencil::Fixed)).count();
    debug!(
        vertices = stencils.len(),
        fixed,
        filter = %params.filter,
        "Classified vertices for smoothing"
    );
    stencils
}

/// One application of the averaging operator: each vertex moves to the
/// mean of its stencil.
fn average(stencils: &[Stencil], x: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
    stencils
        .par_iter()
        .zip(x.par_iter())
        .map(|(stencil, xi)| match stencil {
            Stencil::Fixed => *xi,
            Stencil::Ring(ring) if ring.is_empty() => *xi,
            Stencil::Ring(ring) => {
                ring.iter().map(|&n| x[n as usize]).sum::<Vector3<f64>>() / ring.len() as f64
            }
        })
        .collect()
}

/// Smooth a mesh. Positions change, nothing else does.
pub fn smooth_mesh(mesh: &SurfaceMesh, params: &SmoothParams) -> SurfaceMesh {
    if params.iterations == 0 || mesh.vertices.is_empty() {
        return mesh.clone();
    }

    let stencils = build_stencils(mesh, params);
    let positions: Vec<Vector3<f64>> = mesh.vertices.iter().map(|v| v.position.coords).collect();

    let smoothed = match params.filter {
        FilterType::Sinc => {
            let iterations = if params.iterations == 1 {
                warn!("Windowed sinc needs at least 2 iterations, using 2");
                2
            } else {
                params.iterations
            };
            if params.normalize_coordinates {
                let (center, scale) = normalization(mesh);
                let unit: Vec<Vector3<f64>> = positions.iter().map(|p| (p - center) / scale).collect();
                windowed_sinc(&stencils, &unit, iterations, params.pass_band)
                    .into_iter()
                    .map(|p| p * scale + center)
                    .collect()
            } else {
                windowed_sinc(&stencils, &positions, iterations, params.pass_band)
            }
        }
        FilterType::Laplacian => laplacian(
            &stencils,
            positions,
            params.iterations,
            params.relaxation,
            params.convergence * mesh.diagonal(),
        ),
    };

    let mut out = mesh.clone();
    for (vertex, p) in out.vertices.iter_mut().zip(smoothed) {
        vertex.position = Point3::from(p);
    }
    out
}

/// Bounding box center and half diagonal, the latter never zero.
fn normalization(mesh: &SurfaceMesh) -> (Vector3<f64>, f64) {
    match mesh.bounds() {
        Some((min, max)) => {
            let half = (max - min).norm() / 2.0;
            let center = (min.coords + max.coords) / 2.0;
            (center, if half > 0.0 { half } else { 1.0 })
        }
        None => (Vector3::zeros(), 1.0),
    }
}

/// Hamming-windowed sinc coefficients, normalized to sum to 1.
fn sinc_coefficients(iterations: u32, pass_band: f64) -> Vec<f64> {
    use std::f64::consts::PI;

    let theta = (1.0 - 0.5 * pass_band).clamp(-1.0, 1.0).acos();
    let n = iterations as usize;
    let mut coefficients: Vec<f64> = (0..=n)
        .map(|i| {
            let c = if i == 0 {
                theta / PI
            } else {
                2.0 * (i as f64 * theta).sin() / (i as f64 * PI)
            };
            let w = 0.54 + 0.46 * (i as f64 * PI / (n as f64 + 1.0)).cos();
            c * w
        })
        .collect();
    let sum: f64 = coefficients.iter().sum();
    if sum.abs() > f64::EPSILON {
        for c in &mut coefficients {
            *c /= sum;
        }
    }
    coefficients
}

/// Windowed sinc filter evaluated with the Chebyshev recurrence on the
/// operator `M = (I + W) / 2`, `W` being the stencil average.
fn windowed_sinc(
    stencils: &[Stencil],
    x0: &[Vector3<f64>],
    iterations: u32,
    pass_band: f64,
) -> Vec<Vector3<f64>> {
    let coefficients = sinc_coefficients(iterations, pass_band);
    let half_step = |x: &[Vector3<f64>]| -> Vec<Vector3<f64>> {
        average(stencils, x)
            .into_par_iter()
            .zip(x.par_iter())
            .map(|(wx, xi)| xi + 0.5 * (wx - xi))
            .collect()
    };

    let mut previous = x0.to_vec();
    let mut current = half_step(x0);
    let mut result: Vec<Vector3<f64>> = previous
        .par_iter()
        .zip(current.par_iter())
        .map(|(t0, t1)| coefficients[0] * t0 + coefficients[1] * t1)
        .collect();

    for &c in &coefficients[2..] {
        let next: Vec<Vector3<f64>> = half_step(&current)
            .into_par_iter()
            .zip(previous.par_iter())
            .map(|(m, prev)| 2.0 * m - prev)
            .collect();
        result
            .par_iter_mut()
            .zip(next.par_iter())
            .for_each(|(r, t)| *r += c * t);
        previous = std::mem::replace(&mut current, next);
    }

    debug!(iterations, pass_band, "Windowed sinc smoothing done");
    result
}

fn laplacian(
    stencils: &[Stencil],
    mut x: Vec<Vector3<f64>>,
    iterations: u32,
    relaxation: f64,
    tolerance: f64,
) -> Vec<Vector3<f64>> {
    for iteration in 0..iterations {
        let averaged = average(stencils, &x);
        let (next, max_move): (Vec<Vector3<f64>>, Vec<f64>) = averaged
            .into_par_iter()
            .zip(x.par_iter())
            .map(|(wx, xi)| {
                let step = relaxation * (wx - xi);
                (xi + step, step.norm())
            })
            .unzip();
        x = next;
        let max_move = max_move.into_iter().fold(0.0, f64::max);
        if max_move <= tolerance {
            debug!(iteration, max_move, "Laplacian smoothing converged");
            break;
        }
    }
    x
}
