//! Surface normals with optional splitting at sharp edges.

use nalgebra::Vector3;
use rayon::prelude::*;
use tracing::debug;

use crate::adjacency::{MeshAdjacency, normalize_edge};
use crate::types::{SurfaceMesh, Triangle};

/// Parameters for normal generation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "pipeline-config", serde(default))]
pub struct NormalsParams {
    /// Compute per-vertex normals. When false, one normal per face.
    pub point_normals: bool,
    /// Duplicate vertices along edges sharper than `feature_angle` so each
    /// side gets its own normal. Only applies to point normals.
    pub splitting: bool,
    /// Feature angle in degrees. Default: 60
    pub feature_angle: f64,
}

impl Default for NormalsParams {
    fn default() -> Self {
        Self {
            point_normals: true,
            splitting: true,
            feature_angle: 60.0,
        }
    }
}

/// A mesh ready for stripping.
#[derive(Debug, Clone)]
pub struct NormalsOutput {
    /// The mesh, with split vertices and point normals when requested.
    pub mesh: SurfaceMesh,
    /// One unit normal per face when point normals were not requested.
    pub face_normals: Option<Vec<Vector3<f64>>>,
}

/// Unit normal of every face, zero for degenerate faces.
pub fn face_normals(mesh: &SurfaceMesh) -> Vec<Vector3<f64>> {
    mesh.faces
        .par_iter()
        .map(|&[a, b, c]| {
            Triangle::new(
                mesh.vertices[a as usize].position,
                mesh.vertices[b as usize].position,
                mesh.vertices[c as usize].position,
            )
            .normal()
            .unwrap_or_else(Vector3::zeros)
        })
        .collect()
}

/// Compute normals as configured.
pub fn compute_normals(mesh: &SurfaceMesh, params: &NormalsParams) -> NormalsOutput {
    if !params.point_normals {
        let mut out = mesh.clone();
        for vertex in &mut out.vertices {
            vertex.normal = None;
        }
        let normals = face_normals(&out);
        return NormalsOutput {
            mesh: out,
            face_normals: Some(normals),
        };
    }

    let mut out = if params.splitting {
        split_sharp_edges(mesh, params.feature_angle)
    } else {
        mesh.clone()
    };
    assign_point_normals(&mut out);
    NormalsOutput {
        mesh: out,
        face_normals: None,
    }
}

/// Area-weighted average of the adjacent face normals.
fn assign_point_normals(mesh: &mut SurfaceMesh) {
    let mut accum = vec![Vector3::zeros(); mesh.vertices.len()];
    for face in &mesh.faces {
        let tri = Triangle::new(
            mesh.vertices[face[0] as usize].position,
            mesh.vertices[face[1] as usize].position,
            mesh.vertices[face[2] as usize].position,
        );
        // Use unnormalized normal (length = 2*area) for area weighting
        let weighted = tri.normal_unnormalized();
        for &v in face {
            accum[v as usize] += weighted;
        }
    }
    for (vertex, n) in mesh.vertices.iter_mut().zip(accum) {
        vertex.normal = n.try_normalize(f64::EPSILON);
    }
}

/// Duplicate vertices so no vertex is shared across a sharp edge.
///
/// Around each vertex the incident faces are grouped by walking across
/// smooth manifold edges. Every group after the first gets its own copy of
/// the vertex.
fn split_sharp_edges(mesh: &SurfaceMesh, feature_angle: f64) -> SurfaceMesh {
    let adjacency = MeshAdjacency::build(&mesh.faces, mesh.vertices.len());
    let normals = face_normals(mesh);
    let cos_limit = feature_angle.to_radians().cos();

    let smooth_across = |a: u32, b: u32| -> Option<(u32, u32)> {
        let faces = adjacency.edge_to_faces.get(&normalize_edge(a, b))?;
        match faces.as_slice() {
            &[f0, f1] if normals[f0 as usize].dot(&normals[f1 as usize]) >= cos_limit => Some((f0, f1)),
            _ => None,
        }
    };

    let mut out = mesh.clone();
    let mut splits = 0usize;

    for (v, incident) in adjacency.vertex_faces.iter().enumerate() {
        if incident.len() < 2 {
            continue;
        }
        let v = v as u32;

        // Union-find over the faces around v.
        let mut parent: Vec<usize> = (0..incident.len()).collect();
        for (slot, &f) in incident.iter().enumerate() {
            for &u in &mesh.faces[f as usize] {
                if u == v {
                    continue;
                }
                let Some((f0, f1)) = smooth_across(v, u) else {
                    continue;
                };
                let other = if f0 == f { f1 } else { f0 };
                if let Some(other_slot) = incident.iter().position(|&g| g == other) {
                    let (ra, rb) = (find(&mut parent, slot), find(&mut parent, other_slot));
                    if ra != rb {
                        parent[ra.max(rb)] = ra.min(rb);
                    }
                }
            }
        }

        let mut copies: Vec<(usize, u32)> = Vec::new();
        for (slot, &f) in incident.iter().enumerate() {
            let root = find(&mut parent, slot);
            if root == find(&mut parent, 0) {
                continue;
            }
            let target = match copies.iter().find(|(r, _)| *r == root) {
                Some(&(_, target)) => target,
                None => {
                    let target = out.vertices.len() as u32;
                    out.vertices.push(mesh.vertices[v as usize].clone());
                    copies.push((root, target));
                    target
                }
            };
            for slot in out.faces[f as usize].iter_mut().filter(|s| **s == v) {
                *slot = target;
            }
        }
        splits += copies.len();
    }

    debug!(
        split_vertices = splits,
        feature_angle, "Split vertices along sharp edges"
    );
    out
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}
