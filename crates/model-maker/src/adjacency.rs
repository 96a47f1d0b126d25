//! Edge and vertex adjacency for triangle meshes.

use hashbrown::HashMap;
use nalgebra::{Point3, Vector3};

/// Face and vertex adjacency of a triangle mesh.
#[derive(Debug, Clone, Default)]
pub struct MeshAdjacency {
    /// Undirected edge `(min, max)` to the faces that use it.
    pub edge_to_faces: HashMap<(u32, u32), Vec<u32>>,

    /// Faces incident to each vertex.
    pub vertex_faces: Vec<Vec<u32>>,
}

impl MeshAdjacency {
    /// Build adjacency for `faces` over `vertex_count` vertices.
    pub fn build(faces: &[[u32; 3]], vertex_count: usize) -> Self {
        let mut edge_to_faces: HashMap<(u32, u32), Vec<u32>> =
            HashMap::with_capacity(faces.len() * 3 / 2);
        let mut vertex_faces = vec![Vec::new(); vertex_count];

        for (fi, face) in faces.iter().enumerate() {
            let fi = fi as u32;
            for i in 0..3 {
                let edge = normalize_edge(face[i], face[(i + 1) % 3]);
                edge_to_faces.entry(edge).or_default().push(fi);
                vertex_faces[face[i] as usize].push(fi);
            }
        }

        Self {
            edge_to_faces,
            vertex_faces,
        }
    }

    /// Edges used by exactly one face.
    pub fn boundary_edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.edge_to_faces
            .iter()
            .filter(|(_, f)| f.len() == 1)
            .map(|(&e, _)| e)
    }

    /// Edges used by more than two faces.
    pub fn non_manifold_edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.edge_to_faces
            .iter()
            .filter(|(_, f)| f.len() > 2)
            .map(|(&e, _)| e)
    }

    /// Whether every edge is shared by exactly two faces.
    pub fn is_closed_manifold(&self) -> bool {
        self.edge_to_faces.values().all(|f| f.len() == 2)
    }

    /// Sorted, de-duplicated one-ring neighbors of every vertex.
    pub fn vertex_neighbors(faces: &[[u32; 3]], vertex_count: usize) -> Vec<Vec<u32>> {
        let mut neighbors = vec![Vec::new(); vertex_count];
        for face in faces {
            for i in 0..3 {
                let a = face[i];
                let b = face[(i + 1) % 3];
                neighbors[a as usize].push(b);
                neighbors[b as usize].push(a);
            }
        }
        for list in &mut neighbors {
            list.sort_unstable();
            list.dedup();
        }
        neighbors
    }
}

/// Normalize edge so smaller index comes first.
#[inline]
pub fn normalize_edge(v1: u32, v2: u32) -> (u32, u32) {
    if v1 < v2 { (v1, v2) } else { (v2, v1) }
}

/// How an edge class restricts its endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeTreatment {
    /// Endpoints never move.
    Fixed,
    /// Endpoints may only move along the edge chain.
    Constraint,
    /// No restriction.
    Ordinary,
}

/// Edge classification rules for smoothing and decimation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeRules {
    /// Edges used by one face.
    pub boundary: EdgeTreatment,
    /// Edges used by more than two faces.
    pub non_manifold: EdgeTreatment,
    /// Dihedral angle in degrees above which a two-face edge becomes a
    /// constraint edge. `None` disables feature edges.
    pub feature_angle: Option<f64>,
}

/// Movement freedom of a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexClass {
    /// Moves freely.
    Simple,
    /// Lies on exactly two constraint edges and moves along them.
    Constrained,
    /// Never moves.
    Fixed,
}

/// Per-vertex classes plus the constraint edges they lie on.
#[derive(Debug, Clone, Default)]
pub struct VertexConstraints {
    pub classes: Vec<VertexClass>,
    /// Sorted endpoints of the constraint edges at each vertex.
    pub constraint_neighbors: Vec<Vec<u32>>,
}

impl VertexConstraints {
    pub fn class(&self, v: u32) -> VertexClass {
        self.classes[v as usize]
    }

    pub fn is_constraint_edge(&self, a: u32, b: u32) -> bool {
        self.constraint_neighbors[a as usize].binary_search(&b).is_ok()
    }
}

impl MeshAdjacency {
    /// Classify every vertex under `rules`.
    ///
    /// A vertex on one constraint edge, or on more than two, is fixed.
    /// Vertices used by no face are fixed too.
    pub fn classify_vertices(
        &self,
        positions: &[Point3<f64>],
        faces: &[[u32; 3]],
        rules: &EdgeRules,
    ) -> VertexConstraints {
        let n = positions.len();
        let mut fixed = vec![false; n];
        let mut constraint_neighbors = vec![Vec::new(); n];
        let cos_feature = rules.feature_angle.map(|deg| deg.to_radians().cos());

        let face_normal = |fi: u32| -> Option<Vector3<f64>> {
            let [a, b, c] = faces[fi as usize];
            let (pa, pb, pc) = (
                positions[a as usize],
                positions[b as usize],
                positions[c as usize],
            );
            (pb - pa).cross(&(pc - pa)).try_normalize(1e-300)
        };

        for (&(a, b), edge_faces) in &self.edge_to_faces {
            let treatment = match edge_faces.len() {
                1 => rules.boundary,
                2 => match cos_feature {
                    Some(cos_limit) => match (face_normal(edge_faces[0]), face_normal(edge_faces[1])) {
                        (Some(n0), Some(n1)) if n0.dot(&n1) < cos_limit => EdgeTreatment::Constraint,
                        _ => EdgeTreatment::Ordinary,
                    },
                    None => EdgeTreatment::Ordinary,
                },
                _ => rules.non_manifold,
            };
            match treatment {
                EdgeTreatment::Fixed => {
                    fixed[a as usize] = true;
                    fixed[b as usize] = true;
                }
                EdgeTreatment::Constraint => {
                    constraint_neighbors[a as usize].push(b);
                    constraint_neighbors[b as usize].push(a);
                }
                EdgeTreatment::Ordinary => {}
            }
        }

        let classes = (0..n)
            .map(|v| {
                constraint_neighbors[v].sort_unstable();
                if fixed[v] || self.vertex_faces.get(v).is_none_or(|f| f.is_empty()) {
                    return VertexClass::Fixed;
                }
                match constraint_neighbors[v].len() {
                    0 => VertexClass::Simple,
                    2 => VertexClass::Constrained,
                    _ => VertexClass::Fixed,
                }
            })
            .collect();

        VertexConstraints {
            classes,
            constraint_neighbors,
        }
    }
}
