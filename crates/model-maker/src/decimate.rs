//! Mesh decimation using edge collapse with quadric error metrics.
//!
//! Collapses run cheapest first until the face count reaches the target or
//! no legal collapse remains. Boundary and non-manifold vertices stay in
//! place, vertices on feature edges only slide along their feature line,
//! and a collapse that would flip a face or pinch the surface is rejected.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::ops::{Add, AddAssign};

use nalgebra::{Matrix3, Point3, Vector3};
use tracing::{debug, trace};

use crate::adjacency::{EdgeRules, EdgeTreatment, MeshAdjacency, VertexClass, VertexConstraints};
use crate::types::{SurfaceMesh, Vertex};

/// Parameters for mesh decimation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "pipeline-config", serde(default))]
pub struct DecimateParams {
    /// Fraction of triangles to remove, 0.0 to 1.0. Default: 0.25
    pub target_reduction: f64,
    /// Largest collapse error allowed, as a fraction of the bounding box
    /// diagonal. Default: 1.0
    pub max_error: f64,
    /// Dihedral angle in degrees above which an edge is a feature edge.
    /// Default: 60
    pub feature_angle: f64,
    /// Reject collapses that would change the local topology. Default: true
    pub preserve_topology: bool,
    /// Keep boundary vertices in place. When false, boundary vertices slide
    /// along the boundary. Default: true
    pub preserve_boundary: bool,
}

impl Default for DecimateParams {
    fn default() -> Self {
        Self {
            target_reduction: 0.25,
            max_error: 1.0,
            feature_angle: 60.0,
            preserve_topology: true,
            preserve_boundary: true,
        }
    }
}

impl DecimateParams {
    /// Default params removing `reduction` of the triangles.
    pub fn with_target_reduction(reduction: f64) -> Self {
        Self {
            target_reduction: reduction.clamp(0.0, 1.0),
            ..Default::default()
        }
    }
}

/// Result of mesh decimation.
#[derive(Debug, Clone)]
pub struct DecimateResult {
    /// The decimated mesh.
    pub mesh: SurfaceMesh,
    /// Number of triangles in original mesh.
    pub original_triangles: usize,
    /// Number of triangles in decimated mesh.
    pub final_triangles: usize,
    /// Number of edge collapses performed.
    pub collapses_performed: usize,
    /// Number of edge collapses rejected (topology, flips or error bound).
    pub collapses_rejected: usize,
}

impl DecimateResult {
    fn unchanged(mesh: &SurfaceMesh) -> Self {
        Self {
            mesh: mesh.clone(),
            original_triangles: mesh.face_count(),
            final_triangles: mesh.face_count(),
            collapses_performed: 0,
            collapses_rejected: 0,
        }
    }
}

/// Sum of squared distances to a set of planes, as `vᵀAv + 2bᵀv + c`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Quadric {
    a: Matrix3<f64>,
    b: Vector3<f64>,
    c: f64,
}

impl Default for Quadric {
    fn default() -> Self {
        Self {
            a: Matrix3::zeros(),
            b: Vector3::zeros(),
            c: 0.0,
        }
    }
}

impl Quadric {
    /// Quadric of the plane `n·x + d = 0` with unit `n`.
    fn from_plane(normal: &Vector3<f64>, d: f64) -> Self {
        Self {
            a: normal * normal.transpose(),
            b: normal * d,
            c: d * d,
        }
    }

    fn evaluate(&self, p: &Point3<f64>) -> f64 {
        let v = p.coords;
        (v.dot(&(self.a * v)) + 2.0 * self.b.dot(&v) + self.c).max(0.0)
    }

    /// Point of least error, if the system is well conditioned.
    fn optimal_point(&self) -> Option<Point3<f64>> {
        if self.a.determinant().abs() < 1e-10 {
            return None;
        }
        self.a.try_inverse().map(|inv| Point3::from(-(inv * self.b)))
    }
}

impl Add for Quadric {
    type Output = Quadric;

    fn add(self, other: Quadric) -> Quadric {
        Quadric {
            a: self.a + other.a,
            b: self.b + other.b,
            c: self.c + other.c,
        }
    }
}

impl AddAssign for Quadric {
    fn add_assign(&mut self, other: Quadric) {
        *self = *self + other;
    }
}

/// A queued collapse of `remove` into `keep`.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    cost: f64,
    keep: u32,
    remove: u32,
    position: Point3<f64>,
    /// Vertex stamps when the candidate was computed.
    stamps: (u32, u32),
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap behavior (smaller cost = higher priority)
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.keep.cmp(&self.keep))
            .then_with(|| other.remove.cmp(&self.remove))
    }
}

struct Decimator<'a> {
    params: &'a DecimateParams,
    positions: Vec<Point3<f64>>,
    faces: Vec<[u32; 3]>,
    face_alive: Vec<bool>,
    alive_count: usize,
    vertex_faces: Vec<Vec<u32>>,
    quadrics: Vec<Quadric>,
    constraints: VertexConstraints,
    stamps: Vec<u32>,
    removed: Vec<bool>,
    max_cost: f64,
    heap: BinaryHeap<Candidate>,
}

impl<'a> Decimator<'a> {
    fn new(mesh: &SurfaceMesh, params: &'a DecimateParams) -> Self {
        let positions: Vec<Point3<f64>> = mesh.vertices.iter().map(|v| v.position).collect();
        let adjacency = MeshAdjacency::build(&mesh.faces, positions.len());
        let rules = EdgeRules {
            boundary: if params.preserve_boundary {
                EdgeTreatment::Fixed
            } else {
                EdgeTreatment::Constraint
            },
            non_manifold: EdgeTreatment::Fixed,
            feature_angle: Some(params.feature_angle),
        };
        let constraints = adjacency.classify_vertices(&positions, &mesh.faces, &rules);

        let mut quadrics = vec![Quadric::default(); positions.len()];
        for face in &mesh.faces {
            let [a, b, c] = face.map(|i| positions[i as usize]);
            let Some(normal) = (b - a).cross(&(c - a)).try_normalize(1e-300) else {
                continue;
            };
            let plane = Quadric::from_plane(&normal, -normal.dot(&a.coords));
            for &vi in face {
                quadrics[vi as usize] += plane;
            }
        }

        let max_distance = params.max_error * mesh.diagonal();
        let vertex_count = positions.len();

        let mut decimator = Self {
            params,
            positions,
            faces: mesh.faces.clone(),
            face_alive: vec![true; mesh.faces.len()],
            alive_count: mesh.faces.len(),
            vertex_faces: adjacency.vertex_faces.clone(),
            quadrics,
            constraints,
            stamps: vec![0; vertex_count],
            removed: vec![false; vertex_count],
            max_cost: max_distance * max_distance,
            heap: BinaryHeap::new(),
        };

        let mut edges: Vec<(u32, u32)> = adjacency.edge_to_faces.keys().copied().collect();
        edges.sort_unstable();
        for (a, b) in edges {
            if let Some(candidate) = decimator.candidate(a, b) {
                decimator.heap.push(candidate);
            }
        }
        decimator
    }

    fn alive_faces(&self, v: u32) -> impl Iterator<Item = u32> + '_ {
        self.vertex_faces[v as usize]
            .iter()
            .copied()
            .filter(|&f| self.face_alive[f as usize])
    }

    fn neighbors(&self, v: u32) -> Vec<u32> {
        let mut out: Vec<u32> = self
            .alive_faces(v)
            .flat_map(|f| self.faces[f as usize])
            .filter(|&u| u != v)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Best collapse of edge `(a, b)` allowed by the vertex constraints.
    fn candidate(&self, a: u32, b: u32) -> Option<Candidate> {
        use VertexClass::*;

        let q = self.quadrics[a as usize] + self.quadrics[b as usize];
        let (pa, pb) = (self.positions[a as usize], self.positions[b as usize]);
        let along = self.constraints.is_constraint_edge(a, b);

        let (keep, remove, position) = match (self.constraints.class(a), self.constraints.class(b)) {
            (Simple, Simple) => {
                let midpoint = Point3::from((pa.coords + pb.coords) * 0.5);
                let position = q
                    .optimal_point()
                    .into_iter()
                    .chain([midpoint, pa, pb])
                    .min_by(|x, y| q.evaluate(x).total_cmp(&q.evaluate(y)))?;
                (a, b, position)
            }
            (Simple, _) => (b, a, pb),
            (_, Simple) => (a, b, pa),
            (Constrained, Constrained) if along => {
                if q.evaluate(&pa) <= q.evaluate(&pb) {
                    (a, b, pa)
                } else {
                    (b, a, pb)
                }
            }
            (Constrained, Fixed) if along => (b, a, pb),
            (Fixed, Constrained) if along => (a, b, pa),
            _ => return None,
        };

        Some(Candidate {
            cost: q.evaluate(&position),
            keep,
            remove,
            position,
            stamps: (self.stamps[keep as usize], self.stamps[remove as usize]),
        })
    }

    fn is_stale(&self, c: &Candidate) -> bool {
        self.removed[c.keep as usize]
            || self.removed[c.remove as usize]
            || (self.stamps[c.keep as usize], self.stamps[c.remove as usize]) != c.stamps
    }

    fn is_valid(&self, c: &Candidate) -> bool {
        if c.cost > self.max_cost {
            return false;
        }

        let shared: Vec<u32> = self
            .alive_faces(c.remove)
            .filter(|&f| self.faces[f as usize].contains(&c.keep))
            .collect();
        if shared.is_empty() {
            return false;
        }

        if self.params.preserve_topology && !self.preserves_topology(c, &shared) {
            return false;
        }

        // No surviving face may flip or degenerate.
        for v in [c.keep, c.remove] {
            for f in self.alive_faces(v) {
                if shared.contains(&f) {
                    continue;
                }
                let face = self.faces[f as usize];
                let old = face.map(|i| self.positions[i as usize]);
                let new = face.map(|i| {
                    if i == c.keep || i == c.remove {
                        c.position
                    } else {
                        self.positions[i as usize]
                    }
                });
                let n_old = (old[1] - old[0]).cross(&(old[2] - old[0]));
                let n_new = (new[1] - new[0]).cross(&(new[2] - new[0]));
                if n_new.norm() <= f64::EPSILON * n_old.norm() || n_new.dot(&n_old) <= 0.0 {
                    return false;
                }
            }
        }
        true
    }

    /// Link condition plus valence limits.
    fn preserves_topology(&self, c: &Candidate, shared: &[u32]) -> bool {
        if shared.len() > 2 {
            return false;
        }

        let mut opposite: Vec<u32> = shared
            .iter()
            .filter_map(|&f| {
                self.faces[f as usize]
                    .into_iter()
                    .find(|&v| v != c.keep && v != c.remove)
            })
            .collect();
        opposite.sort_unstable();
        opposite.dedup();

        let keep_ring = self.neighbors(c.keep);
        let remove_ring = self.neighbors(c.remove);
        let common: Vec<u32> = keep_ring
            .iter()
            .copied()
            .filter(|v| remove_ring.binary_search(v).is_ok())
            .collect();
        if common != opposite {
            return false;
        }

        // Collapsing next to a valence-3 vertex would fold a tetrahedron flat.
        if opposite.iter().any(|&o| self.neighbors(o).len() <= 3) {
            return false;
        }

        let merged = keep_ring.len() + remove_ring.len() - common.len() - 2;
        merged >= 3
    }

    fn collapse(&mut self, c: &Candidate) {
        let (keep, remove) = (c.keep as usize, c.remove as usize);

        for f in std::mem::take(&mut self.vertex_faces[remove]) {
            if !self.face_alive[f as usize] {
                continue;
            }
            let face = &mut self.faces[f as usize];
            if face.contains(&c.keep) {
                self.face_alive[f as usize] = false;
                self.alive_count -= 1;
            } else {
                for slot in face.iter_mut().filter(|slot| **slot == c.remove) {
                    *slot = c.keep;
                }
                self.vertex_faces[keep].push(f);
            }
        }
        let alive = &self.face_alive;
        self.vertex_faces[keep].retain(|&f| alive[f as usize]);

        self.removed[remove] = true;
        self.positions[keep] = c.position;
        let merged = self.quadrics[remove];
        self.quadrics[keep] += merged;

        // Constraint edges of the removed vertex now end at the kept one.
        for other in std::mem::take(&mut self.constraints.constraint_neighbors[remove]) {
            let list = &mut self.constraints.constraint_neighbors[other as usize];
            list.retain(|&v| v != c.remove);
            if other != c.keep {
                list.push(c.keep);
                list.sort_unstable();
                list.dedup();
                self.constraints.constraint_neighbors[keep].push(other);
            }
        }
        let keep_list = &mut self.constraints.constraint_neighbors[keep];
        keep_list.retain(|&v| v != c.remove);
        keep_list.sort_unstable();
        keep_list.dedup();
        if self.constraints.classes[keep] == VertexClass::Constrained && keep_list.len() != 2 {
            self.constraints.classes[keep] = VertexClass::Fixed;
        }

        self.stamps[keep] += 1;
        self.stamps[remove] += 1;

        for neighbor in self.neighbors(c.keep) {
            if let Some(candidate) = self.candidate(c.keep.min(neighbor), c.keep.max(neighbor)) {
                self.heap.push(candidate);
            }
        }
    }

    fn finish(self, face_labels: Option<&Vec<i32>>) -> SurfaceMesh {
        let mut remap = vec![u32::MAX; self.positions.len()];
        for (face, _) in self.faces.iter().zip(&self.face_alive).filter(|(_, a)| **a) {
            for &v in face {
                remap[v as usize] = 0;
            }
        }

        let mut out = SurfaceMesh::new();
        for (v, slot) in remap.iter_mut().enumerate() {
            if *slot == 0 {
                *slot = out.vertices.len() as u32;
                out.vertices.push(Vertex::new(self.positions[v]));
            }
        }

        let mut labels = face_labels.map(|_| Vec::with_capacity(self.alive_count));
        for (fi, face) in self.faces.iter().enumerate() {
            if !self.face_alive[fi] {
                continue;
            }
            out.faces.push(face.map(|v| remap[v as usize]));
            if let (Some(labels), Some(source)) = (labels.as_mut(), face_labels) {
                labels.push(source[fi]);
            }
        }
        out.face_labels = labels;
        out
    }
}

/// Decimate a mesh using edge collapse with quadric error metrics.
///
/// Aims for `ceil(faces * (1 - target_reduction))` triangles. The result can
/// keep more when constraints block further collapses. The output drops
/// normals, which the normals stage recomputes.
pub fn decimate_mesh(mesh: &SurfaceMesh, params: &DecimateParams) -> DecimateResult {
    let original_triangles = mesh.face_count();
    let reduction = params.target_reduction.clamp(0.0, 1.0);
    if original_triangles == 0 || reduction <= 0.0 {
        return DecimateResult::unchanged(mesh);
    }

    let target = ((original_triangles as f64) * (1.0 - reduction)).ceil() as usize;
    let mut decimator = Decimator::new(mesh, params);
    let mut collapses_performed = 0;
    let mut collapses_rejected = 0;

    while decimator.alive_count > target {
        let Some(candidate) = decimator.heap.pop() else {
            break;
        };
        if decimator.is_stale(&candidate) {
            continue;
        }
        if !decimator.is_valid(&candidate) {
            collapses_rejected += 1;
            continue;
        }
        trace!(
            keep = candidate.keep,
            remove = candidate.remove,
            cost = candidate.cost,
            "Collapsing edge"
        );
        decimator.collapse(&candidate);
        collapses_performed += 1;
    }

    let out = decimator.finish(mesh.face_labels.as_ref());
    debug!(
        original = original_triangles,
        target,
        final_triangles = out.face_count(),
        collapses_performed,
        collapses_rejected,
        "Decimated mesh"
    );

    DecimateResult {
        final_triangles: out.face_count(),
        mesh: out,
        original_triangles,
        collapses_performed,
        collapses_rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isosurface::extract_label;
    use crate::volume::{ScalarType, ScalarVolume};
    use approx::assert_relative_eq;
    use nalgebra::Matrix4;

    fn ball(radius: f64) -> SurfaceMesh {
        let n = (2.0 * radius) as usize + 5;
        let c = (n as f64 - 1.0) / 2.0;
        let volume = ScalarVolume::from_fn([n, n, n], ScalarType::U8, Matrix4::identity(), |i, j, k| {
            let d = ((i as f64 - c).powi(2) + (j as f64 - c).powi(2) + (k as f64 - c).powi(2)).sqrt();
            if d <= radius { 1 } else { 0 }
        })
        .unwrap();
        extract_label(&volume, 1)
    }

    /// Flat `n` x `n` grid in the z = 0 plane, columns past `fold` bent up
    /// into the x = `fold` plane.
    fn grid(n: u32, fold: Option<u32>) -> SurfaceMesh {
        let mut mesh = SurfaceMesh::new();
        for y in 0..=n {
            for x in 0..=n {
                let (px, pz) = match fold {
                    Some(f) if x > f => (f as f64, (x - f) as f64),
                    _ => (x as f64, 0.0),
                };
                mesh.vertices.push(Vertex::from_coords(px, y as f64, pz));
            }
        }
        let row = n + 1;
        for y in 0..n {
            for x in 0..n {
                let v = y * row + x;
                mesh.faces.push([v, v + 1, v + row + 1]);
                mesh.faces.push([v, v + row + 1, v + row]);
            }
        }
        mesh
    }

    fn tetrahedron() -> SurfaceMesh {
        let mut mesh = SurfaceMesh::new();
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(0.0, 1.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 1.0));
        mesh.faces = vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]];
        mesh
    }

    #[test]
    fn test_decimate_empty_mesh() {
        let mesh = SurfaceMesh::default();
        let result = decimate_mesh(&mesh, &DecimateParams::default());
        assert_eq!(result.original_triangles, 0);
        assert_eq!(result.final_triangles, 0);
        assert_eq!(result.collapses_performed, 0);
    }

    #[test]
    fn test_zero_reduction_is_identity() {
        let mesh = ball(4.0);
        let result = decimate_mesh(&mesh, &DecimateParams::with_target_reduction(0.0));
        assert_eq!(result.final_triangles, mesh.face_count());
        assert_eq!(result.mesh.vertices, mesh.vertices);
        assert_eq!(result.mesh.faces, mesh.faces);
    }

    #[test]
    fn test_decimate_ball_stays_closed() {
        let mesh = ball(5.0);
        let result = decimate_mesh(&mesh, &DecimateParams::with_target_reduction(0.5));

        assert_eq!(result.original_triangles, mesh.face_count());
        assert!(result.final_triangles < result.original_triangles);
        assert!(result.final_triangles + 2 >= result.original_triangles / 2);
        assert!(result.collapses_performed > 0);

        let adj = MeshAdjacency::build(&result.mesh.faces, result.mesh.vertex_count());
        assert!(adj.is_closed_manifold());

        let before = mesh.signed_volume();
        let after = result.mesh.signed_volume();
        assert!(after > 0.0);
        assert!((after - before).abs() / before < 0.15);
    }

    #[test]
    fn test_decimate_tetrahedron_refused() {
        let result = decimate_mesh(&tetrahedron(), &DecimateParams::with_target_reduction(0.9));
        assert_eq!(result.final_triangles, 4);
        assert_eq!(result.collapses_performed, 0);
    }

    #[test]
    fn test_decimate_preserves_boundary_by_default() {
        let mesh = grid(6, None);
        let result = decimate_mesh(&mesh, &DecimateParams::with_target_reduction(0.6));
        assert!(result.final_triangles < mesh.face_count());

        let kept: Vec<Point3<f64>> = result.mesh.vertices.iter().map(|v| v.position).collect();
        for v in &mesh.vertices {
            let p = v.position;
            let on_boundary = p.x == 0.0 || p.y == 0.0 || p.x == 6.0 || p.y == 6.0;
            if on_boundary {
                assert!(kept.contains(&p), "boundary vertex {p:?} moved");
            }
        }
    }

    #[test]
    fn test_decimate_keeps_feature_line() {
        let mesh = grid(6, Some(3));
        let result = decimate_mesh(&mesh, &DecimateParams::with_target_reduction(0.5));
        assert!(result.collapses_performed > 0);
        for v in &result.mesh.vertices {
            let p = v.position;
            assert!(
                p.z.abs() < 1e-9 || (p.x - 3.0).abs() < 1e-9,
                "vertex {p:?} left both planes"
            );
        }
    }

    #[test]
    fn test_decimate_carries_face_labels() {
        let mut mesh = grid(4, None);
        mesh.face_labels = Some(vec![7; mesh.face_count()]);
        let result = decimate_mesh(&mesh, &DecimateParams::with_target_reduction(0.5));
        let labels = result.mesh.face_labels.unwrap();
        assert_eq!(labels.len(), result.final_triangles);
        assert!(labels.iter().all(|&l| l == 7));
    }

    #[test]
    fn test_quadric_from_plane() {
        let q = Quadric::from_plane(&Vector3::z(), 0.0);

        // Points on the z=0 plane should have zero error
        assert_relative_eq!(q.evaluate(&Point3::origin()), 0.0);
        assert_relative_eq!(q.evaluate(&Point3::new(1.0, 2.0, 0.0)), 0.0);

        // Points off the plane should have non-zero error
        assert_relative_eq!(q.evaluate(&Point3::new(0.0, 0.0, 2.0)), 4.0);
    }

    #[test]
    fn test_quadric_optimal_point() {
        let q = Quadric::from_plane(&Vector3::x(), -1.0)
            + Quadric::from_plane(&Vector3::y(), -2.0)
            + Quadric::from_plane(&Vector3::z(), -3.0);
        let opt = q.optimal_point().unwrap();
        assert_relative_eq!(opt, Point3::new(1.0, 2.0, 3.0), epsilon = 1e-9);

        // Two parallel planes leave the system singular.
        let parallel = Quadric::from_plane(&Vector3::z(), 0.0) + Quadric::from_plane(&Vector3::z(), -2.0);
        assert!(parallel.optimal_point().is_none());
    }

    #[test]
    fn test_candidate_ordering_is_min_first() {
        let mut heap = BinaryHeap::new();
        for (cost, keep) in [(3.0, 0), (1.0, 1), (2.0, 2)] {
            heap.push(Candidate {
                cost,
                keep,
                remove: 9,
                position: Point3::origin(),
                stamps: (0, 0),
            });
        }
        assert_eq!(heap.pop().map(|c| c.keep), Some(1));
        assert_eq!(heap.pop().map(|c| c.keep), Some(2));
    }
}
