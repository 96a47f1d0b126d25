//! Isosurface extraction from label volumes.
//!
//! Each voxel cell is split into six tetrahedra sharing the cell diagonal
//! from corner `(0,0,0)` to `(1,1,1)`. The split matches across
//! neighboring cells, and vertices are shared per grid edge, so a region
//! that does not touch the volume border yields a closed manifold surface.
//! Triangles are wound so their normals point from inside to outside.

use hashbrown::HashMap;
use nalgebra::{Point3, Vector3};
use tracing::debug;

use crate::tracing_ext::log_mesh_stats;
use crate::types::{SurfaceMesh, Vertex};
use crate::volume::ScalarVolume;

/// Indicator value for voxels of the extracted label.
pub const INSIDE_VALUE: i32 = 200;
/// Indicator value for every other voxel.
pub const OUTSIDE_VALUE: i32 = 0;
/// Surface level between the indicator values.
pub const LABEL_ISO_VALUE: f64 = 100.5;

/// Cell corner offsets; corner `c` has offset bits `x = c & 1`,
/// `y = (c >> 1) & 1`, `z = (c >> 2) & 1`.
const CORNERS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [0, 1, 0],
    [1, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [0, 1, 1],
    [1, 1, 1],
];

const TETRAHEDRA: [[usize; 4]; 6] = [
    [0, 1, 3, 7],
    [0, 1, 5, 7],
    [0, 2, 3, 7],
    [0, 2, 6, 7],
    [0, 4, 5, 7],
    [0, 4, 6, 7],
];

/// Surface where the voxel values cross `iso_value`.
///
/// Voxels above `iso_value` are inside. Vertices are placed by linear
/// interpolation along grid edges, in pixel coordinates.
pub fn extract_isosurface(volume: &ScalarVolume, iso_value: f64) -> SurfaceMesh {
    let mut builder = SurfaceBuilder::new(volume);
    builder.for_each_cell(|builder, cell| {
        let inside = cell.values.map(|v| v as f64 > iso_value);
        if inside.iter().all(|&x| x) || inside.iter().all(|&x| !x) {
            return;
        }
        builder.polygonize(cell, inside, None, |a, b| {
            let (a, b) = (a as f64, b as f64);
            ((iso_value - a) / (b - a)).clamp(0.0, 1.0)
        });
    });
    let mesh = builder.finish(false);
    log_mesh_stats(&mesh, "isosurface");
    mesh
}

/// Surface of a single label, thresholded to indicator values and
/// extracted at [`LABEL_ISO_VALUE`].
pub fn extract_label(volume: &ScalarVolume, label: i32) -> SurfaceMesh {
    let mask = volume.threshold(label, INSIDE_VALUE, OUTSIDE_VALUE);
    extract_isosurface(&mask, LABEL_ISO_VALUE)
}

/// One surface bounding every label in `labels` (sorted ascending).
///
/// Each face records the label it bounds in `face_labels`. Where two
/// selected labels touch, both get a face over the shared vertices, so
/// [`SurfaceMesh::select_label`] returns a closed surface per label and
/// smoothing the joint surface moves shared boundaries consistently.
pub fn extract_labels(volume: &ScalarVolume, labels: &[i32]) -> SurfaceMesh {
    let mut builder = SurfaceBuilder::new(volume);
    builder.for_each_cell(|builder, cell| {
        let mut seen = [i32::MIN; 8];
        for (slot, &value) in cell.values.iter().enumerate() {
            if seen[..slot].contains(&value) || labels.binary_search(&value).is_err() {
                continue;
            }
            seen[slot] = value;
            let inside = cell.values.map(|v| v == value);
            if inside.iter().all(|&x| x) {
                continue;
            }
            builder.polygonize(cell, inside, Some(value), |_, _| 0.5);
        }
    });
    let mesh = builder.finish(true);
    debug!(labels = labels.len(), faces = mesh.face_count(), "Extracted joint label surface");
    log_mesh_stats(&mesh, "joint isosurface");
    mesh
}

struct Cell {
    indices: [usize; 8],
    values: [i32; 8],
    positions: [Point3<f64>; 8],
}

struct SurfaceBuilder<'a> {
    volume: &'a ScalarVolume,
    mesh: SurfaceMesh,
    face_labels: Vec<i32>,
    edge_vertices: HashMap<(usize, usize), u32>,
}

impl<'a> SurfaceBuilder<'a> {
    fn new(volume: &'a ScalarVolume) -> Self {
        Self {
            volume,
            mesh: SurfaceMesh::new(),
            face_labels: Vec::new(),
            edge_vertices: HashMap::new(),
        }
    }

    fn for_each_cell(&mut self, mut visit: impl FnMut(&mut Self, &Cell)) {
        let [nx, ny, nz] = self.volume.dims();
        for k in 0..nz - 1 {
            for j in 0..ny - 1 {
                for i in 0..nx - 1 {
                    let cell = self.cell(i, j, k);
                    visit(self, &cell);
                }
            }
        }
    }

    fn cell(&self, i: usize, j: usize, k: usize) -> Cell {
        let mut indices = [0; 8];
        let mut values = [0; 8];
        let mut positions = [Point3::origin(); 8];
        for (c, [dx, dy, dz]) in CORNERS.iter().enumerate() {
            let (x, y, z) = (i + dx, j + dy, k + dz);
            indices[c] = self.volume.index(x, y, z);
            values[c] = self.volume.data()[indices[c]];
            positions[c] = self.volume.position(x, y, z);
        }
        Cell {
            indices,
            values,
            positions,
        }
    }

    /// Emit the surface of every tetrahedron of `cell` that `inside` cuts.
    ///
    /// `weight(a, b)` is the crossing parameter from value `a` to value `b`,
    /// always evaluated from the lower grid index so shared edges agree.
    fn polygonize(
        &mut self,
        cell: &Cell,
        inside: [bool; 8],
        label: Option<i32>,
        weight: impl Fn(i32, i32) -> f64,
    ) {
        for tet in TETRAHEDRA {
            let mut ins = [0usize; 4];
            let mut outs = [0usize; 4];
            let (mut n_in, mut n_out) = (0, 0);
            for &c in &tet {
                if inside[c] {
                    ins[n_in] = c;
                    n_in += 1;
                } else {
                    outs[n_out] = c;
                    n_out += 1;
                }
            }

            let centroid = |corners: &[usize]| {
                corners
                    .iter()
                    .fold(Vector3::zeros(), |acc, &c| acc + cell.positions[c].coords)
                    / corners.len() as f64
            };
            let (ins, outs) = (&ins[..n_in], &outs[..n_out]);
            match n_in {
                1 => {
                    let direction = centroid(outs) - centroid(ins);
                    let tri = [
                        self.edge_vertex(cell, ins[0], outs[0], &weight),
                        self.edge_vertex(cell, ins[0], outs[1], &weight),
                        self.edge_vertex(cell, ins[0], outs[2], &weight),
                    ];
                    self.emit(tri, direction, label);
                }
                3 => {
                    let direction = centroid(outs) - centroid(ins);
                    let tri = [
                        self.edge_vertex(cell, outs[0], ins[0], &weight),
                        self.edge_vertex(cell, outs[0], ins[1], &weight),
                        self.edge_vertex(cell, outs[0], ins[2], &weight),
                    ];
                    self.emit(tri, direction, label);
                }
                2 => {
                    let direction = centroid(outs) - centroid(ins);
                    let ac = self.edge_vertex(cell, ins[0], outs[0], &weight);
                    let ad = self.edge_vertex(cell, ins[0], outs[1], &weight);
                    let bd = self.edge_vertex(cell, ins[1], outs[1], &weight);
                    let bc = self.edge_vertex(cell, ins[1], outs[0], &weight);
                    self.emit([ac, ad, bd], direction, label);
                    self.emit([ac, bd, bc], direction, label);
                }
                _ => {}
            }
        }
    }

    fn edge_vertex(&mut self, cell: &Cell, a: usize, b: usize, weight: &impl Fn(i32, i32) -> f64) -> u32 {
        let (lo, hi) = if cell.indices[a] < cell.indices[b] {
            (a, b)
        } else {
            (b, a)
        };
        let key = (cell.indices[lo], cell.indices[hi]);
        if let Some(&v) = self.edge_vertices.get(&key) {
            return v;
        }
        let t = weight(cell.values[lo], cell.values[hi]);
        let p0 = cell.positions[lo];
        let position = p0 + (cell.positions[hi] - p0) * t;
        let index = self.mesh.vertices.len() as u32;
        self.mesh.vertices.push(Vertex::new(position));
        self.edge_vertices.insert(key, index);
        index
    }

    fn emit(&mut self, mut tri: [u32; 3], direction: Vector3<f64>, label: Option<i32>) {
        if tri[0] == tri[1] || tri[1] == tri[2] || tri[0] == tri[2] {
            return;
        }
        let p = |i: u32| self.mesh.vertices[i as usize].position;
        let normal = (p(tri[1]) - p(tri[0])).cross(&(p(tri[2]) - p(tri[0])));
        if normal.dot(&direction) < 0.0 {
            tri.swap(1, 2);
        }
        self.mesh.faces.push(tri);
        if let Some(label) = label {
            self.face_labels.push(label);
        }
    }

    fn finish(self, labeled: bool) -> SurfaceMesh {
        let mut mesh = self.mesh;
        if labeled {
            mesh.face_labels = Some(self.face_labels);
        }
        mesh
    }
}
