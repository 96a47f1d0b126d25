//! Core mesh types.

use nalgebra::{Point3, Vector3};

/// A mesh vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    /// 3D position (voxel index space until the space transform runs).
    pub position: Point3<f64>,

    /// Unit normal, set by the normals stage.
    pub normal: Option<Vector3<f64>>,
}

impl Vertex {
    /// Create a new vertex with only position set.
    #[inline]
    pub fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            normal: None,
        }
    }

    /// Create a vertex from raw coordinates.
    #[inline]
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point3::new(x, y, z))
    }
}

/// A triangle surface mesh with indexed vertices.
///
/// Faces are wound counter-clockwise when viewed from outside the labeled
/// region, so face normals point away from the label.
#[derive(Debug, Clone, Default)]
pub struct SurfaceMesh {
    /// Vertex data.
    pub vertices: Vec<Vertex>,

    /// Triangle faces as indices into the vertex array.
    pub faces: Vec<[u32; 3]>,

    /// Label of the region each face bounds. Only set by multi-label
    /// extraction, where one surface carries every label.
    pub face_labels: Option<Vec<i32>>,
}

impl SurfaceMesh {
    /// Create a new empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mesh with pre-allocated capacity.
    pub fn with_capacity(vertex_count: usize, face_count: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertex_count),
            faces: Vec::with_capacity(face_count),
            face_labels: None,
        }
    }

    /// Number of vertices in the mesh.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of faces (triangles) in the mesh.
    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Check if mesh has no polygons.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Compute the axis-aligned bounding box.
    /// Returns (min_corner, max_corner) or None if mesh has no vertices.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = self.vertices.first()?.position;
        let mut min = first;
        let mut max = first;

        for vertex in &self.vertices[1..] {
            let p = &vertex.position;
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            min.z = min.z.min(p.z);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            max.z = max.z.max(p.z);
        }

        Some((min, max))
    }

    /// Length of the bounding box diagonal, 0 for an empty mesh.
    pub fn diagonal(&self) -> f64 {
        self.bounds().map(|(min, max)| (max - min).norm()).unwrap_or(0.0)
    }

    /// Iterate over triangles, yielding Triangle structs with actual vertex data.
    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        self.faces.iter().map(|&[i0, i1, i2]| Triangle {
            v0: self.vertices[i0 as usize].position,
            v1: self.vertices[i1 as usize].position,
            v2: self.vertices[i2 as usize].position,
        })
    }

    /// Get a specific triangle by face index.
    pub fn triangle(&self, face_idx: usize) -> Option<Triangle> {
        self.faces.get(face_idx).map(|&[i0, i1, i2]| Triangle {
            v0: self.vertices[i0 as usize].position,
            v1: self.vertices[i1 as usize].position,
            v2: self.vertices[i2 as usize].position,
        })
    }

    /// Compute the signed volume of the mesh.
    ///
    /// Positive when faces are wound outward on a closed surface.
    pub fn signed_volume(&self) -> f64 {
        self.triangles()
            .map(|t| t.v0.coords.dot(&t.v1.coords.cross(&t.v2.coords)))
            .sum::<f64>()
            / 6.0
    }

    /// Total surface area.
    pub fn surface_area(&self) -> f64 {
        self.triangles().map(|tri| tri.area()).sum()
    }

    /// Extract the faces bounding one label from a multi-label surface.
    ///
    /// Vertices are compacted so the result only references what it uses.
    /// Returns an empty mesh when no face carries `label` or when the mesh
    /// has no face labels.
    pub fn select_label(&self, label: i32) -> SurfaceMesh {
        let Some(labels) = &self.face_labels else {
            return SurfaceMesh::new();
        };

        let mut remap = vec![u32::MAX; self.vertices.len()];
        let mut out = SurfaceMesh::new();

        for (face, &face_label) in self.faces.iter().zip(labels) {
            if face_label != label {
                continue;
            }
            let mut new_face = [0u32; 3];
            for (slot, &vi) in new_face.iter_mut().zip(face) {
                let mapped = &mut remap[vi as usize];
                if *mapped == u32::MAX {
                    *mapped = out.vertices.len() as u32;
                    out.vertices.push(self.vertices[vi as usize].clone());
                }
                *slot = *mapped;
            }
            out.faces.push(new_face);
        }

        out
    }

    /// Check that every face index is in range, every position is finite
    /// and face labels, when present, match the face count.
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        let n = self.vertices.len() as u32;
        if let Some((fi, face)) = self
            .faces
            .iter()
            .enumerate()
            .find(|(_, f)| f.iter().any(|&v| v >= n))
        {
            return Err(format!(
                "face {} references vertex {:?} but the mesh has {} vertices",
                fi, face, n
            ));
        }
        if let Some(vi) = self
            .vertices
            .iter()
            .position(|v| !v.position.coords.iter().all(|c| c.is_finite()))
        {
            return Err(format!("vertex {} has a non-finite position", vi));
        }
        if let Some(labels) = &self.face_labels
            && labels.len() != self.faces.len()
        {
            return Err(format!(
                "{} face labels for {} faces",
                labels.len(),
                self.faces.len()
            ));
        }
        Ok(())
    }
}

/// A triangle with concrete vertex positions.
#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    pub v0: Point3<f64>,
    pub v1: Point3<f64>,
    pub v2: Point3<f64>,
}

impl Triangle {
    /// Create a new triangle from three points.
    #[inline]
    pub fn new(v0: Point3<f64>, v1: Point3<f64>, v2: Point3<f64>) -> Self {
        Self { v0, v1, v2 }
    }

    /// Compute the (unnormalized) face normal via cross product.
    /// The direction follows the right-hand rule with CCW winding.
    #[inline]
    pub fn normal_unnormalized(&self) -> Vector3<f64> {
        let e1 = self.v1 - self.v0;
        let e2 = self.v2 - self.v0;
        e1.cross(&e2)
    }

    /// Compute the unit face normal.
    /// Returns None for degenerate triangles (zero area).
    pub fn normal(&self) -> Option<Vector3<f64>> {
        let n = self.normal_unnormalized();
        let len_sq = n.norm_squared();
        if len_sq > f64::EPSILON * f64::EPSILON {
            Some(n / len_sq.sqrt())
        } else {
            None
        }
    }

    /// Compute the area of the triangle.
    #[inline]
    pub fn area(&self) -> f64 {
        self.normal_unnormalized().norm() * 0.5
    }

    /// Compute the centroid.
    #[inline]
    pub fn centroid(&self) -> Point3<f64> {
        Point3::from((self.v0.coords + self.v1.coords + self.v2.coords) / 3.0)
    }
}

/// Final storage form of a model: triangle strips plus normals.
///
/// Strip `[a, b, c, d, e]` encodes triangles `(a, b, c)`, `(c, b, d)`,
/// `(c, d, e)`: every odd triangle swaps its first two vertices so all
/// decoded triangles keep the winding of the source faces.
#[derive(Debug, Clone, Default)]
pub struct StripMesh {
    /// Vertex data, with normals when point normals were requested.
    pub vertices: Vec<Vertex>,

    /// Triangle strips as indices into `vertices`.
    pub strips: Vec<Vec<u32>>,

    /// One unit normal per decoded triangle, in strip order, when face
    /// normals were requested.
    pub face_normals: Option<Vec<Vector3<f64>>>,
}

impl StripMesh {
    /// Number of triangles encoded by all strips.
    pub fn triangle_count(&self) -> usize {
        self.strips.iter().map(|s| s.len().saturating_sub(2)).sum()
    }

    /// Expand the strips back into triangles with the original winding.
    pub fn triangles(&self) -> Vec<[u32; 3]> {
        let mut out = Vec::with_capacity(self.triangle_count());
        for strip in &self.strips {
            for k in 0..strip.len().saturating_sub(2) {
                if k % 2 == 0 {
                    out.push([strip[k], strip[k + 1], strip[k + 2]]);
                } else {
                    out.push([strip[k + 1], strip[k], strip[k + 2]]);
                }
            }
        }
        out
    }

    /// Convert back to an indexed triangle mesh.
    pub fn to_surface_mesh(&self) -> SurfaceMesh {
        SurfaceMesh {
            vertices: self.vertices.clone(),
            faces: self.triangles(),
            face_labels: None,
        }
    }
}
