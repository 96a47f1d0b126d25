//! Pixel space to patient space mapping.

use nalgebra::{Matrix3, Matrix4};
use tracing::debug;

use crate::types::SurfaceMesh;

/// Apply an affine transform to every vertex.
///
/// Normals, when present, go through the inverse transpose of the linear
/// part and are renormalized. Face winding is untouched; see
/// [`crate::orient`] for mirrored transforms.
pub fn transform_mesh(mesh: &SurfaceMesh, matrix: &Matrix4<f64>) -> SurfaceMesh {
    let linear: Matrix3<f64> = matrix.fixed_view::<3, 3>(0, 0).into_owned();
    let normal_matrix = linear
        .try_inverse()
        .map(|inv| inv.transpose())
        .unwrap_or(linear);

    let mut out = mesh.clone();
    for vertex in &mut out.vertices {
        vertex.position = matrix.transform_point(&vertex.position);
        if let Some(normal) = vertex.normal.as_mut() {
            *normal = (normal_matrix * *normal)
                .try_normalize(f64::EPSILON)
                .unwrap_or(*normal);
        }
    }
    debug!(vertices = out.vertex_count(), "Transformed mesh to patient space");
    out
}
