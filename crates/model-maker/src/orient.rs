//! Winding correction for mirrored volume transforms.
//!
//! Surfaces are extracted in pixel space with outward winding. When the
//! IJK to LPS transform has a negative determinant it mirrors space, and
//! every face would point inward once transformed, so the winding is
//! reversed up front.

use nalgebra::Matrix4;
use tracing::debug;

use crate::types::SurfaceMesh;

/// Whether a transform mirrors space and so needs reversed winding.
///
/// Computed once per run from the IJK to LPS matrix.
pub fn needs_reversal(ijk_to_lps: &Matrix4<f64>) -> bool {
    ijk_to_lps.fixed_view::<3, 3>(0, 0).determinant() < 0.0
}

/// Reverse the winding of every face and negate any vertex normals.
pub fn reverse_orientation(mesh: &SurfaceMesh) -> SurfaceMesh {
    let mut out = mesh.clone();
    for face in &mut out.faces {
        face.swap(1, 2);
    }
    for normal in out.vertices.iter_mut().filter_map(|v| v.normal.as_mut()) {
        *normal = -*normal;
    }
    debug!(faces = out.face_count(), "Reversed face orientation");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vertex;
    use crate::volume::ras_to_lps;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    #[test]
    fn test_needs_reversal() {
        // RAS identity becomes LPS diag(-1, -1, 1): two flips, no mirror.
        assert!(!needs_reversal(&(ras_to_lps() * Matrix4::identity())));

        let mirrored = ras_to_lps() * Matrix4::new_nonuniform_scaling(&Vector3::new(-1.0, 1.0, 1.0));
        assert!(needs_reversal(&mirrored));
    }

    #[test]
    fn test_reverse_flips_volume_sign() {
        let mut mesh = SurfaceMesh::new();
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(0.0, 1.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 1.0));
        mesh.faces = vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]];
        mesh.vertices[3].normal = Some(Vector3::z());

        let reversed = reverse_orientation(&mesh);
        assert_relative_eq!(reversed.signed_volume(), -mesh.signed_volume());
        assert_eq!(reversed.faces[0], [0, 1, 2]);
        assert_eq!(reversed.vertices[3].normal, Some(-Vector3::z()));
        assert_eq!(reversed.vertices[0].normal, None);
    }
}
