//! Edge case tests for the surface stages.
//!
//! Empty and minimal inputs, labels touching the volume border, and
//! volumes with unusual transforms must go through every stage without
//! panicking.

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::{Matrix4, Vector4};

    use crate::adjacency::MeshAdjacency;
    use crate::decimate::{DecimateParams, decimate_mesh};
    use crate::isosurface::{extract_label, extract_labels};
    use crate::normals::{NormalsParams, compute_normals};
    use crate::orient::{needs_reversal, reverse_orientation};
    use crate::smooth::{SmoothParams, smooth_mesh};
    use crate::strips::build_strips;
    use crate::transform::transform_mesh;
    use crate::volume::{ScalarType, ScalarVolume};
    use crate::{SurfaceMesh, Vertex};

    fn single_triangle() -> SurfaceMesh {
        SurfaceMesh {
            vertices: vec![
                Vertex::from_coords(0.0, 0.0, 0.0),
                Vertex::from_coords(1.0, 0.0, 0.0),
                Vertex::from_coords(0.0, 1.0, 0.0),
            ],
            faces: vec![[0, 1, 2]],
            face_labels: None,
        }
    }

    fn filled(dims: [usize; 3], label: i32) -> ScalarVolume {
        ScalarVolume::from_fn(dims, ScalarType::I16, Matrix4::identity(), |_, _, _| label).unwrap()
    }

    // ==================== Empty Mesh Tests ====================

    #[test]
    fn test_empty_mesh_through_every_stage() {
        let mesh = SurfaceMesh::new();
        let decimated = decimate_mesh(&mesh, &DecimateParams::default());
        assert!(decimated.mesh.is_empty());
        assert!(smooth_mesh(&mesh, &SmoothParams::sinc(10)).is_empty());
        assert!(smooth_mesh(&mesh, &SmoothParams::laplacian(10)).is_empty());
        assert!(reverse_orientation(&mesh).is_empty());
        assert!(transform_mesh(&mesh, &Matrix4::identity()).is_empty());
        let normals = compute_normals(&mesh, &NormalsParams::default());
        assert!(normals.mesh.is_empty());
        assert_eq!(build_strips(&normals.mesh, None).triangle_count(), 0);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_empty_mesh_bounds() {
        let mesh = SurfaceMesh::new();
        assert!(mesh.bounds().is_none());
        assert_eq!(mesh.signed_volume(), 0.0);
    }

    // ==================== Single Triangle Tests ====================

    #[test]
    fn test_single_triangle_stages() {
        let mesh = single_triangle();
        let decimated = decimate_mesh(&mesh, &DecimateParams::with_target_reduction(0.9));
        // Every vertex is on the boundary, nothing can collapse.
        assert_eq!(decimated.final_triangles, 1);

        let smoothed = smooth_mesh(&mesh, &SmoothParams::sinc(10));
        for (a, b) in smoothed.vertices.iter().zip(&mesh.vertices) {
            assert_eq!(a.position, b.position);
        }

        let normals = compute_normals(&mesh, &NormalsParams::default());
        assert_eq!(normals.mesh.vertex_count(), 3);
        assert_eq!(build_strips(&normals.mesh, None).strips, vec![vec![0, 1, 2]]);
    }

    // ==================== Volume Edge Cases ====================

    #[test]
    fn test_label_filling_volume_has_no_surface() {
        let volume = filled([5, 5, 5], 1);
        assert!(extract_label(&volume, 1).is_empty());
        assert!(extract_label(&volume, 2).is_empty());
    }

    #[test]
    fn test_padding_closes_border_labels() {
        let volume = filled([5, 5, 5], 1).padded();
        let mesh = extract_label(&volume, 1);
        assert!(!mesh.is_empty());
        assert!(MeshAdjacency::build(&mesh.faces, mesh.vertex_count()).is_closed_manifold());

        // Padding shifts the origin so the surface stays in the original
        // voxel index frame.
        let (min, max) = mesh.bounds().unwrap();
        assert_relative_eq!(min.x, -0.5, epsilon = 0.01);
        assert_relative_eq!(max.z, 4.5, epsilon = 0.01);
    }

    #[test]
    fn test_single_voxel_label() {
        let volume = ScalarVolume::from_fn([3, 3, 3], ScalarType::U8, Matrix4::identity(), |i, j, k| {
            if (i, j, k) == (1, 1, 1) { 4 } else { 0 }
        })
        .unwrap();
        let mesh = extract_label(&volume, 4);
        assert!(!mesh.is_empty());
        assert!(mesh.signed_volume() > 0.0);
        let decimated = decimate_mesh(&mesh, &DecimateParams::with_target_reduction(0.9));
        assert!(decimated.final_triangles >= 4);
        assert!(decimated.mesh.validate().is_ok());
    }

    #[test]
    fn test_joint_extraction_without_labels() {
        let volume = filled([4, 4, 4], 0);
        assert!(extract_labels(&volume, &[]).is_empty());
        assert!(extract_labels(&volume, &[1, 2]).is_empty());
    }

    #[test]
    fn test_degenerate_volume_rejected() {
        let result = ScalarVolume::new([4, 4, 1], vec![0; 16], ScalarType::U8, Matrix4::identity());
        assert!(matches!(result, Err(crate::ModelError::DegenerateVolume { .. })));
    }

    // ==================== Transform Edge Cases ====================

    #[test]
    fn test_mirrored_volume_reverses() {
        let mirror = Matrix4::from_diagonal(&Vector4::new(1.0, -1.0, 1.0, 1.0));
        let volume = ScalarVolume::from_fn([4, 4, 4], ScalarType::U8, mirror, |_, _, _| 0).unwrap();
        // RAS to LPS flips two axes, so one mirrored axis leaves a flip.
        assert!(needs_reversal(&volume.ijk_to_lps()));
        assert!(!needs_reversal(&filled([4, 4, 4], 0).ijk_to_lps()));
    }

    #[test]
    fn test_non_finite_positions_fail_validation() {
        let mut mesh = single_triangle();
        mesh.vertices[0].position.x = f64::INFINITY;
        let moved = transform_mesh(&mesh, &Matrix4::identity());
        assert!(moved.validate().is_err());
    }
}
