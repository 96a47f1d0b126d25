//! Greedy triangle strip generation.

use hashbrown::HashMap;
use nalgebra::Vector3;
use tracing::debug;

use crate::adjacency::normalize_edge;
use crate::types::{StripMesh, SurfaceMesh};

/// Pack the faces into triangle strips.
///
/// Strips start from the lowest unvisited face and grow forward through
/// unvisited neighbors whose winding matches the strip parity. Each start
/// face tries its three rotations and keeps the longest strip. Decoding the
/// strips (see [`StripMesh::triangles`]) gives every face exactly once with
/// its original winding. `face_normals`, when given, are reordered to match
/// the decoded triangles.
pub fn build_strips(mesh: &SurfaceMesh, face_normals: Option<&[Vector3<f64>]>) -> StripMesh {
    let mut edge_faces: HashMap<(u32, u32), Vec<u32>> = HashMap::with_capacity(mesh.faces.len() * 3 / 2);
    for (fi, face) in mesh.faces.iter().enumerate() {
        for i in 0..3 {
            edge_faces
                .entry(normalize_edge(face[i], face[(i + 1) % 3]))
                .or_default()
                .push(fi as u32);
        }
    }

    let walker = StripWalker {
        faces: &mesh.faces,
        edge_faces: &edge_faces,
    };
    let mut visited = vec![false; mesh.faces.len()];
    let mut strips = Vec::new();
    let mut order: Vec<u32> = Vec::with_capacity(mesh.faces.len());

    for start in 0..mesh.faces.len() as u32 {
        if visited[start as usize] {
            continue;
        }
        let (strip, faces) = (0..3)
            .map(|rotation| walker.walk(start, rotation, &mut visited))
            .max_by_key(|(_, faces)| faces.len())
            .unwrap_or_default();
        for &f in &faces {
            visited[f as usize] = true;
        }
        order.extend_from_slice(&faces);
        strips.push(strip);
    }

    debug!(
        faces = mesh.face_count(),
        strips = strips.len(),
        "Built triangle strips"
    );

    StripMesh {
        vertices: mesh.vertices.clone(),
        strips,
        face_normals: face_normals.map(|normals| order.iter().map(|&f| normals[f as usize]).collect()),
    }
}

struct StripWalker<'a> {
    faces: &'a [[u32; 3]],
    edge_faces: &'a HashMap<(u32, u32), Vec<u32>>,
}

impl StripWalker<'_> {
    /// Strip starting at `start` rotated by `rotation`, plus the faces it
    /// covers in decode order.
    ///
    /// Covered faces are marked in `visited` during the walk and unmarked
    /// before returning.
    fn walk(&self, start: u32, rotation: usize, visited: &mut [bool]) -> (Vec<u32>, Vec<u32>) {
        let f = self.faces[start as usize];
        let mut strip = vec![f[rotation], f[(rotation + 1) % 3], f[(rotation + 2) % 3]];
        let mut covered = vec![start];
        visited[start as usize] = true;

        loop {
            let n = strip.len();
            let (a, b) = (strip[n - 2], strip[n - 1]);
            // The next decoded triangle is (a, b, d) at even positions and
            // (b, a, d) at odd ones.
            let next_even = (n - 2) % 2 == 0;
            let candidate = self
                .edge_faces
                .get(&normalize_edge(a, b))
                .into_iter()
                .flatten()
                .copied()
                .filter(|&g| !visited[g as usize])
                .find_map(|g| {
                    let face = self.faces[g as usize];
                    let d = face.into_iter().find(|&x| x != a && x != b)?;
                    let decoded = if next_even { [a, b, d] } else { [b, a, d] };
                    same_cycle(face, decoded).then_some((g, d))
                });
            match candidate {
                Some((g, d)) => {
                    strip.push(d);
                    covered.push(g);
                    visited[g as usize] = true;
                }
                None => break,
            }
        }
        for &g in &covered {
            visited[g as usize] = false;
        }
        (strip, covered)
    }
}

/// Whether two triangles list the same vertices in the same cyclic order.
fn same_cycle(a: [u32; 3], b: [u32; 3]) -> bool {
    (0..3).any(|r| a[r] == b[0] && a[(r + 1) % 3] == b[1] && a[(r + 2) % 3] == b[2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vertex;

    fn sorted_cycles(faces: &[[u32; 3]]) -> Vec<[u32; 3]> {
        // Rotate each face so its smallest index leads, keeping the winding.
        let mut out: Vec<[u32; 3]> = faces
            .iter()
            .map(|f| {
                let r = (0..3).min_by_key(|&i| f[i]).unwrap_or(0);
                [f[r], f[(r + 1) % 3], f[(r + 2) % 3]]
            })
            .collect();
        out.sort_unstable();
        out
    }

    fn grid(n: u32) -> SurfaceMesh {
        let mut mesh = SurfaceMesh::new();
        for y in 0..=n {
            for x in 0..=n {
                mesh.vertices.push(Vertex::from_coords(x as f64, y as f64, 0.0));
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

    #[test]
    fn test_strips_cover_every_face_once() {
        let mesh = grid(4);
        let strips = build_strips(&mesh, None);
        assert_eq!(strips.triangle_count(), mesh.face_count());
        assert!(strips.strips.len() < mesh.face_count());
        assert_eq!(sorted_cycles(&strips.triangles()), sorted_cycles(&mesh.faces));
    }

    #[test]
    fn test_single_triangle() {
        let mesh = SurfaceMesh {
            vertices: vec![
                Vertex::from_coords(0.0, 0.0, 0.0),
                Vertex::from_coords(1.0, 0.0, 0.0),
                Vertex::from_coords(0.0, 1.0, 0.0),
            ],
            faces: vec![[0, 1, 2]],
            face_labels: None,
        };
        let strips = build_strips(&mesh, None);
        assert_eq!(strips.strips, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_face_normals_follow_strip_order() {
        let mesh = grid(2);
        let normals: Vec<Vector3<f64>> = (0..mesh.face_count())
            .map(|i| Vector3::new(i as f64, 0.0, 1.0))
            .collect();
        let strips = build_strips(&mesh, Some(&normals));
        let reordered = strips.face_normals.as_ref().unwrap();
        assert_eq!(reordered.len(), mesh.face_count());

        for (tri, normal) in strips.triangles().iter().zip(reordered) {
            let source = mesh
                .faces
                .iter()
                .position(|f| same_cycle(*f, *tri))
                .unwrap();
            assert_eq!(normal.x, source as f64);
        }
    }

    #[test]
    fn test_long_strip_walk_clears_its_marks() {
        let long = SurfaceMesh {
            vertices: (0..40)
                .map(|i| Vertex::from_coords((i / 2) as f64, (i % 2) as f64, 0.0))
                .collect(),
            faces: (0..38u32)
                .map(|i| if i % 2 == 0 { [i, i + 1, i + 2] } else { [i + 1, i, i + 2] })
                .collect(),
            face_labels: None,
        };
        let mut edge_faces: HashMap<(u32, u32), Vec<u32>> = HashMap::new();
        for (fi, face) in long.faces.iter().enumerate() {
            for i in 0..3 {
                edge_faces
                    .entry(normalize_edge(face[i], face[(i + 1) % 3]))
                    .or_default()
                    .push(fi as u32);
            }
        }
        let walker = StripWalker {
            faces: &long.faces,
            edge_faces: &edge_faces,
        };
        let mut visited = vec![false; long.faces.len()];
        let (strip, covered) = walker.walk(0, 0, &mut visited);
        assert_eq!(covered.len(), 38);
        assert_eq!(strip, (0..40).collect::<Vec<u32>>());
        assert!(visited.iter().all(|v| !v));

        let strips = build_strips(&long, None);
        assert_eq!(strips.strips.len(), 1);
        assert_eq!(sorted_cycles(&strips.triangles()), sorted_cycles(&long.faces));
    }

    #[test]
    fn test_empty_mesh() {
        let strips = build_strips(&SurfaceMesh::new(), None);
        assert!(strips.strips.is_empty());
        assert_eq!(strips.triangle_count(), 0);
    }
}
