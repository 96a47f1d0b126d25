//! VTK legacy polydata reading and writing.
//!
//! Final models are written as triangle strips, intermediates as plain
//! polygons. Files are ASCII, version 4.2, with the coordinate space named in
//! the header line.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use nalgebra::Vector3;
use tracing::info;

use crate::error::{ModelError, ModelResult};
use crate::tracing_ext::log_io_operation;
use crate::types::{StripMesh, SurfaceMesh, Vertex};

/// Header line of every written file.
pub const VTK_HEADER: &str = "3D Slicer output. SPACE=LPS";

const VTK_VERSION_LINE: &str = "# vtk DataFile Version 4.2";

/// Contents of a VTK polydata file.
#[derive(Debug, Clone, Default)]
pub struct VtkPolyData {
    /// The free-form second line.
    pub header: String,
    /// Points, with normals if the file had point normals.
    pub vertices: Vec<Vertex>,
    /// Triangles from the `POLYGONS` section.
    pub polygons: Vec<[u32; 3]>,
    /// Strips from the `TRIANGLE_STRIPS` section.
    pub strips: Vec<Vec<u32>>,
    /// The `Normals` field data array, one normal per strip triangle.
    pub face_normals: Option<Vec<Vector3<f64>>>,
}

impl VtkPolyData {
    /// All triangles, polygons first, then decoded strips.
    pub fn to_surface_mesh(&self) -> SurfaceMesh {
        let strips = StripMesh {
            vertices: Vec::new(),
            strips: self.strips.clone(),
            face_normals: None,
        };
        let mut faces = self.polygons.clone();
        faces.extend(strips.triangles());
        SurfaceMesh {
            vertices: self.vertices.clone(),
            faces,
            face_labels: None,
        }
    }
}

/// Write a final model: triangle strips plus point or face normals.
pub fn save_strip_mesh(mesh: &StripMesh, path: &Path) -> ModelResult<()> {
    info!("Saving model to {:?}", path);
    let result = File::create(path).and_then(|file| {
        let mut w = BufWriter::new(file);
        write_preamble(&mut w)?;
        if let Some(normals) = &mesh.face_normals {
            writeln!(w, "FIELD FieldData 1")?;
            writeln!(w, "Normals 3 {} double", normals.len())?;
            for n in normals {
                writeln!(w, "{} {} {}", n.x, n.y, n.z)?;
            }
        }
        write_points(&mut w, &mesh.vertices)?;

        let size: usize = mesh.strips.iter().map(|s| s.len() + 1).sum();
        writeln!(w, "TRIANGLE_STRIPS {} {}", mesh.strips.len(), size)?;
        for strip in &mesh.strips {
            write!(w, "{}", strip.len())?;
            for v in strip {
                write!(w, " {}", v)?;
            }
            writeln!(w)?;
        }
        write_point_normals(&mut w, &mesh.vertices)?;
        w.flush()
    });
    log_io_operation("write", path, result.is_ok());
    result.map_err(|e| ModelError::io_write(path, e))
}

/// Write an intermediate mesh as `POLYGONS`.
pub fn save_polygons(mesh: &SurfaceMesh, path: &Path) -> ModelResult<()> {
    info!("Saving intermediate mesh to {:?}", path);
    let result = File::create(path).and_then(|file| {
        let mut w = BufWriter::new(file);
        write_preamble(&mut w)?;
        write_points(&mut w, &mesh.vertices)?;
        writeln!(w, "POLYGONS {} {}", mesh.faces.len(), mesh.faces.len() * 4)?;
        for [a, b, c] in &mesh.faces {
            writeln!(w, "3 {} {} {}", a, b, c)?;
        }
        write_point_normals(&mut w, &mesh.vertices)?;
        w.flush()
    });
    log_io_operation("write", path, result.is_ok());
    result.map_err(|e| ModelError::io_write(path, e))
}

fn write_preamble(w: &mut impl Write) -> std::io::Result<()> {
    writeln!(w, "{}", VTK_VERSION_LINE)?;
    writeln!(w, "{}", VTK_HEADER)?;
    writeln!(w, "ASCII")?;
    writeln!(w, "DATASET POLYDATA")
}

fn write_points(w: &mut impl Write, vertices: &[Vertex]) -> std::io::Result<()> {
    writeln!(w, "POINTS {} double", vertices.len())?;
    for v in vertices {
        writeln!(w, "{} {} {}", v.position.x, v.position.y, v.position.z)?;
    }
    Ok(())
}

/// Point normals, when any vertex has one. Vertices without a normal get
/// a zero vector.
fn write_point_normals(w: &mut impl Write, vertices: &[Vertex]) -> std::io::Result<()> {
    if vertices.iter().all(|v| v.normal.is_none()) {
        return Ok(());
    }
    writeln!(w, "POINT_DATA {}", vertices.len())?;
    writeln!(w, "NORMALS Normals double")?;
    for v in vertices {
        let n = v.normal.unwrap_or_else(Vector3::zeros);
        writeln!(w, "{} {} {}", n.x, n.y, n.z)?;
    }
    Ok(())
}

/// Read an ASCII VTK polydata file.
///
/// Understands what the writers here emit plus `VERTICES`, `LINES`,
/// `CELL_DATA` and `SCALARS` sections, which are skipped. Polygons with more
/// than three points are fanned into triangles.
pub fn load_vtk(path: &Path) -> ModelResult<VtkPolyData> {
    let text = std::fs::read_to_string(path);
    log_io_operation("read", path, text.is_ok());
    let text = text.map_err(|e| ModelError::io_read(path, e))?;
    parse_vtk(&text, path)
}

/// Parse VTK polydata from text. `path` only labels errors.
pub fn parse_vtk(text: &str, path: &Path) -> ModelResult<VtkPolyData> {
    let mut lines = text.splitn(5, '\n');
    let mut next_line = |what: &str, line: usize| {
        lines
            .next()
            .map(str::trim)
            .ok_or_else(|| ModelError::parse_at(path, line, format!("missing {}", what)))
    };

    let version = next_line("version line", 1)?;
    if !version.starts_with("# vtk DataFile") {
        return Err(ModelError::parse_at(path, 1, "not a VTK legacy file"));
    }
    let header = next_line("header", 2)?.to_string();
    let encoding = next_line("encoding", 3)?;
    if !encoding.eq_ignore_ascii_case("ASCII") {
        return Err(ModelError::unsupported(
            path,
            format!("{} VTK files are not supported", encoding),
        ));
    }
    let dataset = next_line("dataset", 4)?;
    if dataset != "DATASET POLYDATA" {
        return Err(ModelError::unsupported(
            path,
            format!("'{}' is not polydata", dataset),
        ));
    }
    let body = lines.next().unwrap_or("");

    let mut tokens = Tokens {
        inner: body.split_whitespace(),
        path,
    };
    let mut data = VtkPolyData {
        header,
        ..Default::default()
    };
    let mut point_data = 0usize;

    while let Some(keyword) = tokens.inner.next() {
        match keyword {
            "POINTS" => {
                let n = tokens.usize()?;
                tokens.word()?;
                data.vertices.reserve(n);
                for _ in 0..n {
                    let (x, y, z) = (tokens.f64()?, tokens.f64()?, tokens.f64()?);
                    data.vertices.push(Vertex::from_coords(x, y, z));
                }
            }
            "POLYGONS" => {
                let (n, _) = (tokens.usize()?, tokens.usize()?);
                for _ in 0..n {
                    let cell = tokens.cell()?;
                    for k in 1..cell.len().saturating_sub(1) {
                        data.polygons.push([cell[0], cell[k], cell[k + 1]]);
                    }
                }
            }
            "TRIANGLE_STRIPS" => {
                let (n, _) = (tokens.usize()?, tokens.usize()?);
                for _ in 0..n {
                    data.strips.push(tokens.cell()?);
                }
            }
            "VERTICES" | "LINES" => {
                let (n, _) = (tokens.usize()?, tokens.usize()?);
                for _ in 0..n {
                    tokens.cell()?;
                }
            }
            "POINT_DATA" => point_data = tokens.usize()?,
            "CELL_DATA" => {
                tokens.usize()?;
                point_data = 0;
            }
            "NORMALS" => {
                tokens.word()?;
                tokens.word()?;
                if point_data != data.vertices.len() {
                    return Err(ModelError::parse(path, "NORMALS outside point data"));
                }
                for vertex in &mut data.vertices {
                    vertex.normal = Some(Vector3::new(tokens.f64()?, tokens.f64()?, tokens.f64()?));
                }
            }
            "SCALARS" => {
                tokens.word()?;
                tokens.word()?;
                // Optional component count, then a lookup table line.
                let mut next = tokens.word()?;
                let components = match next.parse::<usize>() {
                    Ok(c) => {
                        next = tokens.word()?;
                        c
                    }
                    Err(_) => 1,
                };
                if next != "LOOKUP_TABLE" {
                    return Err(ModelError::parse(path, "SCALARS without LOOKUP_TABLE"));
                }
                tokens.word()?;
                for _ in 0..point_data * components {
                    tokens.f64()?;
                }
            }
            "FIELD" => {
                tokens.word()?;
                let arrays = tokens.usize()?;
                for _ in 0..arrays {
                    let name = tokens.word()?;
                    let (components, tuples) = (tokens.usize()?, tokens.usize()?);
                    tokens.word()?;
                    let mut values = Vec::with_capacity(components * tuples);
                    for _ in 0..components * tuples {
                        values.push(tokens.f64()?);
                    }
                    if name == "Normals" && components == 3 {
                        data.face_normals = Some(
                            values
                                .chunks_exact(3)
                                .map(|c| Vector3::new(c[0], c[1], c[2]))
                                .collect(),
                        );
                    }
                }
            }
            other => {
                return Err(ModelError::parse(
                    path,
                    format!("unexpected keyword '{}'", other),
                ));
            }
        }
    }

    let n = data.vertices.len() as u32;
    let out_of_range = data
        .polygons
        .iter()
        .flatten()
        .chain(data.strips.iter().flatten())
        .any(|&v| v >= n);
    if out_of_range {
        return Err(ModelError::parse(path, "cell references a missing point"));
    }
    Ok(data)
}

struct Tokens<'a> {
    inner: std::str::SplitWhitespace<'a>,
    path: &'a Path,
}

impl<'a> Tokens<'a> {
    fn word(&mut self) -> ModelResult<&'a str> {
        self.inner
            .next()
            .ok_or_else(|| ModelError::parse(self.path, "unexpected end of file"))
    }

    fn usize(&mut self) -> ModelResult<usize> {
        let w = self.word()?;
        w.parse()
            .map_err(|_| ModelError::parse(self.path, format!("expected a count, found '{}'", w)))
    }

    fn f64(&mut self) -> ModelResult<f64> {
        let w = self.word()?;
        w.parse()
            .map_err(|_| ModelError::parse(self.path, format!("expected a number, found '{}'", w)))
    }

    fn cell(&mut self) -> ModelResult<Vec<u32>> {
        let n = self.usize()?;
        (0..n)
            .map(|_| {
                let w = self.word()?;
                w.parse().map_err(|_| {
                    ModelError::parse(self.path, format!("expected a point index, found '{}'", w))
                })
            })
            .collect()
    }
}
