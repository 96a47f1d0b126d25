//! NRRD volume reading and writing.
//!
//! Supports 3D scalar volumes with `raw`, `gzip` or `text` encoding, attached
//! (`.nrrd`) or detached (`.nhdr` + `data file`) data. `bzip2` is reported
//! as [`ModelError::UnsupportedFormat`].
//!
//! The voxel-to-RAS transform is built from `space directions` and
//! `space origin`, converting LPS/LAS coordinates to RAS. Without space
//! information, `spacings` scale the index axes.

use flate2::read::MultiGzDecoder;
use nalgebra::{Matrix4, Vector3};
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{ModelError, ModelResult};
use crate::volume::{ScalarType, ScalarVolume, label_from_f64};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Raw,
    Gzip,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Space {
    Ras,
    Las,
    Lps,
    Other,
}

#[derive(Debug)]
struct NrrdHeader {
    scalar_type: ScalarType,
    sizes: [usize; 3],
    encoding: Encoding,
    endian: Endian,
    space: Option<Space>,
    directions: Option<[Vector3<f64>; 3]>,
    origin: Option<Vector3<f64>>,
    spacings: Option<[f64; 3]>,
    data_file: Option<String>,
    byte_skip: i64,
    line_skip: usize,
}

/// Load a label volume from a NRRD file.
pub fn load_nrrd(path: &Path) -> ModelResult<ScalarVolume> {
    info!("Loading volume from {:?}", path);
    let bytes = std::fs::read(path).map_err(|e| ModelError::io_read(path, e))?;
    let volume = parse_nrrd(&bytes, path)?;
    debug!(
        dims = ?volume.dims(),
        scalar_type = ?volume.scalar_type(),
        "Loaded volume"
    );
    Ok(volume)
}

/// Parse NRRD bytes. `path` names the file in errors and anchors a
/// relative `data file`.
pub fn parse_nrrd(bytes: &[u8], path: &Path) -> ModelResult<ScalarVolume> {
    let (lines, data_start) = split_header(bytes);
    let header = parse_header(&lines, path)?;

    let (payload, data_path): (Cow<'_, [u8]>, PathBuf) = match &header.data_file {
        Some(name) => {
            let data_path = resolve_data_file(path, name);
            let owned = std::fs::read(&data_path).map_err(|e| ModelError::io_read(&data_path, e))?;
            (Cow::Owned(owned), data_path)
        }
        None => (
            Cow::Borrowed(&bytes[data_start.min(bytes.len())..]),
            path.to_path_buf(),
        ),
    };

    let count = header
        .sizes
        .iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
        .ok_or_else(|| ModelError::parse(path, "voxel count overflows"))?;
    let payload = skip_lines(&payload, header.line_skip);
    let data = match header.encoding {
        Encoding::Raw => decode_raw(payload, &header, count, path)?,
        Encoding::Gzip => {
            let inflated = inflate(payload, &data_path)?;
            decode_raw(&inflated, &header, count, path)?
        }
        Encoding::Text => decode_text(payload, count, path)?,
    };

    ScalarVolume::new(header.sizes, data, header.scalar_type, ijk_to_ras(&header))
}

/// Header lines (without the magic) and the byte offset after the blank
/// line that ends an attached header.
fn split_header(bytes: &[u8]) -> (Vec<String>, usize) {
    let mut lines = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let end = bytes[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| pos + p)
            .unwrap_or(bytes.len());
        let line = String::from_utf8_lossy(&bytes[pos..end])
            .trim_end_matches('\r')
            .to_string();
        pos = end + 1;
        if line.is_empty() {
            return (lines, pos);
        }
        lines.push(line);
    }
    (lines, bytes.len())
}

fn parse_header(lines: &[String], path: &Path) -> ModelResult<NrrdHeader> {
    let magic = lines.first().map(String::as_str).unwrap_or("");
    if !magic.starts_with("NRRD") {
        return Err(ModelError::parse_at(path, 1, "missing NRRD magic"));
    }

    let mut scalar_type = None;
    let mut dimension = None;
    let mut sizes = None;
    let mut encoding = None;
    let mut header = NrrdHeader {
        scalar_type: ScalarType::U8,
        sizes: [0; 3],
        encoding: Encoding::Raw,
        endian: Endian::Little,
        space: None,
        directions: None,
        origin: None,
        spacings: None,
        data_file: None,
        byte_skip: 0,
        line_skip: 0,
    };

    for (idx, line) in lines.iter().enumerate().skip(1) {
        let line_no = idx + 1;
        if line.starts_with('#') {
            continue;
        }
        if line.contains(":=") {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(ModelError::parse_at(path, line_no, format!("bad header line {:?}", line)));
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "type" => {
                scalar_type = Some(parse_type(value).ok_or_else(|| {
                    ModelError::unsupported(path, format!("voxel type {:?}", value))
                })?);
            }
            "dimension" => {
                dimension = Some(value.parse::<usize>().map_err(|_| {
                    ModelError::parse_at(path, line_no, format!("bad dimension {:?}", value))
                })?);
            }
            "sizes" => {
                let parsed: Vec<usize> = value
                    .split_whitespace()
                    .map(|s| s.parse::<usize>())
                    .collect::<Result<_, _>>()
                    .map_err(|_| ModelError::parse_at(path, line_no, "bad sizes"))?;
                sizes = Some(parsed);
            }
            "encoding" => {
                encoding = Some(match value.to_ascii_lowercase().as_str() {
                    "raw" => Encoding::Raw,
                    "gzip" | "gz" => Encoding::Gzip,
                    "txt" | "text" | "ascii" => Encoding::Text,
                    other => {
                        return Err(ModelError::unsupported(path, format!("{} encoding", other)));
                    }
                });
            }
            "endian" => {
                header.endian = match value.to_ascii_lowercase().as_str() {
                    "big" => Endian::Big,
                    _ => Endian::Little,
                };
            }
            "space" => {
                header.space = Some(match value.to_ascii_lowercase().as_str() {
                    "right-anterior-superior" | "ras" => Space::Ras,
                    "left-anterior-superior" | "las" => Space::Las,
                    "left-posterior-superior" | "lps" => Space::Lps,
                    _ => Space::Other,
                });
            }
            "space dimension" => {
                if value != "3" {
                    return Err(ModelError::unsupported(path, format!("space dimension {}", value)));
                }
            }
            "space directions" => {
                let vectors = parse_vectors(value)
                    .ok_or_else(|| ModelError::parse_at(path, line_no, "bad space directions"))?;
                if vectors.len() != 3 {
                    return Err(ModelError::unsupported(path, "non-spatial axes in space directions"));
                }
                header.directions = Some([vectors[0], vectors[1], vectors[2]]);
            }
            "space origin" => {
                let vectors = parse_vectors(value)
                    .ok_or_else(|| ModelError::parse_at(path, line_no, "bad space origin"))?;
                header.origin = vectors.first().copied();
            }
            "spacings" => {
                let parsed: Vec<f64> = value
                    .split_whitespace()
                    .map(|s| s.parse::<f64>().unwrap_or(f64::NAN))
                    .collect();
                if parsed.len() == 3 && parsed.iter().all(|s| s.is_finite()) {
                    header.spacings = Some([parsed[0], parsed[1], parsed[2]]);
                }
            }
            "data file" | "datafile" => header.data_file = Some(value.to_string()),
            "byte skip" | "byteskip" => {
                header.byte_skip = value
                    .parse()
                    .map_err(|_| ModelError::parse_at(path, line_no, "bad byte skip"))?;
            }
            "line skip" | "lineskip" => {
                header.line_skip = value
                    .parse()
                    .map_err(|_| ModelError::parse_at(path, line_no, "bad line skip"))?;
            }
            _ => {}
        }
    }

    header.scalar_type = scalar_type.ok_or_else(|| ModelError::parse(path, "missing type field"))?;
    header.encoding = encoding.ok_or_else(|| ModelError::parse(path, "missing encoding field"))?;
    if dimension != Some(3) {
        return Err(ModelError::unsupported(
            path,
            format!("dimension {:?}, only 3D volumes are read", dimension),
        ));
    }
    let sizes = sizes.ok_or_else(|| ModelError::parse(path, "missing sizes field"))?;
    if sizes.len() != 3 {
        return Err(ModelError::parse(path, "sizes must list three axes"));
    }
    header.sizes = [sizes[0], sizes[1], sizes[2]];
    Ok(header)
}

fn parse_type(value: &str) -> Option<ScalarType> {
    let t = match value.to_ascii_lowercase().as_str() {
        "uchar" | "unsigned char" | "uint8" | "uint8_t" => ScalarType::U8,
        "signed char" | "char" | "int8" | "int8_t" => ScalarType::I8,
        "ushort" | "unsigned short" | "unsigned short int" | "uint16" | "uint16_t" => {
            ScalarType::U16
        }
        "short" | "short int" | "signed short" | "signed short int" | "int16" | "int16_t" => {
            ScalarType::I16
        }
        "uint" | "unsigned int" | "uint32" | "uint32_t" => ScalarType::U32,
        "int" | "signed int" | "int32" | "int32_t" => ScalarType::I32,
        "float" => ScalarType::F32,
        "double" => ScalarType::F64,
        _ => return None,
    };
    Some(t)
}

/// Parse `(x,y,z) (x,y,z) none ...`; `none` entries are dropped.
fn parse_vectors(value: &str) -> Option<Vec<Vector3<f64>>> {
    let mut out = Vec::new();
    for chunk in value.split(')') {
        let chunk = chunk.trim();
        if chunk.is_empty() || chunk == "none" {
            continue;
        }
        let inner = chunk.trim_start_matches("none").trim().strip_prefix('(')?;
        let comps: Vec<f64> = inner
            .split(',')
            .map(|c| c.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .ok()?;
        if comps.len() != 3 {
            return None;
        }
        out.push(Vector3::new(comps[0], comps[1], comps[2]));
    }
    Some(out)
}

fn resolve_data_file(header_path: &Path, name: &str) -> PathBuf {
    let candidate = PathBuf::from(name);
    if candidate.is_absolute() {
        candidate
    } else {
        header_path
            .parent()
            .map(|dir| dir.join(&candidate))
            .unwrap_or(candidate)
    }
}

fn skip_lines(payload: &[u8], count: usize) -> &[u8] {
    let mut rest = payload;
    for _ in 0..count {
        match rest.iter().position(|&b| b == b'\n') {
            Some(p) => rest = &rest[p + 1..],
            None => return &[],
        }
    }
    rest
}

/// Inflate a gzip payload. Concatenated members are read through, as
/// written by chunked NRRD writers.
fn inflate(payload: &[u8], path: &Path) -> ModelResult<Vec<u8>> {
    let mut out = Vec::new();
    MultiGzDecoder::new(payload)
        .read_to_end(&mut out)
        .map_err(|e| ModelError::parse(path, format!("bad gzip data: {}", e)))?;
    debug!(compressed = payload.len(), inflated = out.len(), "Inflated gzip payload");
    Ok(out)
}

fn decode_raw(
    payload: &[u8],
    header: &NrrdHeader,
    count: usize,
    path: &Path,
) -> ModelResult<Vec<i32>> {
    let width = header.scalar_type.size_bytes();
    let needed = count
        .checked_mul(width)
        .ok_or_else(|| ModelError::parse(path, "data size overflows"))?;
    let start = if header.byte_skip < 0 {
        payload.len().checked_sub(needed)
    } else {
        usize::try_from(header.byte_skip).ok()
    };
    let bytes = start
        .and_then(|s| s.checked_add(needed).map(|end| (s, end)))
        .and_then(|(s, end)| payload.get(s..end))
        .ok_or_else(|| {
            ModelError::parse(
                path,
                format!("expected {} data bytes, found {}", needed, payload.len()),
            )
        })?;

    let big = header.endian == Endian::Big;
    let data = bytes
        .chunks_exact(width)
        .map(|c| decode_sample(c, header.scalar_type, big))
        .collect();
    Ok(data)
}

fn decode_sample(c: &[u8], scalar_type: ScalarType, big: bool) -> i32 {
    macro_rules! read {
        ($t:ty, $n:expr) => {{
            let mut buf = [0u8; $n];
            buf.copy_from_slice(c);
            if big { <$t>::from_be_bytes(buf) } else { <$t>::from_le_bytes(buf) }
        }};
    }
    match scalar_type {
        ScalarType::U8 => c[0] as i32,
        ScalarType::I8 => c[0] as i8 as i32,
        ScalarType::U16 => read!(u16, 2) as i32,
        ScalarType::I16 => read!(i16, 2) as i32,
        ScalarType::U32 => read!(u32, 4).min(i32::MAX as u32) as i32,
        ScalarType::I32 => read!(i32, 4),
        ScalarType::F32 => label_from_f64(read!(f32, 4) as f64),
        ScalarType::F64 => label_from_f64(read!(f64, 8)),
    }
}

fn decode_text(payload: &[u8], count: usize, path: &Path) -> ModelResult<Vec<i32>> {
    let text = String::from_utf8_lossy(payload);
    let data: Vec<i32> = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .take(count)
        .map(|s| {
            s.parse::<f64>()
                .map(label_from_f64)
                .map_err(|_| ModelError::parse(path, format!("bad sample {:?}", s)))
        })
        .collect::<ModelResult<_>>()?;
    if data.len() != count {
        return Err(ModelError::parse(
            path,
            format!("expected {} samples, found {}", count, data.len()),
        ));
    }
    Ok(data)
}

fn ijk_to_ras(header: &NrrdHeader) -> Matrix4<f64> {
    let mut m = Matrix4::identity();
    match header.directions {
        Some(dirs) => {
            for (axis, dir) in dirs.iter().enumerate() {
                for row in 0..3 {
                    m[(row, axis)] = dir[row];
                }
            }
        }
        None => {
            let spacings = header.spacings.unwrap_or([1.0; 3]);
            for (axis, s) in spacings.iter().enumerate() {
                m[(axis, axis)] = *s;
            }
        }
    }
    if let Some(origin) = header.origin {
        for row in 0..3 {
            m[(row, 3)] = origin[row];
        }
    }

    let flip = match header.space {
        Some(Space::Lps) => [-1.0, -1.0, 1.0],
        Some(Space::Las) => [-1.0, 1.0, 1.0],
        Some(Space::Ras) | None => [1.0, 1.0, 1.0],
        Some(Space::Other) => {
            warn!("NRRD space has no defined RAS conversion, using it as RAS");
            [1.0, 1.0, 1.0]
        }
    };
    for (row, sign) in flip.iter().enumerate() {
        for col in 0..4 {
            m[(row, col)] *= sign;
        }
    }
    m
}

fn type_name(scalar_type: ScalarType) -> &'static str {
    match scalar_type {
        ScalarType::U8 => "uchar",
        ScalarType::I8 => "signed char",
        ScalarType::U16 => "ushort",
        ScalarType::I16 => "short",
        ScalarType::U32 => "uint",
        ScalarType::I32 => "int",
        ScalarType::F32 => "float",
        ScalarType::F64 => "double",
    }
}

/// Save a volume as an attached raw little-endian NRRD in LPS space.
pub fn save_nrrd(volume: &ScalarVolume, path: &Path) -> ModelResult<()> {
    info!("Saving volume to {:?}", path);
    let werr = |e| ModelError::io_write(path, e);

    let file = File::create(path).map_err(werr)?;
    let mut writer = BufWriter::new(file);

    let lps = volume.ijk_to_lps();
    let origin = lps.transform_point(&nalgebra::Point3::from(volume.origin()));
    let [nx, ny, nz] = volume.dims();
    let dir = |axis: usize| {
        format!(
            "({},{},{})",
            lps[(0, axis)],
            lps[(1, axis)],
            lps[(2, axis)]
        )
    };

    writeln!(writer, "NRRD0004").map_err(werr)?;
    writeln!(writer, "# Written by model-maker").map_err(werr)?;
    writeln!(writer, "type: {}", type_name(volume.scalar_type())).map_err(werr)?;
    writeln!(writer, "dimension: 3").map_err(werr)?;
    writeln!(writer, "space: left-posterior-superior").map_err(werr)?;
    writeln!(writer, "sizes: {} {} {}", nx, ny, nz).map_err(werr)?;
    writeln!(writer, "space directions: {} {} {}", dir(0), dir(1), dir(2)).map_err(werr)?;
    writeln!(writer, "kinds: domain domain domain").map_err(werr)?;
    writeln!(writer, "endian: little").map_err(werr)?;
    writeln!(writer, "encoding: raw").map_err(werr)?;
    writeln!(writer, "space origin: ({},{},{})", origin.x, origin.y, origin.z).map_err(werr)?;
    writeln!(writer).map_err(werr)?;

    for &v in volume.data() {
        match volume.scalar_type() {
            ScalarType::U8 => writer.write_all(&[v as u8]),
            ScalarType::I8 => writer.write_all(&(v as i8).to_le_bytes()),
            ScalarType::U16 => writer.write_all(&(v as u16).to_le_bytes()),
            ScalarType::I16 => writer.write_all(&(v as i16).to_le_bytes()),
            ScalarType::U32 => writer.write_all(&(v as u32).to_le_bytes()),
            ScalarType::I32 => writer.write_all(&v.to_le_bytes()),
            ScalarType::F32 => writer.write_all(&(v as f32).to_le_bytes()),
            ScalarType::F64 => writer.write_all(&(v as f64).to_le_bytes()),
        }
        .map_err(werr)?;
    }
    writer.flush().map_err(werr)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(body: &str) -> Vec<u8> {
        format!("NRRD0004\n{}\n\n", body).into_bytes()
    }

    #[test]
    fn test_parse_text_encoding() {
        let mut bytes = header(
            "type: short\ndimension: 3\nsizes: 2 2 2\nencoding: ascii\nspace: left-posterior-superior\n\
             space directions: (2,0,0) (0,2,0) (0,0,3)\nspace origin: (10,20,30)",
        );
        bytes.extend_from_slice(b"0 1 2 3\n4 5 6 -7\n");
        let volume = parse_nrrd(&bytes, Path::new("t.nrrd")).unwrap();
        assert_eq!(volume.dims(), [2, 2, 2]);
        assert_eq!(volume.value(1, 1, 1), -7);
        assert_eq!(volume.scalar_type(), ScalarType::I16);

        let m = volume.ijk_to_ras();
        assert_eq!(m[(0, 0)], -2.0);
        assert_eq!(m[(1, 1)], -2.0);
        assert_eq!(m[(2, 2)], 3.0);
        assert_eq!(m[(0, 3)], -10.0);
        assert_eq!(m[(1, 3)], -20.0);
        assert_eq!(m[(2, 3)], 30.0);
    }

    #[test]
    fn test_parse_raw_big_endian() {
        let mut bytes = header("type: ushort\ndimension: 3\nsizes: 2 2 2\nencoding: raw\nendian: big");
        for v in 0u16..8 {
            bytes.extend_from_slice(&(v * 256).to_be_bytes());
        }
        let volume = parse_nrrd(&bytes, Path::new("t.nrrd")).unwrap();
        assert_eq!(volume.value(1, 0, 0), 256);
        assert_eq!(volume.value(1, 1, 1), 7 * 256);
        assert_eq!(*volume.ijk_to_ras(), Matrix4::identity());
    }

    #[test]
    fn test_float_samples_are_floored() {
        let mut bytes = header("type: float\ndimension: 3\nsizes: 2 2 2\nencoding: text");
        bytes.extend_from_slice(b"0.9 1.2 2.5 3.0 4 5 6 7");
        let volume = parse_nrrd(&bytes, Path::new("t.nrrd")).unwrap();
        assert_eq!(&volume.data()[..4], &[0, 1, 2, 3]);
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_gzip_matches_raw() {
        let samples: Vec<u8> = (0i16..27)
            .flat_map(|v| (v * 37 - 300).to_le_bytes())
            .collect();
        let fields = "type: short\ndimension: 3\nsizes: 3 3 3\nendian: little";

        let mut raw = header(&format!("{}\nencoding: raw", fields));
        raw.extend_from_slice(&samples);
        let mut gz = header(&format!("{}\nencoding: gzip", fields));
        gz.extend_from_slice(&gzip(&samples));

        let expected = parse_nrrd(&raw, Path::new("raw.nrrd")).unwrap();
        let volume = parse_nrrd(&gz, Path::new("gz.nrrd")).unwrap();
        assert_eq!(volume.data(), expected.data());
        assert_eq!(volume.value(2, 2, 2), 26 * 37 - 300);
    }

    #[test]
    fn test_gzip_detached_and_multi_member() {
        let dir = tempfile::tempdir().unwrap();
        let values: Vec<u8> = (0u8..8).collect();
        let mut data = gzip(&values[..3]);
        data.extend(gzip(&values[3..]));
        std::fs::write(dir.path().join("labels.raw.gz"), &data).unwrap();
        let nhdr = dir.path().join("labels.nhdr");
        std::fs::write(
            &nhdr,
            "NRRD0004\ntype: uchar\ndimension: 3\nsizes: 2 2 2\nencoding: gz\ndata file: labels.raw.gz\n",
        )
        .unwrap();
        let volume = load_nrrd(&nhdr).unwrap();
        assert_eq!(volume.data(), (0..8).collect::<Vec<i32>>().as_slice());
    }

    #[test]
    fn test_corrupt_gzip_is_parse_error() {
        let mut bytes = header("type: uchar\ndimension: 3\nsizes: 2 2 2\nencoding: gzip");
        bytes.extend_from_slice(b"not gzip at all");
        let err = parse_nrrd(&bytes, Path::new("t.nrrd")).unwrap_err();
        assert!(matches!(err, ModelError::ParseError { .. }));
    }

    #[test]
    fn test_bzip2_is_unsupported() {
        let bytes = header("type: uchar\ndimension: 3\nsizes: 2 2 2\nencoding: bzip2");
        let err = parse_nrrd(&bytes, Path::new("t.nrrd")).unwrap_err();
        assert!(matches!(err, ModelError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_oversized_header_is_parse_error() {
        let huge = usize::MAX / 2;
        let bytes = header(&format!(
            "type: int\ndimension: 3\nsizes: {} 4 4\nencoding: raw",
            huge
        ));
        let err = parse_nrrd(&bytes, Path::new("t.nrrd")).unwrap_err();
        assert!(matches!(err, ModelError::ParseError { .. }));

        let mut bytes = header(&format!(
            "type: uchar\ndimension: 3\nsizes: 2 2 2\nencoding: raw\nbyte skip: {}",
            i64::MAX
        ));
        bytes.extend_from_slice(&[0; 8]);
        let err = parse_nrrd(&bytes, Path::new("t.nrrd")).unwrap_err();
        assert!(matches!(err, ModelError::ParseError { .. }));
    }

    #[test]
    fn test_two_dimensional_is_unsupported() {
        let bytes = header("type: uchar\ndimension: 2\nsizes: 2 2\nencoding: raw");
        let err = parse_nrrd(&bytes, Path::new("t.nrrd")).unwrap_err();
        assert!(matches!(err, ModelError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_flat_volume_is_degenerate() {
        let mut bytes = header("type: uchar\ndimension: 3\nsizes: 2 2 1\nencoding: raw");
        bytes.extend_from_slice(&[0, 1, 2, 3]);
        let err = parse_nrrd(&bytes, Path::new("t.nrrd")).unwrap_err();
        assert!(matches!(err, ModelError::DegenerateVolume { .. }));
    }

    #[test]
    fn test_truncated_data() {
        let mut bytes = header("type: uchar\ndimension: 3\nsizes: 2 2 2\nencoding: raw");
        bytes.extend_from_slice(&[0, 1, 2]);
        let err = parse_nrrd(&bytes, Path::new("t.nrrd")).unwrap_err();
        assert!(matches!(err, ModelError::ParseError { .. }));
    }

    #[test]
    fn test_missing_magic() {
        let err = parse_nrrd(b"P6\n", Path::new("t.ppm")).unwrap_err();
        assert!(matches!(err, ModelError::ParseError { line: Some(1), .. }));
    }

    #[test]
    fn test_save_and_load_detached_and_attached() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = Matrix4::identity();
        m[(0, 0)] = -1.5;
        m[(2, 3)] = 4.0;
        let volume = ScalarVolume::from_fn([3, 2, 2], ScalarType::I16, m, |i, j, k| {
            i as i32 - j as i32 * 100 + k as i32 * 1000
        })
        .unwrap();

        let path = dir.path().join("labels.nrrd");
        save_nrrd(&volume, &path).unwrap();
        let loaded = load_nrrd(&path).unwrap();
        assert_eq!(loaded.data(), volume.data());
        assert!((loaded.ijk_to_ras() - volume.ijk_to_ras()).abs().max() < 1e-12);

        let raw = dir.path().join("labels.raw");
        let values: Vec<u8> = (0u8..12).collect();
        std::fs::write(&raw, &values).unwrap();
        let nhdr = dir.path().join("labels.nhdr");
        std::fs::write(
            &nhdr,
            "NRRD0004\ntype: uchar\ndimension: 3\nsizes: 3 2 2\nencoding: raw\ndata file: labels.raw\n",
        )
        .unwrap();
        let detached = load_nrrd(&nhdr).unwrap();
        assert_eq!(detached.value(2, 1, 1), 11);
    }
}
