//! Label volumes and their voxel-to-patient transform.

use nalgebra::{Matrix4, Point3, Vector3};
use rayon::prelude::*;

use crate::error::{ModelError, ModelResult};

/// Storage type of the voxels in the source file.
///
/// Values are held as `i32` in memory; the source type only bounds the
/// histogram range when no color table is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl ScalarType {
    /// Largest value the type can represent.
    pub fn max_value(&self) -> f64 {
        match self {
            ScalarType::U8 => u8::MAX as f64,
            ScalarType::I8 => i8::MAX as f64,
            ScalarType::U16 => u16::MAX as f64,
            ScalarType::I16 => i16::MAX as f64,
            ScalarType::U32 => u32::MAX as f64,
            ScalarType::I32 => i32::MAX as f64,
            ScalarType::F32 => f32::MAX as f64,
            ScalarType::F64 => f64::MAX,
        }
    }

    /// Bytes per voxel in raw encoding.
    pub fn size_bytes(&self) -> usize {
        match self {
            ScalarType::U8 | ScalarType::I8 => 1,
            ScalarType::U16 | ScalarType::I16 => 2,
            ScalarType::U32 | ScalarType::I32 | ScalarType::F32 => 4,
            ScalarType::F64 => 8,
        }
    }

    /// Whether the type stores floating point values.
    pub fn is_float(&self) -> bool {
        matches!(self, ScalarType::F32 | ScalarType::F64)
    }
}

/// Convert a stored sample to a label. Floats are floored; out-of-range
/// values saturate and NaN maps to 0.
#[inline]
pub fn label_from_f64(value: f64) -> i32 {
    value.floor() as i32
}

/// A 3D label image.
///
/// Voxel `(i, j, k)` sits at pixel-space position `origin + (i, j, k)`.
/// The origin is zero for a loaded volume and `(-1, -1, -1)` after
/// [`ScalarVolume::padded`], so surfaces extracted from either volume share
/// the same index coordinates and the same `ijk_to_ras` transform.
#[derive(Debug, Clone)]
pub struct ScalarVolume {
    dims: [usize; 3],
    data: Vec<i32>,
    scalar_type: ScalarType,
    ijk_to_ras: Matrix4<f64>,
    origin: Vector3<f64>,
}

impl ScalarVolume {
    /// Create a volume from x-fastest voxel data.
    ///
    /// # Errors
    ///
    /// [`ModelError::DegenerateVolume`] when any dimension is below 2, and
    /// [`ModelError::InvalidParameter`] when `data` has the wrong length.
    pub fn new(
        dims: [usize; 3],
        data: Vec<i32>,
        scalar_type: ScalarType,
        ijk_to_ras: Matrix4<f64>,
    ) -> ModelResult<Self> {
        if dims.iter().any(|&d| d < 2) {
            return Err(ModelError::DegenerateVolume { dims });
        }
        let expected = dims[0] * dims[1] * dims[2];
        if data.len() != expected {
            return Err(ModelError::invalid_parameter(
                "volume data",
                format!("expected {} voxels, got {}", expected, data.len()),
            ));
        }
        Ok(Self {
            dims,
            data,
            scalar_type,
            ijk_to_ras,
            origin: Vector3::zeros(),
        })
    }

    /// Build a volume by evaluating `f(i, j, k)` at every voxel.
    pub fn from_fn(
        dims: [usize; 3],
        scalar_type: ScalarType,
        ijk_to_ras: Matrix4<f64>,
        f: impl Fn(usize, usize, usize) -> i32,
    ) -> ModelResult<Self> {
        let mut data = Vec::with_capacity(dims[0] * dims[1] * dims[2]);
        for k in 0..dims[2] {
            for j in 0..dims[1] {
                for i in 0..dims[0] {
                    data.push(f(i, j, k));
                }
            }
        }
        Self::new(dims, data, scalar_type, ijk_to_ras)
    }

    /// Dimensions `(nx, ny, nz)`.
    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Voxel values, x fastest.
    #[inline]
    pub fn data(&self) -> &[i32] {
        &self.data
    }

    /// Source storage type.
    #[inline]
    pub fn scalar_type(&self) -> ScalarType {
        self.scalar_type
    }

    /// Voxel index to RAS transform.
    #[inline]
    pub fn ijk_to_ras(&self) -> &Matrix4<f64> {
        &self.ijk_to_ras
    }

    /// Replace the voxel index to RAS transform.
    pub fn set_ijk_to_ras(&mut self, ijk_to_ras: Matrix4<f64>) {
        self.ijk_to_ras = ijk_to_ras;
    }

    /// Voxel index to LPS transform, the space models are written in.
    pub fn ijk_to_lps(&self) -> Matrix4<f64> {
        ras_to_lps() * self.ijk_to_ras
    }

    /// Pixel-space position of voxel `(0, 0, 0)`.
    #[inline]
    pub fn origin(&self) -> Vector3<f64> {
        self.origin
    }

    /// Number of voxels.
    #[inline]
    pub fn voxel_count(&self) -> usize {
        self.data.len()
    }

    /// Linear index of voxel `(i, j, k)`.
    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.dims[0] * (j + self.dims[1] * k)
    }

    /// Value of voxel `(i, j, k)`.
    #[inline]
    pub fn value(&self, i: usize, j: usize, k: usize) -> i32 {
        self.data[self.index(i, j, k)]
    }

    /// Pixel-space position of voxel `(i, j, k)`.
    #[inline]
    pub fn position(&self, i: usize, j: usize, k: usize) -> Point3<f64> {
        Point3::new(i as f64, j as f64, k as f64) + self.origin
    }

    /// Smallest and largest voxel value.
    pub fn scalar_range(&self) -> (i32, i32) {
        self.data
            .par_iter()
            .fold(|| (i32::MAX, i32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)))
            .reduce(|| (i32::MAX, i32::MIN), |a, b| (a.0.min(b.0), a.1.max(b.1)))
    }

    /// A copy with a one-voxel zero border on every side.
    ///
    /// Labels touching the volume boundary then produce closed surfaces.
    pub fn padded(&self) -> Self {
        let [nx, ny, nz] = self.dims;
        let dims = [nx + 2, ny + 2, nz + 2];
        let mut data = vec![0; dims[0] * dims[1] * dims[2]];
        for k in 0..nz {
            for j in 0..ny {
                let src = self.index(0, j, k);
                let dst = 1 + dims[0] * ((j + 1) + dims[1] * (k + 1));
                data[dst..dst + nx].copy_from_slice(&self.data[src..src + nx]);
            }
        }
        Self {
            dims,
            data,
            scalar_type: self.scalar_type,
            ijk_to_ras: self.ijk_to_ras,
            origin: self.origin - Vector3::new(1.0, 1.0, 1.0),
        }
    }

    /// Indicator volume: `in_value` where the voxel equals `label`,
    /// `out_value` elsewhere.
    pub fn threshold(&self, label: i32, in_value: i32, out_value: i32) -> Self {
        let data = self
            .data
            .par_iter()
            .map(|&v| if v == label { in_value } else { out_value })
            .collect();
        Self {
            dims: self.dims,
            data,
            scalar_type: ScalarType::U8,
            ijk_to_ras: self.ijk_to_ras,
            origin: self.origin,
        }
    }

    /// Number of voxels equal to `label`.
    pub fn count_label(&self, label: i32) -> usize {
        self.data.par_iter().filter(|&&v| v == label).count()
    }
}

/// Sign flip between RAS and LPS, its own inverse.
pub fn ras_to_lps() -> Matrix4<f64> {
    Matrix4::from_diagonal(&nalgebra::Vector4::new(-1.0, -1.0, 1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube_volume() -> ScalarVolume {
        ScalarVolume::from_fn([4, 3, 2], ScalarType::U8, Matrix4::identity(), |i, j, k| {
            (i + 10 * j + 100 * k) as i32
        })
        .unwrap()
    }

    #[test]
    fn test_degenerate_volume_rejected() {
        let err = ScalarVolume::new([4, 4, 1], vec![0; 16], ScalarType::U8, Matrix4::identity())
            .unwrap_err();
        assert!(matches!(err, ModelError::DegenerateVolume { dims: [4, 4, 1] }));
    }

    #[test]
    fn test_wrong_data_length() {
        let err = ScalarVolume::new([2, 2, 2], vec![0; 7], ScalarType::U8, Matrix4::identity())
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidParameter { .. }));
    }

    #[test]
    fn test_indexing_is_x_fastest() {
        let volume = cube_volume();
        assert_eq!(volume.value(3, 0, 0), 3);
        assert_eq!(volume.value(1, 2, 1), 121);
        assert_eq!(volume.index(1, 2, 1), 1 + 4 * (2 + 3));
    }

    #[test]
    fn test_padding_keeps_positions() {
        let volume = cube_volume();
        let padded = volume.padded();
        assert_eq!(padded.dims(), [6, 5, 4]);
        assert_eq!(padded.value(0, 0, 0), 0);
        assert_eq!(padded.value(2, 3, 2), volume.value(1, 2, 1));
        assert_eq!(padded.position(2, 3, 2), volume.position(1, 2, 1));
        assert_eq!(padded.count_label(121), 1);
    }

    #[test]
    fn test_threshold_indicator() {
        let volume = cube_volume();
        let mask = volume.threshold(12, 200, 0);
        assert_eq!(mask.count_label(200), 1);
        assert_eq!(mask.value(2, 1, 0), 200);
        assert_eq!(mask.count_label(0), volume.voxel_count() - 1);
    }

    #[test]
    fn test_scalar_range_and_types() {
        assert_eq!(cube_volume().scalar_range(), (0, 123));
        assert_eq!(ScalarType::U8.max_value(), 255.0);
        assert_eq!(ScalarType::I16.size_bytes(), 2);
        assert_eq!(label_from_f64(2.7), 2);
        assert_eq!(label_from_f64(-0.5), -1);
        assert_eq!(label_from_f64(f64::NAN), 0);
    }

    #[test]
    fn test_lps_flips_first_two_axes() {
        let volume = cube_volume();
        let lps = volume.ijk_to_lps();
        assert_eq!(lps[(0, 0)], -1.0);
        assert_eq!(lps[(1, 1)], -1.0);
        assert_eq!(lps[(2, 2)], 1.0);
        assert_eq!(lps.determinant(), 1.0);
    }
}
