//! Run parameters.
//!
//! [`ModelMakerParams`] holds every knob of a run. Its defaults are those of
//! the command line tool. With the `pipeline-config` feature the parameters
//! can be kept in TOML or JSON files:
//!
//! ```toml
//! name = "Brain"
//! generate_all = true
//! smooth = 20
//! decimate = 0.5
//! filter_type = "laplacian"
//! color_table = "GenericAnatomyColors.txt"
//! ```
//!
//! Fields missing from a file keep their defaults.

use std::path::PathBuf;

use crate::decimate::DecimateParams;
use crate::error::{ModelError, ModelResult};
use crate::normals::NormalsParams;
use crate::smooth::{FilterType, SmoothParams};

/// Every parameter of a model making run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
#[cfg_attr(feature = "pipeline-config", serde(default))]
pub struct ModelMakerParams {
    /// Explicit labels to make models from.
    pub labels: Vec<i32>,
    /// First label of a range, −1 when unset.
    pub start_label: i32,
    /// Last label of a range, −1 when unset.
    pub end_label: i32,
    /// Make a model for every label present in the volume.
    pub generate_all: bool,
    /// Base model name.
    pub name: String,
    /// Extract and smooth all labels together so shared boundaries match.
    pub joint_smoothing: bool,
    /// Smoothing iterations, 0 to skip smoothing.
    pub smooth: u32,
    /// Target reduction of the triangle count in `[0, 1)`.
    pub decimate: f64,
    /// Split vertices along sharp edges when computing point normals.
    pub split_normals: bool,
    /// Per-vertex normals instead of per-face normals.
    pub point_normals: bool,
    /// Add a one voxel background border before extraction.
    pub pad: bool,
    pub filter_type: FilterType,
    /// Scene file, optionally `path#hierarchyNodeId`.
    pub scene: Option<String>,
    /// Scene file whose hierarchy organizes the models by name.
    pub model_hierarchy_file: Option<PathBuf>,
    /// Color table naming and coloring the labels.
    pub color_table: Option<PathBuf>,
    /// Skip labels without a usable name.
    pub skip_unnamed: bool,
    /// Also save the surface after extraction, decimation and smoothing.
    pub save_intermediate: bool,
    /// Verbose per-stage logging.
    pub debug: bool,
}

impl Default for ModelMakerParams {
    fn default() -> Self {
        Self {
            labels: Vec::new(),
            start_label: -1,
            end_label: -1,
            generate_all: false,
            name: "Model".to_string(),
            joint_smoothing: false,
            smooth: 10,
            decimate: 0.25,
            split_normals: true,
            point_normals: true,
            pad: false,
            filter_type: FilterType::Sinc,
            scene: None,
            model_hierarchy_file: None,
            color_table: None,
            skip_unnamed: true,
            save_intermediate: false,
            debug: false,
        }
    }
}

impl ModelMakerParams {
    /// Check parameter ranges.
    pub fn validate(&self) -> ModelResult<()> {
        if !(0.0..1.0).contains(&self.decimate) {
            return Err(ModelError::invalid_parameter(
                "decimate",
                format!("{} is outside [0, 1)", self.decimate),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(ModelError::invalid_parameter("name", "the model name is empty"));
        }
        if let Some(label) = self.labels.iter().find(|&&l| l < 0) {
            return Err(ModelError::invalid_parameter(
                "labels",
                format!("negative label {}", label),
            ));
        }
        Ok(())
    }

    /// Decimation settings of a run.
    pub fn decimate_params(&self) -> DecimateParams {
        DecimateParams::with_target_reduction(self.decimate)
    }

    /// Per-label smoothing settings.
    pub fn smooth_params(&self) -> SmoothParams {
        SmoothParams::for_filter(self.filter_type, self.smooth)
    }

    /// Joint smoothing settings.
    pub fn joint_smooth_params(&self) -> SmoothParams {
        SmoothParams::joint(self.smooth)
    }

    pub fn normals_params(&self) -> NormalsParams {
        NormalsParams {
            point_normals: self.point_normals,
            splitting: self.split_normals,
            ..NormalsParams::default()
        }
    }
}

#[cfg(feature = "pipeline-config")]
impl ModelMakerParams {
    /// Parse TOML.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Read a TOML file.
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save_toml(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Errors reading or writing parameter files.
#[cfg(feature = "pipeline-config")]
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    TomlParse(toml::de::Error),
    TomlSerialize(toml::ser::Error),
}

#[cfg(feature = "pipeline-config")]
impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::TomlParse(e) => write!(f, "TOML parse error: {}", e),
            Self::TomlSerialize(e) => write!(f, "TOML serialize error: {}", e),
        }
    }
}

#[cfg(feature = "pipeline-config")]
impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::TomlParse(e) => Some(e),
            Self::TomlSerialize(e) => Some(e),
        }
    }
}

#[cfg(feature = "pipeline-config")]
impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(feature = "pipeline-config")]
impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::TomlParse(e)
    }
}

#[cfg(feature = "pipeline-config")]
impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> Self {
        Self::TomlSerialize(e)
    }
}
