//! Error types for model generation with rich diagnostics.
//!
//! Every failure carries:
//! - A machine-readable error code (`MODEL-XXXX`)
//! - An [`ErrorKind`] that decides whether the run aborts or the label is skipped
//! - A recovery suggestion for the command-line report
//! - Terminal display via miette
//!
//! # Error Codes
//!
//! - `MODEL-1xxx`: Configuration errors (input, labels, parameters)
//! - `MODEL-2xxx`: Resource errors (files, directories, color tables)
//! - `MODEL-3xxx`: Filter errors (a geometry stage failed)
//! - `MODEL-4xxx`: Format errors (malformed or unsupported files)
//! - `MODEL-5xxx`: Per-label skips (never abort a run)
//! - `MODEL-9001`: Cancellation requested by the progress sink
//!
//! # Example
//!
//! ```rust
//! use model_maker::{ErrorKind, ModelError};
//!
//! let err = ModelError::EmptySurface { label: 5 };
//! assert_eq!(err.code().as_str(), "MODEL-5001");
//! assert_eq!(err.kind(), ErrorKind::Skip);
//! assert!(!err.kind().is_fatal());
//! ```

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::Stage;

/// Result type alias for model generation.
pub type ModelResult<T> = Result<T, ModelError>;

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Configuration errors (1xxx)
    /// MODEL-1001: No input volume given
    MissingInput = 1001,
    /// MODEL-1002: No output scene path could be derived
    NoOutputPath = 1002,
    /// MODEL-1003: Volume has a degenerate axis
    DegenerateVolume = 1003,
    /// MODEL-1004: No labels resolvable from the selection flags
    NoLabels = 1004,
    /// MODEL-1005: Parameter out of range
    InvalidParameter = 1005,

    // Resource errors (2xxx)
    /// MODEL-2001: Failed to read file
    IoRead = 2001,
    /// MODEL-2002: Failed to write file
    IoWrite = 2002,
    /// MODEL-2003: Color table required but unavailable
    ColorTableUnavailable = 2003,
    /// MODEL-2004: Output directory unusable
    OutputDirectory = 2004,

    // Filter errors (3xxx)
    /// MODEL-3001: A geometry stage failed
    FilterFailed = 3001,

    // Format errors (4xxx)
    /// MODEL-4001: Malformed file
    ParseError = 4001,
    /// MODEL-4002: Unsupported file variant
    UnsupportedFormat = 4002,

    // Skips (5xxx)
    /// MODEL-5001: Isosurface produced no polygons
    EmptySurface = 5001,
    /// MODEL-5002: Label has no usable name
    UnnamedLabel = 5002,
    /// MODEL-5003: Label has no voxels
    NoVoxels = 5003,

    /// MODEL-9001: Cancelled
    Cancelled = 9001,
}

impl ErrorCode {
    /// Returns the error code as a string in the format `MODEL-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingInput => "MODEL-1001",
            ErrorCode::NoOutputPath => "MODEL-1002",
            ErrorCode::DegenerateVolume => "MODEL-1003",
            ErrorCode::NoLabels => "MODEL-1004",
            ErrorCode::InvalidParameter => "MODEL-1005",
            ErrorCode::IoRead => "MODEL-2001",
            ErrorCode::IoWrite => "MODEL-2002",
            ErrorCode::ColorTableUnavailable => "MODEL-2003",
            ErrorCode::OutputDirectory => "MODEL-2004",
            ErrorCode::FilterFailed => "MODEL-3001",
            ErrorCode::ParseError => "MODEL-4001",
            ErrorCode::UnsupportedFormat => "MODEL-4002",
            ErrorCode::EmptySurface => "MODEL-5001",
            ErrorCode::UnnamedLabel => "MODEL-5002",
            ErrorCode::NoVoxels => "MODEL-5003",
            ErrorCode::Cancelled => "MODEL-9001",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the per-label loop treats an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input or flags, reported before any output is written.
    Configuration,
    /// A file, directory or color table could not be used.
    Resource,
    /// A geometry stage failed.
    Filter,
    /// A file was malformed or uses an unsupported variant.
    Format,
    /// The label is recorded as skipped and the run continues.
    Skip,
    /// The progress sink asked to stop.
    Cancelled,
}

impl ErrorKind {
    /// Whether the error aborts the whole run.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ErrorKind::Skip)
    }
}

/// Recovery suggestions shown next to an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Check flags or parameter values.
    AdjustParameters { parameters: Vec<(String, String)> },
    /// Select labels differently.
    ChangeLabelSelection { hint: String },
    /// Check that a path exists and is accessible.
    CheckPath { path: PathBuf },
    /// Convert the input to a supported variant.
    ConvertInput { suggested: String },
    /// Nothing to do, the label was skipped on purpose.
    Ignorable,
    /// No automatic recovery available.
    None,
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoverySuggestion::AdjustParameters { parameters } => {
                let params: Vec<String> = parameters
                    .iter()
                    .map(|(k, v)| format!("{} = {}", k, v))
                    .collect();
                write!(f, "Try adjusting: {}", params.join(", "))
            }
            RecoverySuggestion::ChangeLabelSelection { hint } => write!(f, "{}", hint),
            RecoverySuggestion::CheckPath { path } => {
                write!(f, "Check that {} exists and is accessible", path.display())
            }
            RecoverySuggestion::ConvertInput { suggested } => {
                write!(f, "Convert the input to {}", suggested)
            }
            RecoverySuggestion::Ignorable => write!(f, "No action needed, the label was skipped"),
            RecoverySuggestion::None => write!(f, "No automatic recovery available"),
        }
    }
}

/// Where an error happened.
#[derive(Debug, Clone)]
pub enum ErrorLocation {
    /// While processing a label.
    Label { label: i32, stage: Option<Stage> },
    /// In a file, optionally at a line.
    File { path: PathBuf, line: Option<usize> },
}

impl std::fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorLocation::Label { label, stage } => match stage {
                Some(stage) => write!(f, "label {} during {}", label, stage),
                None => write!(f, "label {}", label),
            },
            ErrorLocation::File { path, line } => match line {
                Some(l) => write!(f, "{}:{}", path.display(), l),
                None => write!(f, "{}", path.display()),
            },
        }
    }
}

/// Errors that can occur while building models.
#[derive(Debug, Error, Diagnostic)]
pub enum ModelError {
    /// No input volume was given.
    #[error("no input volume defined")]
    #[diagnostic(code(model::config::input), help("Pass the label volume as the first argument"))]
    MissingInput,

    /// No output scene path could be resolved.
    #[error("no output scene path could be derived from {input}")]
    #[diagnostic(code(model::config::output), help("Pass --scene with an explicit path"))]
    NoOutputPath { input: PathBuf },

    /// The volume has an axis of size 1 or 0.
    #[error("the volume is not 3D: dimensions {dims:?}")]
    #[diagnostic(
        code(model::config::volume),
        help("Isosurface extraction needs at least two samples along every axis")
    )]
    DegenerateVolume { dims: [usize; 3] },

    /// No labels could be resolved from the selection flags.
    #[error("no labels to process: {details}")]
    #[diagnostic(
        code(model::config::labels),
        help("Use --labels, --start-label/--end-label, or --generate-all")
    )]
    NoLabels { details: String },

    /// A parameter is out of range.
    #[error("invalid parameter {name}: {details}")]
    #[diagnostic(code(model::config::parameter))]
    InvalidParameter { name: String, details: String },

    /// Error reading from a file.
    #[error("failed to read {path}")]
    #[diagnostic(
        code(model::io::read),
        help("Check that the file exists and is readable. Try: ls -la {}", path.display())
    )]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error writing to a file.
    #[error("failed to write {path}")]
    #[diagnostic(code(model::io::write), help("Check that the directory exists and is writable"))]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A color table was requested but cannot be used.
    #[error("color table {path} is unavailable: {details}")]
    #[diagnostic(
        code(model::resource::color_table),
        help("Pass a readable color table file, or drop --color-table")
    )]
    ColorTableUnavailable { path: PathBuf, details: String },

    /// The output directory cannot be created or used.
    #[error("cannot use output directory {path}")]
    #[diagnostic(code(model::resource::directory))]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A geometry stage failed.
    #[error("{stage} failed for label {label}: {details}")]
    #[diagnostic(code(model::filter::failed))]
    FilterFailed {
        stage: Stage,
        label: i32,
        details: String,
    },

    /// A file is malformed.
    #[error("failed to parse {path}: {details}")]
    #[diagnostic(
        code(model::format::parse),
        help("The file may be truncated or written by an incompatible tool")
    )]
    ParseError {
        path: PathBuf,
        line: Option<usize>,
        details: String,
    },

    /// A file uses a variant this crate does not read.
    #[error("unsupported format in {path}: {details}")]
    #[diagnostic(code(model::format::unsupported))]
    UnsupportedFormat { path: PathBuf, details: String },

    /// The isosurface of a label has no polygons.
    #[error("label {label} produced no polygons")]
    #[diagnostic(code(model::skip::empty), severity(Warning))]
    EmptySurface { label: i32 },

    /// The label has no usable name and unnamed labels are skipped.
    #[error("label {label} has no usable name ({})", .name.as_deref().unwrap_or("not in color table"))]
    #[diagnostic(code(model::skip::unnamed), severity(Warning))]
    UnnamedLabel { label: i32, name: Option<String> },

    /// The label has no voxels in the volume.
    #[error("label {label} has no voxels")]
    #[diagnostic(code(model::skip::empty_label), severity(Warning))]
    NoVoxels { label: i32 },

    /// The progress sink requested cancellation.
    #[error("cancelled before label {label}")]
    #[diagnostic(code(model::cancelled))]
    Cancelled { label: i32 },
}

impl ModelError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            ModelError::MissingInput => ErrorCode::MissingInput,
            ModelError::NoOutputPath { .. } => ErrorCode::NoOutputPath,
            ModelError::DegenerateVolume { .. } => ErrorCode::DegenerateVolume,
            ModelError::NoLabels { .. } => ErrorCode::NoLabels,
            ModelError::InvalidParameter { .. } => ErrorCode::InvalidParameter,
            ModelError::IoRead { .. } => ErrorCode::IoRead,
            ModelError::IoWrite { .. } => ErrorCode::IoWrite,
            ModelError::ColorTableUnavailable { .. } => ErrorCode::ColorTableUnavailable,
            ModelError::OutputDirectory { .. } => ErrorCode::OutputDirectory,
            ModelError::FilterFailed { .. } => ErrorCode::FilterFailed,
            ModelError::ParseError { .. } => ErrorCode::ParseError,
            ModelError::UnsupportedFormat { .. } => ErrorCode::UnsupportedFormat,
            ModelError::EmptySurface { .. } => ErrorCode::EmptySurface,
            ModelError::UnnamedLabel { .. } => ErrorCode::UnnamedLabel,
            ModelError::NoVoxels { .. } => ErrorCode::NoVoxels,
            ModelError::Cancelled { .. } => ErrorCode::Cancelled,
        }
    }

    /// Classifies the error for the per-label loop.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModelError::MissingInput
            | ModelError::NoOutputPath { .. }
            | ModelError::DegenerateVolume { .. }
            | ModelError::NoLabels { .. }
            | ModelError::InvalidParameter { .. } => ErrorKind::Configuration,
            ModelError::IoRead { .. }
            | ModelError::IoWrite { .. }
            | ModelError::ColorTableUnavailable { .. }
            | ModelError::OutputDirectory { .. } => ErrorKind::Resource,
            ModelError::FilterFailed { .. } => ErrorKind::Filter,
            ModelError::ParseError { .. } | ModelError::UnsupportedFormat { .. } => {
                ErrorKind::Format
            }
            ModelError::EmptySurface { .. }
            | ModelError::UnnamedLabel { .. }
            | ModelError::NoVoxels { .. } => ErrorKind::Skip,
            ModelError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            ModelError::MissingInput => RecoverySuggestion::AdjustParameters {
                parameters: vec![("input".into(), "<volume.nrrd>".into())],
            },
            ModelError::NoOutputPath { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![("--scene".into(), "<models.mrml>".into())],
            },
            ModelError::DegenerateVolume { .. } => RecoverySuggestion::ConvertInput {
                suggested: "a 3D volume with every dimension greater than 1".into(),
            },
            ModelError::NoLabels { .. } => RecoverySuggestion::ChangeLabelSelection {
                hint: "Give --labels, a --start-label/--end-label range, or --generate-all".into(),
            },
            ModelError::InvalidParameter { name, .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![(name.clone(), "a value in range".into())],
            },
            ModelError::IoRead { path, .. }
            | ModelError::IoWrite { path, .. }
            | ModelError::ColorTableUnavailable { path, .. }
            | ModelError::OutputDirectory { path, .. } => {
                RecoverySuggestion::CheckPath { path: path.clone() }
            }
            ModelError::FilterFailed { stage, .. } => RecoverySuggestion::AdjustParameters {
                parameters: stage
                    .parameter_hint()
                    .map(|(k, v)| vec![(k.to_string(), v.to_string())])
                    .unwrap_or_default(),
            },
            ModelError::ParseError { .. } => RecoverySuggestion::None,
            ModelError::UnsupportedFormat { .. } => RecoverySuggestion::ConvertInput {
                suggested: "a raw or gzip NRRD volume".into(),
            },
            ModelError::EmptySurface { .. }
            | ModelError::UnnamedLabel { .. }
            | ModelError::NoVoxels { .. } => RecoverySuggestion::Ignorable,
            ModelError::Cancelled { .. } => RecoverySuggestion::None,
        }
    }

    /// Returns where the error happened, if known.
    pub fn location(&self) -> Option<ErrorLocation> {
        match self {
            ModelError::FilterFailed { stage, label, .. } => Some(ErrorLocation::Label {
                label: *label,
                stage: Some(*stage),
            }),
            ModelError::EmptySurface { label }
            | ModelError::UnnamedLabel { label, .. }
            | ModelError::NoVoxels { label }
            | ModelError::Cancelled { label } => Some(ErrorLocation::Label {
                label: *label,
                stage: None,
            }),
            ModelError::ParseError { path, line, .. } => Some(ErrorLocation::File {
                path: path.clone(),
                line: *line,
            }),
            ModelError::IoRead { path, .. }
            | ModelError::IoWrite { path, .. }
            | ModelError::UnsupportedFormat { path, .. }
            | ModelError::ColorTableUnavailable { path, .. }
            | ModelError::OutputDirectory { path, .. } => Some(ErrorLocation::File {
                path: path.clone(),
                line: None,
            }),
            _ => None,
        }
    }

    /// Create an IoRead error.
    pub fn io_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ModelError::IoRead {
            path: path.into(),
            source,
        }
    }

    /// Create an IoWrite error.
    pub fn io_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ModelError::IoWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a ParseError without line information.
    pub fn parse(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        ModelError::ParseError {
            path: path.into(),
            line: None,
            details: details.into(),
        }
    }

    /// Create a ParseError at a line (1-based).
    pub fn parse_at(path: impl Into<PathBuf>, line: usize, details: impl Into<String>) -> Self {
        ModelError::ParseError {
            path: path.into(),
            line: Some(line),
            details: details.into(),
        }
    }

    /// Create an UnsupportedFormat error.
    pub fn unsupported(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        ModelError::UnsupportedFormat {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Create a FilterFailed error.
    pub fn filter_failed(stage: Stage, label: i32, details: impl Into<String>) -> Self {
        ModelError::FilterFailed {
            stage,
            label,
            details: details.into(),
        }
    }

    /// Create an InvalidParameter error.
    pub fn invalid_parameter(name: impl Into<String>, details: impl Into<String>) -> Self {
        ModelError::InvalidParameter {
            name: name.into(),
            details: details.into(),
        }
    }
}
