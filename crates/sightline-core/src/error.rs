//! Error types for Sightline

use std::path::PathBuf;

/// Result type alias using Sightline's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Sightline operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Label or model loading errors (construction time only)
    #[error("load error: {0}")]
    Load(#[from] LoadError),

    /// Label count, tensor shape or image dimension disagreements
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Image pre-processing errors
    #[error("preprocessing error: {0}")]
    Preprocess(String),

    /// Numeric runtime errors raised while executing the model
    #[error("engine error: {0}")]
    Engine(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem errors outside of model/label loading
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new shape mismatch error
    pub fn shape_mismatch(msg: impl Into<String>) -> Self {
        Self::ShapeMismatch(msg.into())
    }

    /// Create a new preprocessing error
    pub fn preprocess(msg: impl Into<String>) -> Self {
        Self::Preprocess(msg.into())
    }

    /// Create a new engine error
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Short stable name of the error kind, used as a metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Load(_) => "load",
            Self::ShapeMismatch(_) => "shape_mismatch",
            Self::Preprocess(_) => "preprocess",
            Self::Engine(_) => "engine",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }
}

/// Failures while reading the labels file or the model artifact.
///
/// Each variant names the file it refers to so callers can tell a missing
/// labels file from a corrupt model.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("labels file not found: {}", path.display())]
    LabelsMissing { path: PathBuf },

    #[error("failed to read labels file {}: {source}", path.display())]
    LabelsUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("labels file contains no labels: {}", path.display())]
    LabelsEmpty { path: PathBuf },

    #[error("model file not found: {}", path.display())]
    ModelMissing { path: PathBuf },

    #[error("failed to read model file {}: {source}", path.display())]
    ModelUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("model file {} is corrupt: {reason}", path.display())]
    ModelCorrupt { path: PathBuf, reason: String },

    #[error("model file {} declares no input tensors", path.display())]
    NoInputTensors { path: PathBuf },

    #[error("model file {} declares no output tensors", path.display())]
    NoOutputTensors { path: PathBuf },
}

impl LoadError {
    /// Create a new model corruption error
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ModelCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the failure concerns the labels file (as opposed to the model)
    pub fn is_labels_error(&self) -> bool {
        matches!(
            self,
            Self::LabelsMissing { .. } | Self::LabelsUnreadable { .. } | Self::LabelsEmpty { .. }
        )
    }
}
