//! Configuration for building a classifier

use crate::engine::ExecutionMode;
use crate::labels::LabelFormat;
use crate::model::DeviceType;
use crate::postprocess::PostprocessConfig;
use crate::preprocess::PreprocessConfig;
use serde::{Deserialize, Serialize};
use sightline_core::{Error, Result};
use std::path::{Path, PathBuf};

/// Everything needed to build an [`ImageClassifier`](crate::ImageClassifier)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Labels file, one label per line
    pub labels: PathBuf,

    /// Model artifact
    pub model: PathBuf,

    /// How label lines are parsed
    #[serde(default)]
    pub label_format: LabelFormat,

    /// Device to run inference on
    #[serde(default)]
    pub device: DeviceSpec,

    /// Whether engine calls may overlap
    #[serde(default)]
    pub execution: ExecutionMode,

    /// Run the model once at load time to validate its declarations
    #[serde(default = "default_warmup")]
    pub warmup: bool,

    #[serde(default)]
    pub preprocessing: PreprocessConfig,

    #[serde(default)]
    pub postprocessing: PostprocessConfig,
}

fn default_warmup() -> bool {
    true
}

/// Device specification (for config files)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSpec {
    #[default]
    Cpu,
    Cuda { index: Option<usize> },
    Metal { index: Option<usize> },
}

impl DeviceSpec {
    /// Convert to DeviceType
    pub fn to_device_type(&self) -> DeviceType {
        match self {
            DeviceSpec::Cpu => DeviceType::Cpu,
            DeviceSpec::Cuda { index } => DeviceType::Cuda(index.unwrap_or(0)),
            DeviceSpec::Metal { index } => DeviceType::Metal(index.unwrap_or(0)),
        }
    }
}

impl ClassifierConfig {
    /// Configuration with default settings for the given files
    pub fn new(labels: impl Into<PathBuf>, model: impl Into<PathBuf>) -> Self {
        Self {
            labels: labels.into(),
            model: model.into(),
            label_format: LabelFormat::default(),
            device: DeviceSpec::default(),
            execution: ExecutionMode::default(),
            warmup: default_warmup(),
            preprocessing: PreprocessConfig::default(),
            postprocessing: PostprocessConfig::default(),
        }
    }

    /// Load from YAML string
    pub fn from_yaml(yaml: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Load from file
    pub fn from_file(
        path: impl AsRef<Path>,
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml(&content)?)
    }

    pub fn with_label_format(mut self, format: LabelFormat) -> Self {
        self.label_format = format;
        self
    }

    pub fn with_device(mut self, device: DeviceSpec) -> Self {
        self.device = device;
        self
    }

    pub fn with_execution(mut self, mode: ExecutionMode) -> Self {
        self.execution = mode;
        self
    }

    pub fn with_warmup(mut self, enable: bool) -> Self {
        self.warmup = enable;
        self
    }

    pub fn with_preprocessing(mut self, preprocessing: PreprocessConfig) -> Self {
        self.preprocessing = preprocessing;
        self
    }

    pub fn with_postprocessing(mut self, postprocessing: PostprocessConfig) -> Self {
        self.postprocessing = postprocessing;
        self
    }

    /// Reject configurations that can never load
    pub fn validate(&self) -> Result<()> {
        if self.labels.as_os_str().is_empty() {
            return Err(Error::config("labels file must be set"));
        }
        if self.model.as_os_str().is_empty() {
            return Err(Error::config("model file must be set"));
        }
        if let Some(norm) = self.preprocessing.normalization {
            if norm.std == 0.0 || !norm.std.is_finite() || !norm.mean.is_finite() {
                return Err(Error::config(format!(
                    "invalid normalization parameters: mean {}, std {}",
                    norm.mean, norm.std
                )));
            }
        }
        Ok(())
    }
}

/// Load a classifier configuration file
pub fn load_config(path: impl AsRef<Path>) -> Result<ClassifierConfig> {
    ClassifierConfig::from_file(path.as_ref())
        .map_err(|e| Error::config(format!("Failed to load classifier config: {}", e)))
}
