//! Sightline Classifier
//!
//! On-device image classification with a pre-trained model.
//!
//! The pipeline for one image:
//! - [`preprocess`]: crop to a centered square, resize, normalize into the
//!   model's declared input tensor
//! - [`engine`]: run the model graph with Candle
//! - [`postprocess`]: convert raw outputs to scores, attach labels, rank
//!
//! [`ImageClassifier`] owns the [`LabelSet`] and [`ModelHandle`] and drives
//! the three stages.

pub mod classifier;
pub mod config;
pub mod engine;
pub mod labels;
pub mod model;
pub mod postprocess;
pub mod preprocess;

pub use classifier::{Classification, ImageClassifier};
pub use config::{load_config, ClassifierConfig, DeviceSpec};
pub use engine::{EngineGuard, ExecutionMode, GraphEngine, InferenceEngine};
pub use labels::{LabelFormat, LabelSet};
pub use model::{DeviceType, GraphOp, ModelBuilder, ModelHandle, TensorDecl};
pub use postprocess::{OutputTransform, PostprocessConfig, Postprocessor, TieBreak};
pub use preprocess::{
    crop_or_pad, denormalize, normalize, CropMode, ImagePreprocessor, Normalization,
    PreprocessConfig, ResizeFilter,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::classifier::{Classification, ImageClassifier};
    pub use crate::config::ClassifierConfig;
    pub use crate::labels::{LabelFormat, LabelSet};
    pub use crate::model::{ModelBuilder, ModelHandle};
    pub use sightline_core::{Category, Error, LoadError, Result};
}
