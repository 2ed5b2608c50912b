//! Image classifier: load once, predict many times
//!
//! [`ImageClassifier`] owns the labels and the model and runs
//! pre-process -> infer -> post-process for every image. Construction is the
//! only place that touches the filesystem; prediction is a pure function of
//! the classifier and the image.

use crate::config::ClassifierConfig;
use crate::engine::{EngineGuard, ExecutionMode, GraphEngine, InferenceEngine};
use crate::labels::LabelSet;
use crate::model::ModelHandle;
use crate::postprocess::Postprocessor;
use crate::preprocess::ImagePreprocessor;
use image::DynamicImage;
use sightline_core::{Category, Error, LoadError, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Result of classifying one image
#[derive(Debug, Clone)]
pub struct Classification {
    /// All categories, best first
    pub categories: Vec<Category>,

    /// Latency in microseconds
    pub latency_us: u64,
}

impl Classification {
    /// The highest-scoring category
    pub fn best(&self) -> Option<&Category> {
        self.categories.first()
    }
}

pub struct ImageClassifier {
    labels: LabelSet,
    model: Arc<ModelHandle>,
    preprocessor: ImagePreprocessor,
    engine: EngineGuard,
    postprocessor: Postprocessor,
}

impl std::fmt::Debug for ImageClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageClassifier")
            .field("labels", &self.labels.len())
            .field("model", &self.model.name())
            .field("execution", &self.engine.mode())
            .finish()
    }
}

impl ImageClassifier {
    /// Load labels and model with default settings.
    ///
    /// Any failure is logged and reported as `None`; use
    /// [`try_load_with`](Self::try_load_with) to get the error itself.
    pub fn load_with(labels_file: impl Into<PathBuf>, model_file: impl Into<PathBuf>) -> Option<Self> {
        match Self::try_load_with(labels_file, model_file) {
            Ok(classifier) => Some(classifier),
            Err(e) => {
                log_load_failure(&e);
                None
            }
        }
    }

    /// Load labels and model with default settings
    pub fn try_load_with(
        labels_file: impl Into<PathBuf>,
        model_file: impl Into<PathBuf>,
    ) -> Result<Self> {
        Self::from_config(&ClassifierConfig::new(labels_file, model_file))
    }

    /// Load labels and model as described by `config`
    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        config.validate()?;

        let labels = LabelSet::load(&config.labels, config.label_format)?;
        let device = config.device.to_device_type().create_device()?;
        let model = Arc::new(ModelHandle::load(&config.model, &device)?);

        Self::from_parts(labels, model, config)
    }

    /// Build a classifier around an already loaded model, executed by the
    /// built-in graph engine
    pub fn from_parts(
        labels: LabelSet,
        model: Arc<ModelHandle>,
        config: &ClassifierConfig,
    ) -> Result<Self> {
        let engine = GraphEngine::new(Arc::clone(&model));
        if config.warmup {
            engine.warmup().map_err(|e| {
                LoadError::corrupt(model.path(), format!("warm-up run failed: {e}"))
            })?;
        }

        Self::with_engine(labels, model, Box::new(engine), config)
    }

    /// Build a classifier that runs inference through `engine`
    pub fn with_engine(
        labels: LabelSet,
        model: Arc<ModelHandle>,
        engine: Box<dyn InferenceEngine>,
        config: &ClassifierConfig,
    ) -> Result<Self> {
        let output = model.output_spec();
        if output.num_elements() != labels.len() {
            return Err(Error::shape_mismatch(format!(
                "{} labels loaded but model output {} has {} values",
                labels.len(),
                output,
                output.num_elements()
            )));
        }

        let preprocessor = ImagePreprocessor::for_model(&model, config.preprocessing)?;
        let postprocessor =
            Postprocessor::new(output, model.output_quantization(), config.postprocessing);
        let engine = EngineGuard::new(engine, config.execution);

        tracing::info!(
            "Classifier ready: model '{}', {} labels, engine '{}' ({:?})",
            model.name(),
            labels.len(),
            engine.engine().name(),
            engine.mode()
        );

        Ok(Self {
            labels,
            model,
            preprocessor,
            engine,
            postprocessor,
        })
    }

    /// Load on the blocking thread pool; failures are logged and reported as `None`
    pub async fn load_with_async(
        labels_file: impl Into<PathBuf>,
        model_file: impl Into<PathBuf>,
    ) -> Option<Self> {
        let labels_file = labels_file.into();
        let model_file = model_file.into();

        match tokio::task::spawn_blocking(move || Self::load_with(labels_file, model_file)).await {
            Ok(classifier) => classifier,
            Err(e) => {
                tracing::error!("Classifier loading task failed: {}", e);
                None
            }
        }
    }

    /// Classify one image and return the best category
    pub fn predict(&self, image: &DynamicImage) -> Result<Category> {
        self.classify(image)?
            .categories
            .into_iter()
            .next()
            .ok_or_else(|| Error::internal("classification produced no categories"))
    }

    /// Classify one image and return the `k` best categories
    pub fn predict_top_k(&self, image: &DynamicImage, k: usize) -> Result<Vec<Category>> {
        let mut categories = self.classify(image)?.categories;
        categories.truncate(k);
        Ok(categories)
    }

    /// Classify one image and return every category, best first
    pub fn classify(&self, image: &DynamicImage) -> Result<Classification> {
        let start = Instant::now();

        let result = self.run_pipeline(image);
        let latency_us = start.elapsed().as_micros() as u64;

        metrics::histogram!("sightline_predict_latency_us").record(latency_us as f64);
        match &result {
            Ok(categories) => {
                metrics::counter!("sightline_predictions_total").increment(1);
                if let Some(best) = categories.first() {
                    tracing::debug!("Predicted {} in {}us", best, latency_us);
                }
            }
            Err(e) => {
                metrics::counter!("sightline_prediction_errors_total", "kind" => e.kind())
                    .increment(1);
                tracing::warn!("Prediction failed: {}", e);
            }
        }

        Ok(Classification {
            categories: result?,
            latency_us,
        })
    }

    /// Run [`predict`](Self::predict) on the blocking thread pool
    pub async fn predict_async(self: Arc<Self>, image: DynamicImage) -> Result<Category> {
        tokio::task::spawn_blocking(move || self.predict(&image))
            .await
            .map_err(|e| Error::internal(format!("prediction task failed: {e}")))?
    }

    fn run_pipeline(&self, image: &DynamicImage) -> Result<Vec<Category>> {
        let input = self.preprocessor.process(image)?;
        let output = self.engine.run(&input)?;
        self.postprocessor.process(&output, &self.labels)
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    pub fn preprocessor(&self) -> &ImagePreprocessor {
        &self.preprocessor
    }

    /// Execution mode in effect for engine calls
    pub fn execution_mode(&self) -> ExecutionMode {
        self.engine.mode()
    }
}

fn log_load_failure(error: &Error) {
    let mut chain = Vec::new();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }

    let asset = match error {
        Error::Load(load) if load.is_labels_error() => "labels",
        Error::Load(_) => "model",
        _ => "classifier",
    };

    if chain.is_empty() {
        tracing::error!(asset, "Failed to load classifier: {}", error);
    } else {
        tracing::error!(
            asset,
            "Failed to load classifier: {} (caused by: {})",
            error,
            chain.join(": ")
        );
    }
}
