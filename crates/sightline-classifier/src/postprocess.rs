//! Output post-processing: score conversion, labeling and ranking

use crate::labels::LabelSet;
use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};
use sightline_core::{Category, Error, QuantizationParams, Result, TensorSpec};
use std::cmp::Ordering;

/// Conversion from raw output values to scores
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputTransform {
    /// Dequantize integer outputs with the model's declared parameters;
    /// float outputs are used as-is
    #[default]
    Auto,
    /// Use raw values as scores
    Identity,
    /// Apply softmax to raw values (models that emit logits)
    Softmax,
    /// Dequantize with explicit parameters
    Dequantize { scale: f32, zero_point: i32 },
}

/// Ordering among categories with equal scores
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Lower output index first
    #[default]
    LowerIndex,
    /// Lexicographically smaller label first, then lower index
    Label,
}

/// Post-processing settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PostprocessConfig {
    #[serde(default)]
    pub output_transform: OutputTransform,

    #[serde(default)]
    pub tie_break: TieBreak,
}

/// A category together with the output position it came from
#[derive(Debug, Clone, PartialEq)]
struct Ranked {
    index: usize,
    category: Category,
}

/// Maps raw output tensors to ranked categories
#[derive(Debug, Clone)]
pub struct Postprocessor {
    output: TensorSpec,
    declared_quantization: Option<QuantizationParams>,
    config: PostprocessConfig,
}

impl Postprocessor {
    pub fn new(
        output: TensorSpec,
        declared_quantization: Option<QuantizationParams>,
        config: PostprocessConfig,
    ) -> Self {
        if output.dtype.is_integer()
            && declared_quantization.is_none()
            && config.output_transform == OutputTransform::Auto
        {
            tracing::warn!(
                "Integer output {} declares no quantization parameters, raw values used as scores",
                output
            );
        }

        Self {
            output,
            declared_quantization,
            config,
        }
    }

    pub fn config(&self) -> &PostprocessConfig {
        &self.config
    }

    /// Convert raw output values to scores
    pub fn scores(&self, raw: Vec<f32>) -> Vec<f32> {
        match self.config.output_transform {
            OutputTransform::Identity => raw,
            OutputTransform::Auto => match self.declared_quantization {
                Some(params) if self.output.dtype.is_integer() => {
                    raw.into_iter().map(|q| params.dequantize(q)).collect()
                }
                _ => raw,
            },
            OutputTransform::Dequantize { scale, zero_point } => {
                let params = QuantizationParams::new(scale, zero_point);
                raw.into_iter().map(|q| params.dequantize(q)).collect()
            }
            OutputTransform::Softmax => softmax(&raw),
        }
    }

    /// Flatten an output tensor into raw values
    pub fn read_output(&self, output: &Tensor) -> Result<Vec<f32>> {
        if output.elem_count() != self.output.num_elements() {
            return Err(Error::shape_mismatch(format!(
                "output tensor has {} values, model declares {}",
                output.elem_count(),
                self.output.num_elements()
            )));
        }

        output
            .flatten_all()
            .and_then(|t| t.to_dtype(DType::F32))
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| Error::engine(format!("failed to read output tensor: {e}")))
    }

    /// All categories, best first
    pub fn process(&self, output: &Tensor, labels: &LabelSet) -> Result<Vec<Category>> {
        let raw = self.read_output(output)?;
        self.rank(self.scores(raw), labels)
    }

    /// Label `scores` by position and sort them, best first.
    ///
    /// Fails with a shape mismatch when the number of scores differs from
    /// the number of labels.
    pub fn rank(&self, scores: Vec<f32>, labels: &LabelSet) -> Result<Vec<Category>> {
        if scores.len() != labels.len() {
            return Err(Error::shape_mismatch(format!(
                "model produced {} scores but {} labels are loaded",
                scores.len(),
                labels.len()
            )));
        }

        let mut ranked: Vec<Ranked> = scores
            .into_iter()
            .zip(labels.iter())
            .enumerate()
            .map(|(index, (score, label))| Ranked {
                index,
                category: Category::new(label, score),
            })
            .collect();

        let tie_break = self.config.tie_break;
        ranked.sort_by(|a, b| compare(a, b, tie_break));

        Ok(ranked.into_iter().map(|r| r.category).collect())
    }

    /// The `k` best categories
    pub fn top_k(&self, output: &Tensor, labels: &LabelSet, k: usize) -> Result<Vec<Category>> {
        let mut categories = self.process(output, labels)?;
        categories.truncate(k);
        Ok(categories)
    }
}

/// Total order: score descending with NaN last, then the tie-break rule
fn compare(a: &Ranked, b: &Ranked, tie_break: TieBreak) -> Ordering {
    let by_score = match (a.category.score.is_nan(), b.category.score.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.category.score.total_cmp(&a.category.score),
    };

    by_score.then_with(|| match tie_break {
        TieBreak::LowerIndex => a.index.cmp(&b.index),
        TieBreak::Label => a
            .category
            .label
            .cmp(&b.category.label)
            .then_with(|| a.index.cmp(&b.index)),
    })
}

fn softmax(values: &[f32]) -> Vec<f32> {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
