//! Core types for Sightline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One classification hypothesis: a label and its confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    /// Human-readable class name
    pub label: String,

    /// Confidence score
    pub score: f32,
}

impl Category {
    /// Create a new category
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.4})", self.label, self.score)
    }
}

/// Element type of a model tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    /// 8-bit unsigned integer (quantized models)
    U8,
    /// 32-bit float
    F32,
}

impl ElementType {
    /// Size of one element in bytes
    pub fn size_in_bytes(&self) -> usize {
        match self {
            Self::U8 => 1,
            Self::F32 => 4,
        }
    }

    /// Whether values of this type are integer-encoded
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::U8)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::F32 => "f32",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "u8" | "uint8" => Ok(Self::U8),
            "f32" | "float32" => Ok(Self::F32),
            other => Err(crate::Error::config(format!(
                "unsupported element type: {other}"
            ))),
        }
    }
}

/// Affine quantization parameters: `real = scale * (quantized - zero_point)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizationParams {
    pub scale: f32,
    pub zero_point: i32,
}

impl QuantizationParams {
    pub fn new(scale: f32, zero_point: i32) -> Self {
        Self { scale, zero_point }
    }

    /// Map an integer-encoded value back to a real value
    pub fn dequantize(&self, quantized: f32) -> f32 {
        self.scale * (quantized - self.zero_point as f32)
    }

    /// Map a real value onto the `u8` grid, saturating at the type bounds
    pub fn quantize(&self, real: f32) -> u8 {
        let q = (real / self.scale).round() + self.zero_point as f32;
        q.clamp(0.0, 255.0) as u8
    }
}

/// Shape and element type of a tensor, as declared by a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    /// Dimension sizes, outermost first
    pub shape: Vec<usize>,

    /// Element type
    pub dtype: ElementType,
}

impl TensorSpec {
    pub fn new(shape: impl Into<Vec<usize>>, dtype: ElementType) -> Self {
        Self {
            shape: shape.into(),
            dtype,
        }
    }

    /// Total number of elements, saturating at `usize::MAX`.
    ///
    /// Use [`checked_num_elements`](Self::checked_num_elements) when the
    /// shape comes from untrusted input.
    pub fn num_elements(&self) -> usize {
        self.checked_num_elements().unwrap_or(usize::MAX)
    }

    /// Total number of elements, or `None` on overflow
    pub fn checked_num_elements(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    }

    /// Size of the tensor data in bytes, or `None` on overflow
    pub fn byte_len(&self) -> Option<usize> {
        self.checked_num_elements()?
            .checked_mul(self.dtype.size_in_bytes())
    }

    /// Number of dimensions
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Size of dimension `index`, if present
    pub fn dim(&self, index: usize) -> Option<usize> {
        self.shape.get(index).copied()
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.shape, self.dtype)
    }
}
