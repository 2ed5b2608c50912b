//! Model execution
//!
//! [`InferenceEngine`] is the seam to the numeric runtime. [`GraphEngine`]
//! runs a [`ModelHandle`]'s graph with Candle ops. Whether engine calls may
//! overlap is decided by [`EngineGuard`], which serializes them when asked to
//! or when the engine says it cannot run concurrently.

use crate::model::{GraphOp, ModelHandle};
use candle_core::{DType, Tensor, D};
use candle_nn::Module;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sightline_core::{ElementType, Error, Result};
use std::sync::Arc;

/// Candle dtype for a declared element type
pub fn dtype_for(element: ElementType) -> DType {
    match element {
        ElementType::U8 => DType::U8,
        ElementType::F32 => DType::F32,
    }
}

/// Executes a model against one prepared input tensor
pub trait InferenceEngine: Send + Sync {
    /// Run the model once. The returned tensor matches the model's declared
    /// output shape and element type.
    fn run(&self, input: &Tensor) -> Result<Tensor>;

    /// Whether `run` may be called from several threads at once
    fn supports_concurrent_execution(&self) -> bool;

    /// Engine name, for logs
    fn name(&self) -> &str;
}

/// Whether engine calls on one classifier may overlap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Calls run in parallel when the engine supports it
    #[default]
    Concurrent,
    /// Calls are queued behind a mutex
    Serialized,
}

/// Runs the graph stored in a [`ModelHandle`].
///
/// The engine keeps no per-call state: weights are immutable tensors and every
/// call allocates its own intermediates, so calls may run concurrently.
pub struct GraphEngine {
    model: Arc<ModelHandle>,
}

impl GraphEngine {
    pub fn new(model: Arc<ModelHandle>) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    /// Run the graph once on an all-zero input and check the result against
    /// the output declaration
    pub fn warmup(&self) -> Result<()> {
        let spec = self.model.input_spec();
        let zeros = Tensor::zeros(spec.shape.clone(), dtype_for(spec.dtype), self.model.device())
            .map_err(|e| Error::engine(format!("failed to allocate warm-up input: {e}")))?;
        self.run(&zeros).map(|_| ())
    }

    fn weight(&self, name: &str) -> candle_core::Result<&Tensor> {
        self.model
            .weight(name)
            .ok_or_else(|| candle_core::Error::Msg(format!("missing weight '{name}'")))
    }

    fn apply(&self, op: &GraphOp, x: Tensor) -> candle_core::Result<Tensor> {
        match op {
            GraphOp::NhwcToNchw => x.permute((0, 3, 1, 2))?.contiguous(),
            GraphOp::Conv2d {
                weight,
                bias,
                stride,
                padding,
            } => {
                let y = x.conv2d(self.weight(weight)?, *padding, *stride, 1, 1)?;
                match bias {
                    Some(bias) => {
                        let b = self.weight(bias)?;
                        y.broadcast_add(&b.reshape((1, b.elem_count(), 1, 1))?)
                    }
                    None => Ok(y),
                }
            }
            GraphOp::Relu => x.relu(),
            GraphOp::GlobalAvgPool => x.mean((2, 3)),
            GraphOp::Flatten => x.flatten_from(1),
            GraphOp::Linear { weight, bias } => {
                let bias = bias.as_deref().map(|b| self.weight(b)).transpose()?;
                candle_nn::Linear::new(self.weight(weight)?.clone(), bias.cloned()).forward(&x)
            }
            GraphOp::Softmax => candle_nn::ops::softmax(&x, D::Minus1),
            GraphOp::Quantize { scale, zero_point } => x
                .affine(1.0 / f64::from(*scale), 0.0)?
                .round()?
                .affine(1.0, f64::from(*zero_point))?
                .clamp(0f32, 255f32),
        }
    }
}

impl InferenceEngine for GraphEngine {
    fn run(&self, input: &Tensor) -> Result<Tensor> {
        let input_spec = self.model.input_spec();
        if input.dims() != input_spec.shape.as_slice() {
            return Err(Error::shape_mismatch(format!(
                "input tensor has shape {:?}, model expects {:?}",
                input.dims(),
                input_spec.shape
            )));
        }

        let mut x = input
            .to_dtype(DType::F32)
            .map_err(|e| Error::engine(format!("failed to cast input: {e}")))?;

        for (index, op) in self.model.graph().iter().enumerate() {
            x = self
                .apply(op, x)
                .map_err(|e| Error::engine(format!("op #{index} ({op:?}) failed: {e}")))?;
        }

        let output_spec = self.model.output_spec();
        if x.elem_count() != output_spec.num_elements() {
            return Err(Error::engine(format!(
                "graph produced {} values ({:?}), output declares {:?}",
                x.elem_count(),
                x.dims(),
                output_spec.shape
            )));
        }

        x.reshape(output_spec.shape.clone())
            .and_then(|x| x.to_dtype(dtype_for(output_spec.dtype)))
            .map_err(|e| Error::engine(format!("failed to shape output: {e}")))
    }

    fn supports_concurrent_execution(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "candle-graph"
    }
}

/// Exclusivity guard around an engine
pub struct EngineGuard {
    engine: Box<dyn InferenceEngine>,
    lock: Option<Mutex<()>>,
}

impl EngineGuard {
    pub fn new(engine: Box<dyn InferenceEngine>, mode: ExecutionMode) -> Self {
        let serialize = mode == ExecutionMode::Serialized || !engine.supports_concurrent_execution();
        if serialize {
            tracing::debug!("Engine '{}' calls will be serialized", engine.name());
        }

        Self {
            engine,
            lock: serialize.then(|| Mutex::new(())),
        }
    }

    /// Mode actually in effect
    pub fn mode(&self) -> ExecutionMode {
        if self.lock.is_some() {
            ExecutionMode::Serialized
        } else {
            ExecutionMode::Concurrent
        }
    }

    pub fn run(&self, input: &Tensor) -> Result<Tensor> {
        let _guard = self.lock.as_ref().map(|lock| lock.lock());
        self.engine.run(input)
    }

    pub fn engine(&self) -> &dyn InferenceEngine {
        self.engine.as_ref()
    }
}
