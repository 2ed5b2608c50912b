//! Model artifact loading and authoring
//!
//! A model artifact is a safetensors file. Weights are stored as ordinary
//! named tensors and the network description lives in the header's
//! `__metadata__` map:
//!
//! - `sightline.name`: model name (plain string)
//! - `sightline.inputs` / `sightline.outputs`: JSON arrays of [`TensorDecl`]
//! - `sightline.graph`: JSON array of [`GraphOp`], executed in order

use candle_core::{Device, Tensor};
use safetensors::SafeTensors;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sightline_core::{ElementType, Error, LoadError, QuantizationParams, Result, TensorSpec};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const NAME_KEY: &str = "sightline.name";
pub const INPUTS_KEY: &str = "sightline.inputs";
pub const OUTPUTS_KEY: &str = "sightline.outputs";
pub const GRAPH_KEY: &str = "sightline.graph";

/// Upper bound on the data size of one declared input or output tensor
pub const MAX_TENSOR_BYTES: usize = 256 * 1024 * 1024;

/// Device type for inference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeviceType {
    /// CPU inference (always available)
    #[default]
    Cpu,
    /// CUDA GPU inference (if available)
    Cuda(usize), // GPU index
    /// Metal (Apple Silicon)
    Metal(usize),
}

impl DeviceType {
    /// Create the Candle device for this device type
    pub fn create_device(&self) -> Result<Device> {
        match self {
            Self::Cpu => Ok(Device::Cpu),
            Self::Cuda(idx) => Device::new_cuda(*idx)
                .map_err(|e| Error::config(format!("Failed to create CUDA device: {}", e))),
            Self::Metal(idx) => Device::new_metal(*idx)
                .map_err(|e| Error::config(format!("Failed to create Metal device: {}", e))),
        }
    }
}

/// A tensor declared by the model as one of its inputs or outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorDecl {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: ElementType,

    /// Present for integer-encoded tensors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization: Option<QuantizationParams>,
}

impl TensorDecl {
    pub fn new(name: impl Into<String>, shape: impl Into<Vec<usize>>, dtype: ElementType) -> Self {
        Self {
            name: name.into(),
            shape: shape.into(),
            dtype,
            quantization: None,
        }
    }

    pub fn with_quantization(mut self, params: QuantizationParams) -> Self {
        self.quantization = Some(params);
        self
    }

    pub fn spec(&self) -> TensorSpec {
        TensorSpec::new(self.shape.clone(), self.dtype)
    }
}

/// One step of the model graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GraphOp {
    /// `[N, H, W, C]` -> `[N, C, H, W]`
    NhwcToNchw,

    /// 2D convolution over NCHW; weight is `[out, in, kh, kw]`
    Conv2d {
        weight: String,
        #[serde(default)]
        bias: Option<String>,
        #[serde(default = "default_stride")]
        stride: usize,
        #[serde(default)]
        padding: usize,
    },

    Relu,

    /// Mean over the spatial dimensions: `[N, C, H, W]` -> `[N, C]`
    GlobalAvgPool,

    /// Collapse every dimension after the batch dimension
    Flatten,

    /// Fully connected layer; weight is `[out, in]`
    Linear {
        weight: String,
        #[serde(default)]
        bias: Option<String>,
    },

    /// Softmax over the last dimension
    Softmax,

    /// Map real values onto the `u8` grid (values stay f32 until the final cast)
    Quantize { scale: f32, zero_point: i32 },
}

fn default_stride() -> usize {
    1
}

impl GraphOp {
    /// Names of the weight tensors this op reads
    pub fn weight_names(&self) -> Vec<&str> {
        match self {
            Self::Conv2d { weight, bias, .. } | Self::Linear { weight, bias } => {
                std::iter::once(weight.as_str())
                    .chain(bias.as_deref())
                    .collect()
            }
            _ => Vec::new(),
        }
    }
}

/// A loaded model plus its declared input/output contracts
pub struct ModelHandle {
    name: String,
    path: PathBuf,
    inputs: Vec<TensorDecl>,
    outputs: Vec<TensorDecl>,
    graph: Vec<GraphOp>,
    weights: HashMap<String, Tensor>,
    device: Device,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("ops", &self.graph.len())
            .field("weights", &self.weights.len())
            .finish()
    }
}

impl ModelHandle {
    /// Load a model artifact onto `device`
    pub fn load(path: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let path = path.as_ref();

        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LoadError::ModelMissing {
                path: path.to_path_buf(),
            },
            _ => LoadError::ModelUnreadable {
                path: path.to_path_buf(),
                source: e,
            },
        })?;

        let model = Self::from_bytes(&bytes, path, device)?;

        tracing::info!(
            "Loaded model '{}' from {} (input {}, output {}, {} ops)",
            model.name,
            path.display(),
            model.input_spec(),
            model.output_spec(),
            model.graph.len()
        );

        Ok(model)
    }

    /// Decode a model artifact already held in memory. `path` is only used
    /// for naming and error messages.
    pub fn from_bytes(bytes: &[u8], path: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let path = path.as_ref();

        let (_, header) = SafeTensors::read_metadata(bytes)
            .map_err(|e| LoadError::corrupt(path, format!("invalid safetensors header: {e}")))?;
        let metadata = header.metadata().clone().unwrap_or_default();

        let inputs: Vec<TensorDecl> = decode_entry(&metadata, INPUTS_KEY, path)?.unwrap_or_default();
        if inputs.is_empty() {
            return Err(LoadError::NoInputTensors {
                path: path.to_path_buf(),
            }
            .into());
        }

        let outputs: Vec<TensorDecl> =
            decode_entry(&metadata, OUTPUTS_KEY, path)?.unwrap_or_default();
        if outputs.is_empty() {
            return Err(LoadError::NoOutputTensors {
                path: path.to_path_buf(),
            }
            .into());
        }

        for decl in inputs.iter().chain(outputs.iter()) {
            if decl.shape.is_empty() || decl.shape.contains(&0) {
                return Err(LoadError::corrupt(
                    path,
                    format!("tensor '{}' has invalid shape {:?}", decl.name, decl.shape),
                )
                .into());
            }
            match decl.spec().byte_len() {
                Some(bytes) if bytes <= MAX_TENSOR_BYTES => {}
                _ => {
                    return Err(LoadError::corrupt(
                        path,
                        format!(
                            "tensor '{}' with shape {:?} exceeds {} bytes",
                            decl.name, decl.shape, MAX_TENSOR_BYTES
                        ),
                    )
                    .into());
                }
            }
        }

        let graph: Vec<GraphOp> = decode_entry(&metadata, GRAPH_KEY, path)?
            .ok_or_else(|| LoadError::corrupt(path, format!("missing '{GRAPH_KEY}' entry")))?;

        let weights = candle_core::safetensors::load_buffer(bytes, device)
            .map_err(|e| LoadError::corrupt(path, format!("failed to load weights: {e}")))?;

        for name in graph.iter().flat_map(GraphOp::weight_names) {
            if !weights.contains_key(name) {
                return Err(
                    LoadError::corrupt(path, format!("graph references missing weight '{name}'"))
                        .into(),
                );
            }
        }

        let name = metadata
            .get(NAME_KEY)
            .cloned()
            .or_else(|| {
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "unknown".to_string());

        Ok(Self {
            name,
            path: path.to_path_buf(),
            inputs,
            outputs,
            graph,
            weights,
            device: device.clone(),
        })
    }

    /// Contract of the first declared input
    pub fn input_spec(&self) -> TensorSpec {
        self.inputs[0].spec()
    }

    /// Contract of the first declared output
    pub fn output_spec(&self) -> TensorSpec {
        self.outputs[0].spec()
    }

    pub fn input_quantization(&self) -> Option<QuantizationParams> {
        self.inputs[0].quantization
    }

    pub fn output_quantization(&self) -> Option<QuantizationParams> {
        self.outputs[0].quantization
    }

    pub fn inputs(&self) -> &[TensorDecl] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorDecl] {
        &self.outputs
    }

    pub fn graph(&self) -> &[GraphOp] {
        &self.graph
    }

    /// Weight tensor by name
    pub fn weight(&self, name: &str) -> Option<&Tensor> {
        self.weights.get(name)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn decode_entry<T: DeserializeOwned>(
    metadata: &HashMap<String, String>,
    key: &str,
    path: &Path,
) -> Result<Option<T>> {
    metadata
        .get(key)
        .map(|raw| {
            serde_json::from_str::<T>(raw).map_err(|e| {
                Error::from(LoadError::corrupt(path, format!("invalid '{key}' entry: {e}")))
            })
        })
        .transpose()
}

/// Builder for model artifacts in the format read by [`ModelHandle`]
#[derive(Debug, Clone, Default)]
pub struct ModelBuilder {
    name: Option<String>,
    inputs: Vec<TensorDecl>,
    outputs: Vec<TensorDecl>,
    graph: Vec<GraphOp>,
    weights: Vec<(String, Vec<usize>, Vec<f32>)>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Declare an input tensor
    pub fn with_input(mut self, decl: TensorDecl) -> Self {
        self.inputs.push(decl);
        self
    }

    /// Declare an output tensor
    pub fn with_output(mut self, decl: TensorDecl) -> Self {
        self.outputs.push(decl);
        self
    }

    /// Add an f32 weight tensor
    pub fn with_weight(
        mut self,
        name: impl Into<String>,
        shape: impl Into<Vec<usize>>,
        values: Vec<f32>,
    ) -> Self {
        self.weights.push((name.into(), shape.into(), values));
        self
    }

    /// Append an op to the graph
    pub fn with_op(mut self, op: GraphOp) -> Self {
        self.graph.push(op);
        self
    }

    /// Serialize the artifact
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut metadata = HashMap::new();
        if let Some(name) = &self.name {
            metadata.insert(NAME_KEY.to_string(), name.clone());
        }
        metadata.insert(INPUTS_KEY.to_string(), serde_json::to_string(&self.inputs)?);
        metadata.insert(OUTPUTS_KEY.to_string(), serde_json::to_string(&self.outputs)?);
        metadata.insert(GRAPH_KEY.to_string(), serde_json::to_string(&self.graph)?);

        let raw: Vec<(String, Vec<usize>, Vec<u8>)> = self
            .weights
            .iter()
            .map(|(name, shape, values)| {
                let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
                (name.clone(), shape.clone(), bytes)
            })
            .collect();

        let mut views = Vec::with_capacity(raw.len());
        for (name, shape, bytes) in &raw {
            let view = safetensors::tensor::TensorView::new(
                safetensors::Dtype::F32,
                shape.clone(),
                bytes,
            )
            .map_err(|e| Error::internal(format!("invalid weight '{name}': {e}")))?;
            views.push((name.clone(), view));
        }

        safetensors::serialize(views, &Some(metadata))
            .map_err(|e| Error::internal(format!("failed to serialize model: {e}")))
    }

    /// Write the artifact to `path`
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}
