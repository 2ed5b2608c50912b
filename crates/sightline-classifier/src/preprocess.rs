//! Image pre-processing
//!
//! Turns a decoded image into a tensor matching the model's declared input
//! contract. The steps run in a fixed order:
//!
//! 1. channel conversion (luma or RGB, per the declared channel count)
//! 2. centered crop-or-pad to a `min(width, height)` square
//! 3. resize to the declared spatial size
//! 4. normalization `(x - mean) / std`
//!
//! Cropping and resizing run on native pixel values; normalization comes last.

use crate::model::ModelHandle;
use candle_core::{Device, Tensor};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use sightline_core::{ElementType, Error, QuantizationParams, Result, TensorSpec};

/// How the image is made square before resizing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropMode {
    /// Center crop to a square with side `min(width, height)`
    #[default]
    CenterSquare,
    /// Resize directly, accepting aspect-ratio distortion
    None,
}

/// Resampling filter used for the resize step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    #[default]
    Bilinear,
    CatmullRom,
    Lanczos3,
}

impl ResizeFilter {
    pub fn to_filter_type(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Bilinear => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Affine pixel normalization `x' = (x - mean) / std`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: f32,
    pub std: f32,
}

impl Default for Normalization {
    /// Maps the 0-255 channel range onto roughly [-1, 1]
    fn default() -> Self {
        Self {
            mean: 127.5,
            std: 127.5,
        }
    }
}

/// Normalize a single pixel value
pub fn normalize(x: f32, params: Normalization) -> f32 {
    (x - params.mean) / params.std
}

/// Inverse of [`normalize`]
pub fn denormalize(x: f32, params: Normalization) -> f32 {
    x * params.std + params.mean
}

/// Pre-processing settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    #[serde(default)]
    pub crop: CropMode,

    #[serde(default)]
    pub filter: ResizeFilter,

    /// `None` passes raw pixel values through
    #[serde(default = "default_normalization")]
    pub normalization: Option<Normalization>,
}

fn default_normalization() -> Option<Normalization> {
    Some(Normalization::default())
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            crop: CropMode::default(),
            filter: ResizeFilter::default(),
            normalization: default_normalization(),
        }
    }
}

/// Center-crop and/or zero-pad `image` to exactly `width` x `height`.
///
/// Each axis is handled independently: a larger source is cropped around its
/// center, a smaller one is placed in the center of a black canvas.
pub fn crop_or_pad(image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    let (src_w, src_h) = image.dimensions();
    if src_w == width && src_h == height {
        return image.clone();
    }

    let crop_w = src_w.min(width);
    let crop_h = src_h.min(height);
    let cropped = image.crop_imm((src_w - crop_w) / 2, (src_h - crop_h) / 2, crop_w, crop_h);
    if crop_w == width && crop_h == height {
        return cropped;
    }

    let mut canvas = DynamicImage::new(width, height, image.color());
    image::imageops::replace(
        &mut canvas,
        &cropped,
        i64::from((width - crop_w) / 2),
        i64::from((height - crop_h) / 2),
    );
    canvas
}

/// Converts images into input tensors for one model input contract
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    spec: TensorSpec,
    quantization: Option<QuantizationParams>,
    height: u32,
    width: u32,
    channels: usize,
    config: PreprocessConfig,
    device: Device,
}

impl ImagePreprocessor {
    /// Create a pre-processor for an NHWC `[1, H, W, C]` input contract
    pub fn new(
        spec: TensorSpec,
        quantization: Option<QuantizationParams>,
        config: PreprocessConfig,
        device: Device,
    ) -> Result<Self> {
        let [batch, height, width, channels] = spec.shape[..] else {
            return Err(Error::shape_mismatch(format!(
                "image input must be rank 4 [1, H, W, C], model declares {:?}",
                spec.shape
            )));
        };

        if batch != 1 {
            return Err(Error::shape_mismatch(format!(
                "image input batch size must be 1, model declares {batch}"
            )));
        }

        if channels != 1 && channels != 3 {
            return Err(Error::shape_mismatch(format!(
                "image input must have 1 or 3 channels, model declares {channels}"
            )));
        }

        if spec.dtype == ElementType::U8 && quantization.is_none() && config.normalization.is_some()
        {
            tracing::debug!("u8 input without quantization parameters, normalization skipped");
        }

        let to_u32 = |v: usize| {
            u32::try_from(v).map_err(|_| Error::shape_mismatch(format!("input dimension {v} too large")))
        };

        Ok(Self {
            height: to_u32(height)?,
            width: to_u32(width)?,
            channels,
            spec,
            quantization,
            config,
            device,
        })
    }

    /// Create a pre-processor for the first input of `model`
    pub fn for_model(model: &ModelHandle, config: PreprocessConfig) -> Result<Self> {
        Self::new(
            model.input_spec(),
            model.input_quantization(),
            config,
            model.device().clone(),
        )
    }

    /// The input contract produced tensors satisfy
    pub fn spec(&self) -> &TensorSpec {
        &self.spec
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Run the pixel-domain steps (channel conversion, crop, resize) and
    /// return the image that will be normalized
    pub fn prepare_image(&self, image: &DynamicImage) -> Result<DynamicImage> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(Error::shape_mismatch(format!(
                "image has zero dimension ({w}x{h})"
            )));
        }

        let converted = match self.channels {
            1 => DynamicImage::ImageLuma8(image.to_luma8()),
            _ => DynamicImage::ImageRgb8(image.to_rgb8()),
        };

        let squared = match self.config.crop {
            CropMode::CenterSquare => {
                let side = w.min(h);
                crop_or_pad(&converted, side, side)
            }
            CropMode::None => converted,
        };

        if squared.dimensions() == (self.width, self.height) {
            return Ok(squared);
        }

        Ok(squared.resize_exact(
            self.width,
            self.height,
            self.config.filter.to_filter_type(),
        ))
    }

    /// Produce an input tensor whose shape and element type equal the
    /// declared input contract
    pub fn process(&self, image: &DynamicImage) -> Result<Tensor> {
        let prepared = self.prepare_image(image)?;

        let pixels = match self.channels {
            1 => prepared.to_luma8().into_raw(),
            _ => prepared.to_rgb8().into_raw(),
        };

        let expected = self.spec.num_elements();
        if pixels.len() != expected {
            return Err(Error::preprocess(format!(
                "prepared image has {} values, input contract needs {}",
                pixels.len(),
                expected
            )));
        }

        let shape = self.spec.shape.clone();
        let tensor = match (self.spec.dtype, self.config.normalization, self.quantization) {
            (ElementType::F32, Some(params), _) => {
                let values: Vec<f32> = pixels
                    .iter()
                    .map(|&p| normalize(f32::from(p), params))
                    .collect();
                Tensor::from_vec(values, shape, &self.device)
            }
            (ElementType::F32, None, _) => {
                let values: Vec<f32> = pixels.iter().map(|&p| f32::from(p)).collect();
                Tensor::from_vec(values, shape, &self.device)
            }
            (ElementType::U8, Some(params), Some(quant)) => {
                let values: Vec<u8> = pixels
                    .iter()
                    .map(|&p| quant.quantize(normalize(f32::from(p), params)))
                    .collect();
                Tensor::from_vec(values, shape, &self.device)
            }
            // Raw pixels already sit on the u8 grid
            (ElementType::U8, _, _) => Tensor::from_vec(pixels, shape, &self.device),
        };

        tensor.map_err(|e| Error::preprocess(format!("failed to build input tensor: {e}")))
    }
}
