//! Fixture helpers shared by the integration tests
//!
//! Models are written with `ModelBuilder` into a temporary directory so each
//! test gets real files to load.

#![allow(dead_code)]

use image::{DynamicImage, Rgb, RgbImage};
use sightline_classifier::{GraphOp, ModelBuilder, TensorDecl};
use sightline_core::ElementType;
use std::path::PathBuf;
use tempfile::TempDir;

/// Route log output through the test harness so failures show what was logged
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("sightline=debug")
        .with_test_writer()
        .try_init();
}

pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write a labels file and return its path
    pub fn labels(&self, lines: &[&str]) -> PathBuf {
        let path = self.path("labels.txt");
        std::fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    /// Write a model and return its path
    pub fn model(&self, name: &str, builder: &ModelBuilder) -> PathBuf {
        let path = self.path(name);
        builder.save(&path).unwrap();
        path
    }
}

/// A model that ignores its input and always emits `scores`
pub fn constant_model(scores: &[f32]) -> ModelBuilder {
    let n = scores.len();
    ModelBuilder::new()
        .with_name("constant")
        .with_input(TensorDecl::new("image", vec![1, 2, 2, 3], ElementType::F32))
        .with_output(TensorDecl::new("scores", vec![1, n], ElementType::F32))
        .with_weight("fc.weight", vec![n, 12], vec![0.0; n * 12])
        .with_weight("fc.bias", vec![n], scores.to_vec())
        .with_op(GraphOp::Flatten)
        .with_op(GraphOp::Linear {
            weight: "fc.weight".to_string(),
            bias: Some("fc.bias".to_string()),
        })
}

/// A model whose output is one-hot at `k` out of `n` classes
pub fn one_hot_model(n: usize, k: usize) -> ModelBuilder {
    let mut scores = vec![0.0; n];
    scores[k] = 1.0;
    constant_model(&scores)
}

/// A model scoring the mean of each RGB channel: labels red, green, blue
pub fn channel_mean_model(size: usize) -> ModelBuilder {
    ModelBuilder::new()
        .with_name("channel-mean")
        .with_input(TensorDecl::new("image", vec![1, size, size, 3], ElementType::F32))
        .with_output(TensorDecl::new("scores", vec![1, 3], ElementType::F32))
        .with_weight(
            "fc.weight",
            vec![3, 3],
            vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        )
        .with_op(GraphOp::NhwcToNchw)
        .with_op(GraphOp::GlobalAvgPool)
        .with_op(GraphOp::Linear {
            weight: "fc.weight".to_string(),
            bias: None,
        })
}

/// `width` x `height` image that is blue in the center square and red in
/// the margins outside it
pub fn framed_image(width: u32, height: u32) -> DynamicImage {
    let side = width.min(height);
    let x0 = (width - side) / 2;
    let y0 = (height - side) / 2;
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        let inside = x >= x0 && x < x0 + side && y >= y0 && y < y0 + side;
        if inside {
            Rgb([0, 0, 255])
        } else {
            Rgb([255, 0, 0])
        }
    }))
}

pub fn solid_image(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
}
