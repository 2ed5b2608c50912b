//! End-to-end classifier tests
//!
//! Every test loads real label and model files from a temporary directory.

mod common;

use common::{
    channel_mean_model, constant_model, framed_image, init_tracing, one_hot_model, solid_image,
    Fixture,
};
use sightline_classifier::prelude::*;
use sightline_classifier::{
    CropMode, ExecutionMode, GraphOp, InferenceEngine, PreprocessConfig, TensorDecl,
};
use sightline_core::{ElementType, QuantizationParams};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[test]
fn test_cat_dog_scenario() {
    let fixture = Fixture::new();
    let labels = fixture.labels(&["0 cat", "1 dog"]);
    let model = fixture.model("model.safetensors", &constant_model(&[0.2, 0.8]));

    let classifier = ImageClassifier::load_with(labels, model).expect("classifier should load");
    let category = classifier.predict(&solid_image(64, 64, [10, 20, 30])).unwrap();

    assert_eq!(category, Category::new("dog", 0.8));
}

#[test]
fn test_one_hot_returns_matching_label() {
    let fixture = Fixture::new();
    let names = ["0 apple", "1 banana", "2 cherry", "3 date", "4 elderberry"];
    let labels = fixture.labels(&names);

    for k in 0..names.len() {
        let model = fixture.model(&format!("one_hot_{k}.safetensors"), &one_hot_model(names.len(), k));
        let classifier = ImageClassifier::try_load_with(&labels, model).unwrap();

        let category = classifier.predict(&solid_image(5, 7, [0, 0, 0])).unwrap();
        assert_eq!(category.label, classifier.labels().get(k).unwrap());
        assert!((category.score - 1.0).abs() < 1e-6);
    }
}

#[test]
fn test_classification_is_sorted() {
    let fixture = Fixture::new();
    let labels = fixture.labels(&["0 a", "1 b", "2 c", "3 d"]);
    let model = fixture.model("model.safetensors", &constant_model(&[0.3, 0.1, 0.4, 0.2]));

    let classifier = ImageClassifier::try_load_with(labels, model).unwrap();
    let classification = classifier.classify(&solid_image(3, 3, [1, 2, 3])).unwrap();

    let order: Vec<_> = classification
        .categories
        .iter()
        .map(|c| c.label.as_str())
        .collect();
    assert_eq!(order, vec!["c", "a", "d", "b"]);
    assert_eq!(classification.best().unwrap().label, "c");

    let top = classifier.predict_top_k(&solid_image(3, 3, [1, 2, 3]), 2).unwrap();
    assert_eq!(top.len(), 2);
    assert_eq!(top[1].label, "a");
}

#[test]
fn test_zero_output_model_is_absent() {
    init_tracing();
    let fixture = Fixture::new();
    let labels = fixture.labels(&["0 cat", "1 dog"]);
    let broken = ModelBuilder::new()
        .with_input(TensorDecl::new("image", vec![1, 2, 2, 3], ElementType::F32))
        .with_op(GraphOp::Flatten);
    let model = fixture.model("broken.safetensors", &broken);

    assert!(ImageClassifier::load_with(&labels, &model).is_none());

    let err = ImageClassifier::try_load_with(labels, model).unwrap_err();
    assert!(matches!(err, Error::Load(LoadError::NoOutputTensors { .. })));
}

#[test]
fn test_load_errors_are_distinguishable() {
    init_tracing();
    let fixture = Fixture::new();
    let labels = fixture.labels(&["0 cat", "1 dog"]);
    let model = fixture.model("model.safetensors", &constant_model(&[0.2, 0.8]));

    let missing_labels = ImageClassifier::try_load_with(fixture.path("nope.txt"), &model).unwrap_err();
    assert!(matches!(missing_labels, Error::Load(LoadError::LabelsMissing { .. })));

    let missing_model =
        ImageClassifier::try_load_with(&labels, fixture.path("nope.safetensors")).unwrap_err();
    assert!(matches!(missing_model, Error::Load(LoadError::ModelMissing { .. })));

    let corrupt_path = fixture.path("corrupt.safetensors");
    std::fs::write(&corrupt_path, b"\x08\x00\x00\x00\x00\x00\x00\x00{garbage").unwrap();
    let corrupt = ImageClassifier::try_load_with(&labels, corrupt_path).unwrap_err();
    assert!(matches!(corrupt, Error::Load(LoadError::ModelCorrupt { .. })));

    let empty_labels = fixture.path("empty.txt");
    std::fs::write(&empty_labels, "").unwrap();
    let empty = ImageClassifier::try_load_with(empty_labels, &model).unwrap_err();
    assert!(matches!(empty, Error::Load(LoadError::LabelsEmpty { .. })));
}

#[test]
fn test_oversized_model_declaration_is_absent() {
    init_tracing();
    let fixture = Fixture::new();
    let labels = fixture.labels(&["0 cat", "1 dog"]);

    let huge_input = ModelBuilder::new()
        .with_input(TensorDecl::new("image", vec![1, 1usize << 40, 1 << 40, 3], ElementType::F32))
        .with_output(TensorDecl::new("scores", vec![1, 2], ElementType::F32))
        .with_op(GraphOp::Flatten);
    let model = fixture.model("huge_input.safetensors", &huge_input);
    assert!(ImageClassifier::load_with(&labels, &model).is_none());

    let huge_output = ModelBuilder::new()
        .with_input(TensorDecl::new("image", vec![1, 2, 2, 3], ElementType::F32))
        .with_output(TensorDecl::new("scores", vec![1usize << 40; 3], ElementType::F32))
        .with_op(GraphOp::Flatten);
    let model = fixture.model("huge_output.safetensors", &huge_output);
    let config = ClassifierConfig::new(&labels, &model).with_warmup(false);
    let err = ImageClassifier::from_config(&config).unwrap_err();
    assert!(matches!(err, Error::Load(LoadError::ModelCorrupt { .. })));
}

#[test]
fn test_label_count_mismatch_fails_fast() {
    let fixture = Fixture::new();
    let labels = fixture.labels(&["0 cat", "1 dog", "2 bird"]);
    let model = fixture.model("model.safetensors", &constant_model(&[0.2, 0.8]));

    let err = ImageClassifier::try_load_with(&labels, &model).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch(_)));
    assert!(ImageClassifier::load_with(labels, model).is_none());
}

#[test]
fn test_warmup_catches_inconsistent_graph() {
    let fixture = Fixture::new();
    let labels = fixture.labels(&["0 a", "1 b", "2 c", "3 d", "4 e"]);
    // Flatten yields 12 values, the output declares 5
    let inconsistent = ModelBuilder::new()
        .with_input(TensorDecl::new("image", vec![1, 2, 2, 3], ElementType::F32))
        .with_output(TensorDecl::new("scores", vec![1, 5], ElementType::F32))
        .with_op(GraphOp::Flatten);
    let model = fixture.model("inconsistent.safetensors", &inconsistent);

    let err = ImageClassifier::try_load_with(&labels, &model).unwrap_err();
    assert!(matches!(err, Error::Load(LoadError::ModelCorrupt { .. })));

    // Without warm-up the problem surfaces as an engine failure at predict time
    let config = ClassifierConfig::new(labels, model).with_warmup(false);
    let classifier = ImageClassifier::from_config(&config).unwrap();
    let err = classifier.predict(&solid_image(4, 4, [0, 0, 0])).unwrap_err();
    assert!(matches!(err, Error::Engine(_)));
}

#[test]
fn test_landscape_image_is_center_cropped() {
    let fixture = Fixture::new();
    let labels = fixture.labels(&["0 red", "1 green", "2 blue"]);
    let model = fixture.model("channels.safetensors", &channel_mean_model(8));
    let image = framed_image(640, 480);

    let classifier = ImageClassifier::try_load_with(&labels, &model).unwrap();
    let prepared = classifier.preprocessor().prepare_image(&image).unwrap();
    assert_eq!(prepared.width(), 8);
    assert_eq!(prepared.height(), 8);

    let ranked = classifier.classify(&image).unwrap().categories;
    assert_eq!(ranked[0].label, "blue");
    assert!((ranked[0].score - 1.0).abs() < 1e-5);
    let red = ranked.iter().find(|c| c.label == "red").unwrap();
    assert!((red.score + 1.0).abs() < 1e-5, "red margin leaked: {}", red.score);

    // Without cropping the red margins are resampled into the input
    let config = ClassifierConfig::new(labels, model).with_preprocessing(PreprocessConfig {
        crop: CropMode::None,
        ..Default::default()
    });
    let uncropped = ImageClassifier::from_config(&config).unwrap();
    let ranked = uncropped.classify(&image).unwrap().categories;
    let red = ranked.iter().find(|c| c.label == "red").unwrap();
    assert!(red.score > -0.9);
}

#[test]
fn test_portrait_image_is_center_cropped() {
    let fixture = Fixture::new();
    let labels = fixture.labels(&["0 red", "1 green", "2 blue"]);
    let model = fixture.model("channels.safetensors", &channel_mean_model(4));

    let classifier = ImageClassifier::try_load_with(labels, model).unwrap();
    let category = classifier.predict(&framed_image(300, 500)).unwrap();

    assert_eq!(category.label, "blue");
}

#[test]
fn test_quantized_model_end_to_end() {
    let fixture = Fixture::new();
    let labels = fixture.labels(&["0 red", "1 green", "2 blue"]);
    let quantized = ModelBuilder::new()
        .with_input(
            TensorDecl::new("image", vec![1, 4, 4, 3], ElementType::U8)
                .with_quantization(QuantizationParams::new(1.0 / 128.0, 128)),
        )
        .with_output(
            TensorDecl::new("scores", vec![1, 3], ElementType::U8)
                .with_quantization(QuantizationParams::new(1.0 / 255.0, 0)),
        )
        .with_op(GraphOp::NhwcToNchw)
        .with_op(GraphOp::GlobalAvgPool)
        .with_op(GraphOp::Quantize {
            scale: 1.0,
            zero_point: 0,
        });
    let model = fixture.model("quantized.safetensors", &quantized);

    let classifier = ImageClassifier::try_load_with(labels, model).unwrap();
    let ranked = classifier
        .classify(&solid_image(6, 6, [0, 255, 0]))
        .unwrap()
        .categories;

    assert_eq!(ranked[0].label, "green");
    assert!((ranked[0].score - 1.0).abs() < 1e-6);
    assert!(ranked[2].score.abs() < 1e-6);
}

#[test]
fn test_concurrent_predictions_share_one_classifier() {
    let fixture = Fixture::new();
    let labels = fixture.labels(&["0 red", "1 green", "2 blue"]);
    let model = fixture.model("channels.safetensors", &channel_mean_model(8));

    let classifier = Arc::new(ImageClassifier::try_load_with(labels, model).unwrap());
    assert_eq!(classifier.execution_mode(), ExecutionMode::Concurrent);

    let colors = [([255, 0, 0], "red"), ([0, 255, 0], "green"), ([0, 0, 255], "blue")];
    let handles: Vec<_> = (0..12)
        .map(|i| {
            let classifier = Arc::clone(&classifier);
            let (color, expected) = colors[i % colors.len()];
            std::thread::spawn(move || {
                let category = classifier.predict(&solid_image(32, 24, color)).unwrap();
                assert_eq!(category.label, expected);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

struct CountingEngine {
    calls: Arc<AtomicU32>,
    scores: Vec<f32>,
}

impl InferenceEngine for CountingEngine {
    fn run(&self, _input: &candle_core::Tensor) -> Result<candle_core::Tensor> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        candle_core::Tensor::from_vec(
            self.scores.clone(),
            (1, self.scores.len()),
            &candle_core::Device::Cpu,
        )
        .map_err(|e| Error::engine(e.to_string()))
    }

    fn supports_concurrent_execution(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "counting"
    }
}

#[test]
fn test_custom_engine_is_serialized() {
    let fixture = Fixture::new();
    let model_path = fixture.model("model.safetensors", &constant_model(&[0.0, 0.0]));
    let model = Arc::new(ModelHandle::load(&model_path, &candle_core::Device::Cpu).unwrap());
    let calls = Arc::new(AtomicU32::new(0));

    let classifier = ImageClassifier::with_engine(
        LabelSet::from_labels(["cat", "dog"]),
        model,
        Box::new(CountingEngine {
            calls: Arc::clone(&calls),
            scores: vec![0.9, 0.1],
        }),
        &ClassifierConfig::new("labels.txt", model_path),
    )
    .unwrap();

    assert_eq!(classifier.execution_mode(), ExecutionMode::Serialized);
    assert_eq!(
        classifier.predict(&solid_image(2, 2, [0, 0, 0])).unwrap(),
        Category::new("cat", 0.9)
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_zero_sized_image_is_rejected() {
    let fixture = Fixture::new();
    let labels = fixture.labels(&["0 cat", "1 dog"]);
    let model = fixture.model("model.safetensors", &constant_model(&[0.2, 0.8]));

    let classifier = ImageClassifier::try_load_with(labels, model).unwrap();
    let err = classifier.predict(&solid_image(0, 0, [0, 0, 0])).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch(_)));
}

#[test]
fn test_config_file_round_trip() {
    let fixture = Fixture::new();
    let labels = fixture.labels(&["cat", "dog"]);
    let model = fixture.model("model.safetensors", &constant_model(&[0.7, 0.3]));

    let config_path = fixture.path("classifier.yaml");
    std::fs::write(
        &config_path,
        format!(
            "labels: {}\nmodel: {}\nlabel_format: plain\nexecution: serialized\n",
            labels.display(),
            model.display()
        ),
    )
    .unwrap();

    let config = sightline_classifier::load_config(&config_path).unwrap();
    let classifier = ImageClassifier::from_config(&config).unwrap();

    assert_eq!(classifier.execution_mode(), ExecutionMode::Serialized);
    assert_eq!(
        classifier.predict(&solid_image(4, 4, [0, 0, 0])).unwrap().label,
        "cat"
    );
}

#[tokio::test]
async fn test_async_load_and_predict() {
    let fixture = Fixture::new();
    let labels = fixture.labels(&["0 cat", "1 dog"]);
    let model = fixture.model("model.safetensors", &constant_model(&[0.2, 0.8]));

    let classifier = ImageClassifier::load_with_async(labels, model)
        .await
        .map(Arc::new)
        .expect("classifier should load");

    let category = classifier
        .predict_async(solid_image(16, 16, [0, 0, 0]))
        .await
        .unwrap();
    assert_eq!(category.label, "dog");

    assert!(
        ImageClassifier::load_with_async(fixture.path("missing.txt"), fixture.path("missing.bin"))
            .await
            .is_none()
    );
}
