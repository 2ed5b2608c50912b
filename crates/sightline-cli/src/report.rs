//! Printable results for the CLI commands

use serde::Serialize;
use sightline_classifier::{GraphOp, ModelHandle, TensorDecl};
use sightline_core::Category;
use std::path::Path;

/// Classification result for one image file
#[derive(Debug, Clone, Serialize)]
pub struct ImageReport {
    pub image: String,
    pub categories: Vec<Category>,
    pub latency_us: u64,
}

impl ImageReport {
    pub fn new(image: &Path, categories: Vec<Category>, latency_us: u64) -> Self {
        Self {
            image: image.display().to_string(),
            categories,
            latency_us,
        }
    }

    pub fn to_text(&self) -> String {
        let mut out = format!("{} ({}us)\n", self.image, self.latency_us);
        for (rank, category) in self.categories.iter().enumerate() {
            out.push_str(&format!(
                "  {}. {:<24} {:.4}\n",
                rank + 1,
                category.label,
                category.score
            ));
        }
        out
    }
}

/// Summary of a model artifact
#[derive(Debug, Clone, Serialize)]
pub struct ModelReport {
    pub name: String,
    pub path: String,
    pub inputs: Vec<TensorDecl>,
    pub outputs: Vec<TensorDecl>,
    pub graph: Vec<GraphOp>,
}

impl ModelReport {
    pub fn from_model(model: &ModelHandle) -> Self {
        Self {
            name: model.name().to_string(),
            path: model.path().display().to_string(),
            inputs: model.inputs().to_vec(),
            outputs: model.outputs().to_vec(),
            graph: model.graph().to_vec(),
        }
    }

    pub fn to_text(&self) -> String {
        let mut out = format!("Model: {}\nPath:  {}\n", self.name, self.path);

        out.push_str("Inputs:\n");
        for decl in &self.inputs {
            write_decl(&mut out, decl);
        }
        out.push_str("Outputs:\n");
        for decl in &self.outputs {
            write_decl(&mut out, decl);
        }

        out.push_str(&format!("Graph ({} ops):\n", self.graph.len()));
        for (i, op) in self.graph.iter().enumerate() {
            out.push_str(&format!("  {:>3}: {:?}\n", i, op));
        }
        out
    }
}

fn write_decl(out: &mut String, decl: &TensorDecl) {
    out.push_str(&format!("  {:<16} {}", decl.name, decl.spec()));
    if let Some(q) = decl.quantization {
        out.push_str(&format!(" (scale {}, zero point {})", q.scale, q.zero_point));
    }
    out.push('\n');
}
