use anyhow::{Context, Result};
use clap::Parser;
use sightline_classifier::{load_config, ClassifierConfig, DeviceType, ImageClassifier, ModelHandle};
use sightline_cli::cli::{Cli, Commands, OutputFormat};
use sightline_cli::report::{ImageReport, ModelReport};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Classify {
            labels,
            model,
            config,
            images,
            top_k,
            format,
            verbose,
        } => {
            init_tracing(verbose);

            let config = match config {
                Some(path) => load_config(&path)?,
                None => ClassifierConfig::new(
                    labels.context("--labels is required without --config")?,
                    model.context("--model is required without --config")?,
                ),
            };

            let classifier = tokio::task::spawn_blocking(move || ImageClassifier::from_config(&config))
                .await?
                .context("Failed to load classifier")?;
            let classifier = Arc::new(classifier);

            let mut reports = Vec::with_capacity(images.len());
            for path in images {
                reports.push(classify_file(Arc::clone(&classifier), path, top_k).await?);
            }

            match format {
                OutputFormat::Text => {
                    for report in &reports {
                        print!("{}", report.to_text());
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
            }
        }

        Commands::Inspect { model, verbose } => {
            init_tracing(verbose);

            let device = DeviceType::Cpu.create_device()?;
            let handle = ModelHandle::load(&model, &device)
                .with_context(|| format!("Failed to load model {}", model.display()))?;

            print!("{}", ModelReport::from_model(&handle).to_text());
        }
    }

    Ok(())
}

async fn classify_file(
    classifier: Arc<ImageClassifier>,
    path: PathBuf,
    top_k: usize,
) -> Result<ImageReport> {
    tokio::task::spawn_blocking(move || {
        let image = image::open(&path)
            .with_context(|| format!("Failed to read image {}", path.display()))?;
        let mut result = classifier
            .classify(&image)
            .with_context(|| format!("Failed to classify {}", path.display()))?;
        result.categories.truncate(top_k);

        Ok::<_, anyhow::Error>(ImageReport::new(&path, result.categories, result.latency_us))
    })
    .await?
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("sightline=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sightline=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
