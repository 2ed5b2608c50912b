use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser, Debug)]
#[command(name = "sightline")]
#[command(author, version, about = "Classify images with an on-device model")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify one or more images
    Classify {
        /// Labels file, one label per line
        #[arg(short, long, env = "SIGHTLINE_LABELS", required_unless_present = "config")]
        labels: Option<PathBuf>,

        /// Model artifact (.safetensors)
        #[arg(short, long, env = "SIGHTLINE_MODEL", required_unless_present = "config")]
        model: Option<PathBuf>,

        /// Classifier config file (YAML); overrides --labels and --model
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Images to classify
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Number of categories to print per image
        #[arg(short = 'k', long, default_value = "1")]
        top_k: usize,

        /// Output format: text or json
        #[arg(short, long, default_value = "text", value_parser = parse_format)]
        format: OutputFormat,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the tensor declarations and graph of a model
    Inspect {
        /// Model artifact (.safetensors)
        #[arg(short, long)]
        model: PathBuf,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format '{}' (expected text or json)", other)),
        }
    }
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    s.parse()
}
