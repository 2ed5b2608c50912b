//! Label file loading
//!
//! A labels file holds one class name per line, in model output order.
//! Lines may carry a leading index token (`"0 cat"`), which is stripped
//! according to the selected [`LabelFormat`].

use serde::{Deserialize, Serialize};
use sightline_core::{LoadError, Result};
use std::path::Path;

/// How each raw line of a labels file maps to a label
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelFormat {
    /// Drop everything up to and including the first space, then trim.
    /// Lines without a space are taken whole.
    #[default]
    IndexPrefixed,

    /// Take the whole trimmed line
    Plain,

    /// Strip the leading token only when it parses as an integer index
    Auto,
}

impl LabelFormat {
    /// Extract the label from one raw line
    pub fn parse_line<'a>(&self, line: &'a str) -> &'a str {
        match self {
            Self::IndexPrefixed => match line.split_once(' ') {
                Some((_, rest)) => rest.trim(),
                None => line.trim(),
            },
            Self::Plain => line.trim(),
            Self::Auto => {
                let trimmed = line.trim();
                match trimmed.split_once(char::is_whitespace) {
                    Some((index, rest)) if index.parse::<u64>().is_ok() => rest.trim(),
                    _ => trimmed,
                }
            }
        }
    }
}

/// Ordered class names, index-aligned with the model's output vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    /// Load labels from a file.
    ///
    /// Trailing blank lines are ignored. Blank lines in the middle of the file
    /// are kept as empty labels so that every later label stays aligned with
    /// its output position.
    pub fn load(path: impl AsRef<Path>, format: LabelFormat) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LoadError::LabelsMissing {
                path: path.to_path_buf(),
            },
            _ => LoadError::LabelsUnreadable {
                path: path.to_path_buf(),
                source: e,
            },
        })?;

        let labels = Self::parse(&content, format);
        if labels.is_empty() {
            return Err(LoadError::LabelsEmpty {
                path: path.to_path_buf(),
            }
            .into());
        }

        tracing::debug!("Loaded {} labels from {}", labels.len(), path.display());

        Ok(labels)
    }

    /// Parse labels from in-memory file content
    pub fn parse(content: &str, format: LabelFormat) -> Self {
        let mut lines: Vec<&str> = content.lines().collect();
        while lines.last().is_some_and(|line| line.trim().is_empty()) {
            lines.pop();
        }

        Self {
            labels: lines
                .into_iter()
                .map(|line| format.parse_line(line).to_string())
                .collect(),
        }
    }

    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Label at output position `index`
    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.labels
    }
}
