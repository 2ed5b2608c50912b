//! Sightline Core
//!
//! Core types and utilities shared across Sightline components.
//!
//! This crate provides:
//! - The error taxonomy (load-time failures, shape mismatches, engine failures)
//! - Value types exchanged between pipeline stages (categories, tensor contracts)

pub mod error;
pub mod types;

pub use error::{Error, LoadError, Result};
pub use types::{Category, ElementType, QuantizationParams, TensorSpec};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, LoadError, Result};
    pub use crate::types::{Category, ElementType, QuantizationParams, TensorSpec};
}
