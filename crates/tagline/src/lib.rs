#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! The pipeline is backend agnostic: a [`model::ModelLoader`] builds a
//! [`model::VisionLanguageModel`] from a verified checkpoint directory, the
//! [`model::ModelHandle`] keeps it resident across batches and the
//! [`batch::BatchProcessor`] walks a folder writing one caption file per image.

/// Folder walking, skip/persist policy and the batch loop.
pub mod batch;

/// Serde-backed configuration with defaults for every field.
pub mod config;

/// Error types of the pipeline.
pub mod error;

/// Single-image captioning with failure isolation.
pub mod generator;

/// Model lifecycle: checkpoint verification, loading and reuse.
pub mod model;

/// Caption normalization.
pub mod postprocess;

/// Chat messages sent to the model.
pub mod prompt;

/// Batch counters and per-file details.
pub mod report;

/// Host resource probe.
pub mod system;

pub use batch::{BatchObserver, BatchProcessor};
pub use config::CaptionConfig;
pub use error::{CaptionError, GenerationError, ModelError};
pub use generator::{CaptionGenerator, CaptionRequest, CaptionResult};
pub use model::{LoadOptions, ModelHandle};
pub use postprocess::CaptionPostprocessor;
pub use report::{BatchReport, BatchStatus};
