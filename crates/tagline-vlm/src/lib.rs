//! # tagline vision-language backends
//!
//! [`candle`](https://github.com/huggingface/candle) implementations of the
//! [`tagline::model::ModelLoader`] and [`tagline::model::VisionLanguageModel`] seams.
//!
//! - **PaliGemma**: Google's vision-language model, loaded from a local checkpoint
//!
//! # Features
//!
//! - `cuda` / `metal`: run on an accelerator, falling back to the CPU when none is found
//! - `mkl`: Intel MKL for CPU inference

/// Device and dtype selection.
pub mod device;

/// Backend error type.
pub mod error;

/// Token sampling loop shared by image-conditioned decoders.
pub mod generation;

/// PaliGemma checkpoint loader and captioner.
pub mod paligemma;

/// Image to pixel tensor conversion.
pub mod preprocessor;

/// Chat template rendering.
pub mod template;

pub use paligemma::{PaligemmaCaptioner, PaligemmaLoader};
