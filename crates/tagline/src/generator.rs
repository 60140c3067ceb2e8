use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;

use image::{ImageReader, RgbImage};
use log::{debug, error, info};

use crate::config::{CaptionConfig, PromptConfig, SamplingConfig};
use crate::error::GenerationError;
use crate::model::{GenerationRequest, VisionLanguageModel};
use crate::postprocess::CaptionPostprocessor;
use crate::prompt::{caption_prompt, Message};

/// One image to caption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionRequest {
    pub image_path: PathBuf,
    pub max_new_tokens: usize,
}

/// Outcome of captioning one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptionResult {
    Success(String),
    Failure(String),
}

/// Turns an image path into a normalized caption using a loaded model.
pub struct CaptionGenerator {
    prompt: Vec<Message>,
    sampling: SamplingConfig,
    postprocessor: CaptionPostprocessor,
}

impl CaptionGenerator {
    pub fn new(
        prompt: &PromptConfig,
        sampling: SamplingConfig,
        postprocessor: CaptionPostprocessor,
    ) -> Self {
        Self {
            prompt: caption_prompt(prompt),
            sampling,
            postprocessor,
        }
    }

    pub fn from_config(config: &CaptionConfig) -> Self {
        Self::new(
            &config.prompt,
            config.sampling.clone(),
            CaptionPostprocessor::new(config.postprocess.clone()),
        )
    }

    /// A request for `image_path` with the configured token budget.
    pub fn request(&self, image_path: impl Into<PathBuf>) -> CaptionRequest {
        CaptionRequest {
            image_path: image_path.into(),
            max_new_tokens: self.sampling.max_new_tokens,
        }
    }

    /// Caption one image.
    ///
    /// Never fails: invalid images, inference errors and backend panics all come back as
    /// [`CaptionResult::Failure`], after the model cache has been released, so a single
    /// bad file cannot abort a batch.
    ///
    /// This is the convenience form for single images. The batch loop calls
    /// [`CaptionGenerator::caption`] to tell undecodable files from model failures.
    pub fn generate(
        &self,
        model: &mut dyn VisionLanguageModel,
        request: &CaptionRequest,
    ) -> CaptionResult {
        match self.caption(model, request) {
            Ok(caption) => CaptionResult::Success(caption),
            Err(e) => CaptionResult::Failure(e.to_string()),
        }
    }

    /// Same as [`CaptionGenerator::generate`], keeping the kind of failure.
    pub fn caption(
        &self,
        model: &mut dyn VisionLanguageModel,
        request: &CaptionRequest,
    ) -> Result<String, GenerationError> {
        let start = Instant::now();

        match self.try_generate(model, request) {
            Ok(caption) => {
                info!(
                    "Captioned {} in {:.1}s ({} chars)",
                    request.image_path.display(),
                    start.elapsed().as_secs_f64(),
                    caption.chars().count()
                );
                debug!("Caption: {caption}");
                Ok(caption)
            }
            Err(e) => {
                error!("Failed to caption {}: {e}", request.image_path.display());
                model.release_cache();
                Err(e)
            }
        }
    }

    fn try_generate(
        &self,
        model: &mut dyn VisionLanguageModel,
        request: &CaptionRequest,
    ) -> Result<String, GenerationError> {
        let image = load_image(&request.image_path)?;

        let generation = GenerationRequest {
            image: &image,
            prompt: &self.prompt,
            sampling: &self.sampling,
            max_new_tokens: request.max_new_tokens,
        };

        let raw = match panic::catch_unwind(AssertUnwindSafe(|| model.generate(&generation))) {
            Ok(result) => result?,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                return Err(GenerationError::Inference(format!(
                    "model panicked: {message}"
                )));
            }
        };

        Ok(self.postprocessor.normalize(&raw))
    }
}

/// Open and fully decode an image, sniffing the format from its content.
pub fn load_image(path: &Path) -> Result<RgbImage, GenerationError> {
    let invalid = |reason: String| GenerationError::InvalidImage {
        path: path.to_path_buf(),
        reason,
    };

    if !path.is_file() {
        return Err(invalid("file does not exist".to_string()));
    }

    let image = ImageReader::open(path)
        .map_err(|e| invalid(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| invalid(e.to_string()))?
        .decode()
        .map_err(|e| invalid(e.to_string()))?;

    Ok(image.to_rgb8())
}
