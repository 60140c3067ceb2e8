use candle_core::{DType, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::paligemma::{Config, Model};
use tagline::error::{GenerationError, ModelError};
use tagline::model::{
    GenerationRequest, LoadOptions, LoadedModel, ModelDirectory, ModelLoader, Quantization,
    VisionLanguageModel,
};
use tokenizers::Tokenizer;

use crate::device::{device_kind, select_device};
use crate::error::VlmError;
use crate::generation::{ImageConditionedDecoder, TextGeneration};
use crate::preprocessor::{ImagePreprocessor, PreprocessorConfig};
use crate::template::PromptTemplate;

const EOS_TOKEN: &str = "<eos>";

impl ImageConditionedDecoder for Model {
    fn setup(&mut self, pixel_values: &Tensor, input_ids: &Tensor) -> candle_core::Result<Tensor> {
        Model::setup(self, pixel_values, input_ids)
    }

    fn forward(&mut self, input_ids: &Tensor) -> candle_core::Result<Tensor> {
        Model::forward(self, input_ids)
    }

    fn clear_kv_cache(&mut self) {
        Model::clear_kv_cache(self)
    }
}

/// Loads Google PaliGemma checkpoints from a local directory.
///
/// NOTE: to run the model on a GPU, build with the `cuda` or `metal` feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct PaligemmaLoader;

impl ModelLoader for PaligemmaLoader {
    fn load(
        &self,
        directory: &ModelDirectory,
        options: &LoadOptions,
    ) -> Result<LoadedModel, ModelError> {
        let mut effective = *options;
        if options.quantization == Quantization::FourBit {
            log::warn!(
                "4-bit quantization is not available for PaliGemma, loading full precision weights"
            );
            effective.quantization = Quantization::None;
        }

        let captioner = PaligemmaCaptioner::load(directory, options)?;
        effective.device = device_kind(captioner.pipeline.device());

        Ok(LoadedModel {
            model: Box::new(captioner),
            effective,
        })
    }
}

/// A resident PaliGemma model answering captioning requests.
pub struct PaligemmaCaptioner {
    pipeline: TextGeneration<Model>,
    preprocessor: ImagePreprocessor,
    template: PromptTemplate,
    dtype: DType,
    description: String,
}

impl PaligemmaCaptioner {
    pub fn load(directory: &ModelDirectory, options: &LoadOptions) -> Result<Self, VlmError> {
        let (device, dtype) = select_device(options.device);

        let preprocessor =
            PreprocessorConfig::from_file(directory.file("preprocessor_config.json"))?;
        let config = model_config(&preprocessor)?;
        let template = PromptTemplate::from_tokenizer_config(directory.file("tokenizer_config.json"))?;
        let tokenizer = Tokenizer::from_file(directory.file("tokenizer.json"))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&directory.weight_files, dtype, &device)?
        };
        let model = Model::new(&config, vb)?;

        let description = format!(
            "PaliGemma {}px on {:?} ({:?})",
            preprocessor.size.height, device, dtype
        );
        let pipeline = TextGeneration::new(model, tokenizer, device, EOS_TOKEN)?;

        Ok(Self {
            pipeline,
            preprocessor: ImagePreprocessor::new(preprocessor),
            template,
            dtype,
            description,
        })
    }

    fn caption(&mut self, request: &GenerationRequest<'_>) -> Result<String, VlmError> {
        let pixels = self
            .preprocessor
            .preprocess(request.image, self.dtype, self.pipeline.device())?;
        // the image reaches the model through the vision tower, not the prompt
        let prompt = self.template.render(request.prompt, false)?;
        self.pipeline
            .run(&pixels, &prompt, request.max_new_tokens, request.sampling)
    }
}

impl VisionLanguageModel for PaligemmaCaptioner {
    fn generate(&mut self, request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
        Ok(self.caption(request)?)
    }

    fn release_cache(&mut self) {
        self.pipeline.clear_kv_cache();
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

fn model_config(preprocessor: &PreprocessorConfig) -> Result<Config, VlmError> {
    let size = preprocessor.size;
    if size.height != size.width {
        return Err(VlmError::Unsupported(format!(
            "non-square input {}x{}",
            size.width, size.height
        )));
    }
    match size.height {
        224 => Ok(Config::paligemma_3b_224()),
        448 => Ok(Config::paligemma_3b_448()),
        other => Err(VlmError::Unsupported(format!(
            "PaliGemma input resolution {other}px"
        ))),
    }
}
