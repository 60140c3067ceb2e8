use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::{LogitsProcessor, Sampling};
use tagline::config::SamplingConfig;
use tokenizers::Tokenizer;

use crate::error::VlmError;

/// The decoder side of an image-conditioned language model.
pub trait ImageConditionedDecoder {
    /// Encode the image and the prompt tokens, returning the logits of the last position.
    fn setup(&mut self, pixel_values: &Tensor, input_ids: &Tensor) -> candle_core::Result<Tensor>;

    /// Feed new tokens, returning the logits of the last position.
    fn forward(&mut self, input_ids: &Tensor) -> candle_core::Result<Tensor>;

    fn clear_kv_cache(&mut self);
}

/// Build the logits processor for a sampling configuration.
///
/// A non-positive temperature means greedy decoding.
pub fn logits_processor(config: &SamplingConfig) -> LogitsProcessor {
    let sampling = if config.temperature <= 0.0 {
        Sampling::ArgMax
    } else if config.top_k == 0 {
        Sampling::TopP {
            p: config.top_p,
            temperature: config.temperature,
        }
    } else {
        Sampling::TopKThenTopP {
            k: config.top_k,
            p: config.top_p,
            temperature: config.temperature,
        }
    };
    LogitsProcessor::from_sampling(config.seed, sampling)
}

/// Autoregressive text generation conditioned on one image.
pub struct TextGeneration<M> {
    model: M,
    tokenizer: Tokenizer,
    device: Device,
    eos_token: u32,
}

impl<M: ImageConditionedDecoder> TextGeneration<M> {
    pub fn new(
        model: M,
        tokenizer: Tokenizer,
        device: Device,
        eos_token: &str,
    ) -> Result<Self, VlmError> {
        let eos_token = tokenizer
            .token_to_id(eos_token)
            .ok_or_else(|| VlmError::TokenNotFound(eos_token.to_string()))?;
        Ok(Self {
            model,
            tokenizer,
            device,
            eos_token,
        })
    }

    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn clear_kv_cache(&mut self) {
        self.model.clear_kv_cache();
    }

    /// Generate up to `sample_len` tokens and return only the newly generated text.
    pub fn run(
        &mut self,
        image: &Tensor,
        prompt: &str,
        sample_len: usize,
        sampling: &SamplingConfig,
    ) -> Result<String, VlmError> {
        self.model.clear_kv_cache();
        let mut logits_processor = logits_processor(sampling);

        let mut tokens = self.tokenizer.encode(prompt, true)?.get_ids().to_vec();
        let prompt_len = tokens.len();

        let start_gen = std::time::Instant::now();
        for index in 0..sample_len {
            let context_size = if index > 0 { 1 } else { tokens.len() };
            let start_pos = tokens.len().saturating_sub(context_size);
            let ctxt = &tokens[start_pos..];
            let input = Tensor::new(ctxt, &self.device)?.unsqueeze(0)?;
            let logits = if index > 0 {
                self.model.forward(&input)?
            } else {
                self.model.setup(image, &input)?
            };
            let logits = logits.squeeze(0)?.squeeze(0)?.to_dtype(DType::F32)?;
            let logits = if sampling.repeat_penalty == 1. {
                logits
            } else {
                let start_at = tokens.len().saturating_sub(sampling.repeat_last_n);
                candle_transformers::utils::apply_repeat_penalty(
                    &logits,
                    sampling.repeat_penalty,
                    &tokens[start_at..],
                )?
            };

            let next_token = logits_processor.sample(&logits)?;
            if next_token == self.eos_token {
                break;
            }
            tokens.push(next_token);
        }

        let generated = &tokens[prompt_len..];
        let dt = start_gen.elapsed();
        log::debug!(
            "{} tokens generated ({:.2} token/s)",
            generated.len(),
            generated.len() as f64 / dt.as_secs_f64().max(f64::EPSILON),
        );

        let response = self.tokenizer.decode(generated, true)?;
        self.model.clear_kv_cache();
        Ok(response)
    }
}
