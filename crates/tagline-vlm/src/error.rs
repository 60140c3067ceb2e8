use tagline::error::{GenerationError, ModelError};

#[derive(thiserror::Error, Debug)]
pub enum VlmError {
    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Tokenizer(#[from] tokenizers::Error),

    #[error(transparent)]
    Template(#[from] minijinja::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Cannot find the {0} token")]
    TokenNotFound(String),

    #[error("Unsupported model configuration: {0}")]
    Unsupported(String),
}

impl From<VlmError> for ModelError {
    fn from(e: VlmError) -> Self {
        ModelError::Load(e.to_string())
    }
}

impl From<VlmError> for GenerationError {
    fn from(e: VlmError) -> Self {
        GenerationError::Inference(e.to_string())
    }
}
