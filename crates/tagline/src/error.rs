use std::path::PathBuf;

use crate::model::LoadOptions;

/// Errors that abort a whole batch before or while the model is being loaded.
#[derive(thiserror::Error, Debug)]
pub enum CaptionError {
    /// The folder path is empty or does not point to a directory.
    #[error("Invalid folder path: {0}")]
    InvalidFolder(String),

    /// The folder could not be listed.
    #[error("Failed to read the folder {path}. {source}")]
    ReadFolder {
        /// the folder being listed
        path: PathBuf,
        /// the underlying io error
        source: std::io::Error,
    },

    /// The model could not be made available.
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Errors raised while verifying or loading the model checkpoint.
///
/// All of them are terminal for the run: without a model there is nothing to
/// fall back to, so they are never retried.
#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    /// The model directory does not exist.
    #[error("Model directory does not exist: {0}. Download the checkpoint first.")]
    NotFound(PathBuf),

    /// The model directory exists but does not look like a complete checkpoint.
    #[error("Model directory {path} is incomplete or corrupt: {reason}. Download the checkpoint again.")]
    Corrupt {
        /// the model directory
        path: PathBuf,
        /// what the structural check found
        reason: String,
    },

    /// A model is loaded with other options and the reload policy rejects the switch.
    #[error("Model already loaded with {loaded}, requested {requested}")]
    OptionsMismatch {
        /// options of the resident model
        loaded: LoadOptions,
        /// options of the new request
        requested: LoadOptions,
    },

    /// The backend failed to build the model.
    #[error("Failed to load the model: {0}")]
    Load(String),
}

impl ModelError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while captioning a single image. Never escape a batch.
#[derive(thiserror::Error, Debug)]
pub enum GenerationError {
    /// The file is missing or cannot be decoded as an image.
    #[error("invalid image {path}: {reason}")]
    InvalidImage {
        /// the image path
        path: PathBuf,
        /// decoder or io message
        reason: String,
    },

    /// The model failed while producing tokens.
    #[error("generation failed: {0}")]
    Inference(String),
}

/// Errors raised when reading a configuration file.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Error to read the file.
    #[error("Failed to read the config file. {0}")]
    Io(#[from] std::io::Error),

    /// Error to parse the file.
    #[error("Failed to parse the config file. {0}")]
    Parse(#[from] serde_json::Error),
}
