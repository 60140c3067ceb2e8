mod verify;

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use image::RgbImage;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{ModelConfig, SamplingConfig};
use crate::error::{GenerationError, ModelError};
use crate::prompt::Message;

pub use verify::{verify_model_dir, ModelDirectory};

/// Where the model runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// accelerator if one is available, CPU otherwise
    Gpu,
    Cpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Quantization {
    None,
    #[serde(rename = "4bit")]
    FourBit,
}

/// Device placement and precision requested for a model load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadOptions {
    pub device: DeviceKind,
    pub quantization: Quantization,
}

impl LoadOptions {
    pub fn new(use_quantized: bool, use_cpu: bool) -> Self {
        Self {
            device: if use_cpu {
                DeviceKind::Cpu
            } else {
                DeviceKind::Gpu
            },
            quantization: if use_quantized {
                Quantization::FourBit
            } else {
                Quantization::None
            },
        }
    }
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self::new(false, false)
    }
}

impl fmt::Display for LoadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let device = match self.device {
            DeviceKind::Gpu => "gpu",
            DeviceKind::Cpu => "cpu",
        };
        let quantization = match self.quantization {
            Quantization::None => "full precision",
            Quantization::FourBit => "4-bit",
        };
        write!(f, "device={device}, {quantization}")
    }
}

/// What to do when a model is resident and a batch asks for other load options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadPolicy {
    /// keep the resident model and log a warning
    #[default]
    Reuse,
    /// drop the resident model and load it again with the new options
    Reload,
    /// fail the batch with [`ModelError::OptionsMismatch`]
    Reject,
}

impl FromStr for ReloadPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reuse" => Ok(Self::Reuse),
            "reload" => Ok(Self::Reload),
            "reject" => Ok(Self::Reject),
            other => Err(format!(
                "unknown reload policy '{other}', expected reuse, reload or reject"
            )),
        }
    }
}

/// Everything the model needs to caption one image.
pub struct GenerationRequest<'a> {
    pub image: &'a RgbImage,
    pub prompt: &'a [Message],
    pub sampling: &'a SamplingConfig,
    pub max_new_tokens: usize,
}

/// A loaded vision-language model together with its preprocessor.
///
/// Implementations are not reentrant: the batch loop is the only caller.
pub trait VisionLanguageModel {
    /// Produce the raw (not yet normalized) answer for one image.
    fn generate(&mut self, request: &GenerationRequest<'_>) -> Result<String, GenerationError>;

    /// Drop per-request state and hand cached accelerator memory back.
    fn release_cache(&mut self) {}

    /// Short human-readable description, e.g. the architecture and device.
    fn describe(&self) -> String;
}

pub type DynModel = dyn VisionLanguageModel + Send;

/// Output of a [`ModelLoader`].
pub struct LoadedModel {
    pub model: Box<DynModel>,
    /// the options actually in effect, which differ from the requested ones when
    /// quantization was not available
    pub effective: LoadOptions,
}

/// Builds a model from a verified directory.
pub trait ModelLoader {
    fn load(
        &self,
        directory: &ModelDirectory,
        options: &LoadOptions,
    ) -> Result<LoadedModel, ModelError>;
}

struct Resident {
    model: Box<DynModel>,
    requested: LoadOptions,
    effective: LoadOptions,
    directory: ModelDirectory,
}

/// Snapshot of the handle state for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub loaded: bool,
    pub model_dir: std::path::PathBuf,
    pub requested: Option<LoadOptions>,
    pub effective: Option<LoadOptions>,
    pub description: Option<String>,
    pub weight_bytes: Option<u64>,
    pub load_count: usize,
}

/// Lazily loaded model shared by every batch of the process.
///
/// The application builds exactly one handle and threads it through; the model is
/// loaded on the first [`ModelHandle::ensure_loaded`] call and reused afterwards.
pub struct ModelHandle<L: ModelLoader> {
    loader: L,
    config: ModelConfig,
    resident: Option<Resident>,
    load_count: usize,
}

impl<L: ModelLoader> ModelHandle<L> {
    pub fn new(loader: L, config: ModelConfig) -> Self {
        Self {
            loader,
            config,
            resident: None,
            load_count: 0,
        }
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.resident.is_some()
    }

    /// Number of successful loads since the handle was created.
    #[inline]
    pub fn load_count(&self) -> usize {
        self.load_count
    }

    #[inline]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Return the resident model, loading it first if needed.
    ///
    /// # Arguments
    ///
    /// * `options` - The requested device placement and precision.
    ///
    /// # Returns
    ///
    /// The loaded model. When a model is already resident with other options the
    /// configured [`ReloadPolicy`] decides between reuse, reload and rejection.
    pub fn ensure_loaded(&mut self, options: LoadOptions) -> Result<&mut DynModel, ModelError> {
        let loaded = self.resident.as_ref().map(|r| r.requested);

        if let Some(loaded) = loaded {
            if loaded == options {
                debug!("Model already resident ({loaded}), skipping load");
            } else {
                match self.config.reload_policy {
                    ReloadPolicy::Reuse => {
                        warn!("Model resident with {loaded}, ignoring requested {options}");
                    }
                    ReloadPolicy::Reject => {
                        return Err(ModelError::OptionsMismatch {
                            loaded,
                            requested: options,
                        });
                    }
                    ReloadPolicy::Reload => {
                        info!("Reloading model: {loaded} -> {options}");
                        self.unload();
                    }
                }
            }
        }

        if self.resident.is_none() {
            let resident = self.load(options)?;
            self.resident = Some(resident);
        }

        match self.resident.as_mut() {
            Some(resident) => Ok(resident.model.as_mut()),
            None => Err(ModelError::Load("model is not resident after load".to_string())),
        }
    }

    fn load(&mut self, options: LoadOptions) -> Result<Resident, ModelError> {
        info!(
            "Loading model from {} ({options})",
            self.config.dir.display()
        );

        let directory = verify_model_dir(&self.config)?;
        info!(
            "Model directory verified: {} weight files, {:.1} GB",
            directory.weight_files.len(),
            directory.total_weight_bytes as f64 / 1e9
        );

        let start = Instant::now();
        let LoadedModel {
            mut model,
            effective,
        } = self.loader.load(&directory, &options)?;

        if effective != options {
            warn!("Requested {options}, running with {effective}");
        }

        model.release_cache();
        self.load_count += 1;

        info!(
            "Model loaded in {:.1}s: {}",
            start.elapsed().as_secs_f64(),
            model.describe()
        );

        Ok(Resident {
            model,
            requested: options,
            effective,
            directory,
        })
    }

    /// Drop the resident model, if any.
    pub fn unload(&mut self) {
        if self.resident.take().is_some() {
            info!("Model unloaded");
        }
    }

    /// Release cached accelerator memory of the resident model.
    pub fn release_cache(&mut self) {
        if let Some(resident) = self.resident.as_mut() {
            resident.model.release_cache();
        }
    }

    pub fn status(&self) -> ModelStatus {
        ModelStatus {
            loaded: self.resident.is_some(),
            model_dir: self.config.dir.clone(),
            requested: self.resident.as_ref().map(|r| r.requested),
            effective: self.resident.as_ref().map(|r| r.effective),
            description: self.resident.as_ref().map(|r| r.model.describe()),
            weight_bytes: self
                .resident
                .as_ref()
                .map(|r| r.directory.total_weight_bytes),
            load_count: self.load_count,
        }
    }
}
