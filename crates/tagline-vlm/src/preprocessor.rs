use std::path::Path;

use candle_core::{DType, Device, Tensor};
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Deserialize;

use crate::error::VlmError;

pub const SIGLIP_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
pub const SIGLIP_STD: [f32; 3] = [0.5, 0.5, 0.5];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ImageSize {
    pub height: u32,
    pub width: u32,
}

/// The subset of `preprocessor_config.json` the image pipeline needs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PreprocessorConfig {
    pub size: ImageSize,
    pub image_mean: [f32; 3],
    pub image_std: [f32; 3],
    pub rescale_factor: f32,
    pub do_normalize: bool,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            size: ImageSize {
                height: 224,
                width: 224,
            },
            image_mean: SIGLIP_MEAN,
            image_std: SIGLIP_STD,
            rescale_factor: 1.0 / 255.0,
            do_normalize: true,
        }
    }
}

impl PreprocessorConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, VlmError> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

/// Resizes and normalizes images into the pixel tensor the vision tower expects.
pub struct ImagePreprocessor {
    config: PreprocessorConfig,
}

impl ImagePreprocessor {
    pub fn new(config: PreprocessorConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &PreprocessorConfig {
        &self.config
    }

    /// Convert an rgb8 image into a `[1, 3, H, W]` tensor.
    ///
    /// # Arguments
    ///
    /// * `image` - The input image, any size.
    /// * `dtype` - The dtype of the returned tensor.
    /// * `device` - The device to place the tensor on.
    pub fn preprocess(
        &self,
        image: &RgbImage,
        dtype: DType,
        device: &Device,
    ) -> Result<Tensor, VlmError> {
        let ImageSize { height, width } = self.config.size;
        let resized = if image.dimensions() == (width, height) {
            image.clone()
        } else {
            imageops::resize(image, width, height, FilterType::CatmullRom)
        };

        let pixels = Tensor::from_vec(
            resized.into_raw(),
            (height as usize, width as usize, 3),
            &Device::Cpu,
        )?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(self.config.rescale_factor as f64, 0.)?;

        let pixels = if self.config.do_normalize {
            let mean = Tensor::new(&self.config.image_mean, &Device::Cpu)?.reshape((3, 1, 1))?;
            let std = Tensor::new(&self.config.image_std, &Device::Cpu)?.reshape((3, 1, 1))?;
            pixels.broadcast_sub(&mean)?.broadcast_div(&std)?
        } else {
            pixels
        };

        Ok(pixels.to_dtype(dtype)?.to_device(device)?.unsqueeze(0)?)
    }
}
