use super::Segmenter;
use crate::error::BgError;
use image::{GrayImage, Luma, RgbImage};

const DEFAULT_RATIO: f32 = 0.9;

pub(crate) fn default_ratio() -> f32 {
    DEFAULT_RATIO
}

/// Keeps pixels brighter than a fraction of the mean brightness
///
/// Brightness is the plain average of the three channels. This is the
/// bootstrap model written by `init-model`, useful for wiring tests and
/// for subjects lit against a dark backdrop.
#[derive(Debug, Clone)]
pub struct LuminanceSegmenter {
    ratio: f32,
}

impl LuminanceSegmenter {
    pub fn new(ratio: f32) -> Self {
        Self { ratio }
    }
}

impl Default for LuminanceSegmenter {
    fn default() -> Self {
        Self::new(DEFAULT_RATIO)
    }
}

impl Segmenter for LuminanceSegmenter {
    fn name(&self) -> &'static str {
        "luminance"
    }

    fn description(&self) -> &'static str {
        "Brightness threshold relative to the image mean"
    }

    fn predict(&self, image: &RgbImage) -> Result<GrayImage, BgError> {
        let (width, height) = image.dimensions();
        let count = width as usize * height as usize;
        if count == 0 {
            return Err(BgError::Inference("image has no pixels".to_string()));
        }

        let gray: Vec<f32> = image
            .pixels()
            .map(|p| (p.0[0] as f32 + p.0[1] as f32 + p.0[2] as f32) / 3.0)
            .collect();
        let mean = gray.iter().map(|&g| g as f64).sum::<f64>() / count as f64;
        let cutoff = mean as f32 * self.ratio;

        let data = gray
            .iter()
            .map(|&g| if g > cutoff { 255u8 } else { 0u8 })
            .collect();

        GrayImage::from_raw(width, height, data)
            .ok_or_else(|| BgError::Inference("mask buffer size mismatch".to_string()))
    }
}
