//! ONNX segmentation models
//!
//! Pure Rust inference through tract. Works with single-output salient
//! object models (U2-Net, ISNet and friends) that take an NCHW RGB tensor
//! and return a one-channel saliency map.

use super::Segmenter;
use crate::error::BgError;
use image::{imageops::FilterType, GrayImage, RgbImage};
use std::path::Path;
use tract_onnx::prelude::*;

type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Segmentation model loaded from an `.onnx` file
pub struct OnnxSegmenter {
    model: TractModel,
    input_size: u32,
}

impl OnnxSegmenter {
    /// Load and optimize a model, fixing its input to `1x3xSxS`
    pub fn load(path: &Path, input_size: u32) -> Result<Self, BgError> {
        tracing::info!("Loading ONNX model {:?} ({}px input)...", path, input_size);
        let size = input_size as usize;

        let model = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(|e| BgError::ModelLoad(format!("Failed to load ONNX model: {}", e)))?
            .with_input_fact(0, f32::fact([1, 3, size, size]).into())
            .map_err(|e| BgError::ModelLoad(format!("Failed to set input shape: {}", e)))?
            .into_optimized()
            .map_err(|e| BgError::ModelLoad(format!("Failed to optimize model: {}", e)))?
            .into_runnable()
            .map_err(|e| BgError::ModelLoad(format!("Failed to create runnable model: {}", e)))?;

        Ok(Self { model, input_size })
    }

    fn to_tensor(&self, image: &RgbImage) -> Tensor {
        let size = self.input_size;
        let resized = image::imageops::resize(image, size, size, FilterType::Lanczos3);

        tract_ndarray::Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, c, y, x)| {
                let value = resized.get_pixel(x as u32, y as u32).0[c] as f32;
                value / 255.0 - 0.5
            },
        )
        .into()
    }
}

impl Segmenter for OnnxSegmenter {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn description(&self) -> &'static str {
        "ONNX saliency network run with tract - no system dependencies required"
    }

    fn predict(&self, image: &RgbImage) -> Result<GrayImage, BgError> {
        let input = self.to_tensor(image);

        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| BgError::Inference(format!("Tract inference failed: {}", e)))?;

        let output = outputs
            .first()
            .ok_or_else(|| BgError::Inference("No output tensor found".to_string()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| BgError::Inference(format!("Failed to read output tensor: {}", e)))?;

        let shape = view.shape();
        if shape.len() < 2 {
            return Err(BgError::Inference(format!(
                "Expected at least 2D output, got {:?}",
                shape
            )));
        }
        let out_h = shape[shape.len() - 2];
        let out_w = shape[shape.len() - 1];

        // The first out_h * out_w values are channel 0 of batch 0
        let values: Vec<f32> = view.iter().take(out_h * out_w).copied().collect();
        let mask = saliency_to_mask(&values, out_w as u32, out_h as u32)?;

        let (width, height) = image.dimensions();
        Ok(image::imageops::resize(&mask, width, height, FilterType::Triangle))
    }
}

/// Min-max normalize raw saliency values into a 0..=255 mask
fn saliency_to_mask(values: &[f32], width: u32, height: u32) -> Result<GrayImage, BgError> {
    let (min, max) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = if max > min { max - min } else { 1.0 };

    let data = values
        .iter()
        .map(|&v| (((v - min) / range) * 255.0).round().clamp(0.0, 255.0) as u8)
        .collect();

    GrayImage::from_raw(width, height, data)
        .ok_or_else(|| BgError::Inference("Output tensor smaller than its shape".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saliency_is_stretched_to_full_range() {
        let mask = saliency_to_mask(&[-1.0, 0.0, 3.0, -1.0], 2, 2).unwrap();
        assert_eq!(mask.get_pixel(0, 0).0[0], 0);
        assert_eq!(mask.get_pixel(0, 1).0[0], 255);
        assert_eq!(mask.get_pixel(1, 0).0[0], 64);
    }

    #[test]
    fn test_flat_saliency_does_not_divide_by_zero() {
        let mask = saliency_to_mask(&[0.5; 4], 2, 2).unwrap();
        assert!(mask.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn test_short_output_is_an_error() {
        assert!(saliency_to_mask(&[0.1, 0.2], 2, 2).is_err());
    }

    #[test]
    fn test_load_rejects_non_onnx_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.onnx");
        std::fs::write(&path, b"definitely not protobuf").unwrap();

        assert!(matches!(
            OnnxSegmenter::load(&path, 32),
            Err(BgError::ModelLoad(_))
        ));
    }
}
