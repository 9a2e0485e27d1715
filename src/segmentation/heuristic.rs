use super::Segmenter;
use crate::error::BgError;
use image::{GrayImage, Luma, RgbImage};

/// Colour distance above which a pixel counts as subject
const DEFAULT_THRESHOLD: f32 = 30.0;
/// Smallest corner sample edge, in pixels
const MIN_MARGIN: u32 = 5;

pub(crate) fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

/// Background estimate from the image corners
///
/// Averages the colour of four square corner patches and marks every pixel
/// far enough from that colour as foreground. Works for product shots on a
/// plain backdrop and needs no model file.
#[derive(Debug, Clone)]
pub struct CornerHeuristic {
    threshold: f32,
}

impl Default for CornerHeuristic {
    fn default() -> Self {
        Self::with_threshold(DEFAULT_THRESHOLD)
    }
}

impl CornerHeuristic {
    pub fn with_threshold(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Mean RGB of the corner patches
    fn background_color(image: &RgbImage) -> [f32; 3] {
        let (width, height) = image.dimensions();
        let margin = MIN_MARGIN.max(width.min(height) / 20);
        let mx = margin.min(width);
        let my = margin.min(height);

        let xs = [(0, mx), (width - mx, width)];
        let ys = [(0, my), (height - my, height)];

        let mut sum = [0f64; 3];
        let mut count = 0u64;
        for &(y0, y1) in &ys {
            for &(x0, x1) in &xs {
                for y in y0..y1 {
                    for x in x0..x1 {
                        let p = image.get_pixel(x, y).0;
                        for c in 0..3 {
                            sum[c] += p[c] as f64;
                        }
                        count += 1;
                    }
                }
            }
        }

        if count == 0 {
            return [0.0; 3];
        }
        [
            (sum[0] / count as f64) as f32,
            (sum[1] / count as f64) as f32,
            (sum[2] / count as f64) as f32,
        ]
    }
}

impl Segmenter for CornerHeuristic {
    fn name(&self) -> &'static str {
        "corner"
    }

    fn description(&self) -> &'static str {
        "Corner colour sampling - thresholds distance from the estimated backdrop"
    }

    fn predict(&self, image: &RgbImage) -> Result<GrayImage, BgError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(BgError::Decode("image has no pixels".to_string()));
        }

        let bg = Self::background_color(image);
        let threshold = self.threshold;

        Ok(GrayImage::from_fn(width, height, |x, y| {
            let p = image.get_pixel(x, y).0;
            let dist = (0..3)
                .map(|c| {
                    let d = p[c] as f32 - bg[c];
                    d * d
                })
                .sum::<f32>()
                .sqrt();

            if dist > threshold {
                Luma([255u8])
            } else {
                Luma([0u8])
            }
        }))
    }
}
