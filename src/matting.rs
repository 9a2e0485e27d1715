use crate::error::BgError;
use image::{imageops::FilterType, DynamicImage, GrayImage, ImageFormat, RgbaImage};
use imageproc::filter::gaussian_blur_f32;
use std::io::Cursor;

/// Sigma of the blur that softens mask edges
const EDGE_SIGMA: f32 = 1.0;

/// Use a segmentation mask as the alpha channel of `image`
///
/// The mask is resized to the image if needed and blurred slightly so the
/// cut-out edge is not jagged.
pub fn apply_mask(image: &DynamicImage, mask: &GrayImage) -> RgbaImage {
    let mut rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();

    let fitted;
    let mask = if mask.dimensions() == (width, height) {
        mask
    } else {
        tracing::debug!(
            "Resizing mask from {:?} to {}x{}",
            mask.dimensions(),
            width,
            height
        );
        fitted = image::imageops::resize(mask, width, height, FilterType::Nearest);
        &fitted
    };

    let alpha = gaussian_blur_f32(mask, EDGE_SIGMA);

    for (pixel, a) in rgba.pixels_mut().zip(alpha.pixels()) {
        pixel.0[3] = a.0[0];
    }

    rgba
}

/// Encode an RGBA image as PNG bytes
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, BgError> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| BgError::Internal(format!("Failed to encode PNG: {}", e)))?;
    Ok(buf.into_inner())
}
