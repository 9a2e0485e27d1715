//! Text watermark stamped on mocked provider results.

use crate::error::BgError;
use crate::matting::encode_png;
use ab_glyph::{FontRef, PxScale};
use image::{imageops, Rgba, RgbaImage};
use imageproc::drawing::draw_text_mut;

/// Watermark colour, red at alpha 180
const INK: Rgba<u8> = Rgba([255, 0, 0, 180]);
/// Top-left corner of the text
const ORIGIN: (i32, i32) = (10, 10);
/// Text height in pixels
const TEXT_SCALE: f32 = 20.0;

static FONT_DATA: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

/// Decode an image, stamp `text` on it and re-encode as PNG
pub fn watermark_png(data: &[u8], text: &str) -> Result<Vec<u8>, BgError> {
    let img = image::load_from_memory(data)
        .map_err(|e| BgError::Decode(e.to_string()))?
        .to_rgba8();

    let stamped = stamp(img, text)?;
    encode_png(&stamped)
}

/// Draw `text` on a transparent layer and composite it over the image
pub fn stamp(mut img: RgbaImage, text: &str) -> Result<RgbaImage, BgError> {
    let font = FontRef::try_from_slice(FONT_DATA)
        .map_err(|e| BgError::Internal(format!("Failed to load watermark font: {}", e)))?;

    let (width, height) = img.dimensions();
    let mut layer = RgbaImage::new(width, height);
    draw_text_mut(
        &mut layer,
        INK,
        ORIGIN.0,
        ORIGIN.1,
        PxScale::from(TEXT_SCALE),
        &font,
        text,
    );

    imageops::overlay(&mut img, &layer, 0, 0);
    Ok(img)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pixels that differ from `background`
    fn inked(img: &RgbaImage, background: Rgba<u8>) -> Vec<(u32, u32, Rgba<u8>)> {
        img.enumerate_pixels()
            .filter(|(_, _, p)| **p != background)
            .map(|(x, y, p)| (x, y, *p))
            .collect()
    }

    #[test]
    fn test_stamp_blends_red_over_opaque_pixels() {
        let white = Rgba([255, 255, 255, 255]);
        let out = stamp(RgbaImage::from_pixel(300, 60, white), "API KEY MISSING").unwrap();

        let changed = inked(&out, white);
        assert!(!changed.is_empty());
        // Text starts at the origin and leaves the image opaque
        assert!(changed.iter().all(|(x, y, p)| *x >= 10 && *y >= 10 && p.0[3] >= 254));
        assert!(changed.iter().all(|(_, _, p)| p.0[0] >= p.0[1] && p.0[1] == p.0[2]));

        // Ink is translucent, so white always shows through a little
        let darkest = changed.iter().map(|(_, _, p)| p.0[1]).min().unwrap();
        assert!((70..=120).contains(&darkest), "darkest green channel {}", darkest);

        assert_eq!(*out.get_pixel(0, 0), white);
        assert_eq!(*out.get_pixel(299, 59), white);
    }

    #[test]
    fn test_stamp_on_transparent_pixels_uses_ink_alpha() {
        let clear = Rgba([0, 0, 0, 0]);
        let out = stamp(RgbaImage::from_pixel(200, 50, clear), "API ERROR").unwrap();

        let changed = inked(&out, clear);
        assert!(!changed.is_empty());
        assert!(changed.iter().all(|(_, _, p)| p.0[1] == 0 && p.0[2] == 0));
        let max_alpha = changed.iter().map(|(_, _, p)| p.0[3]).max().unwrap();
        assert!((150..=180).contains(&max_alpha), "max alpha {}", max_alpha);
    }

    #[test]
    fn test_stamp_clips_to_small_images() {
        let img = RgbaImage::from_pixel(12, 12, Rgba([0, 0, 255, 255]));
        let out = stamp(img, "API KEY MISSING").unwrap();
        assert_eq!(out.dimensions(), (12, 12));
    }

    #[test]
    fn test_watermark_png_roundtrips_dimensions() {
        let img = image::RgbImage::from_pixel(64, 32, image::Rgb([10, 200, 10]));
        let mut buf = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Jpeg)
            .unwrap();

        let png = watermark_png(buf.get_ref(), "API ERROR").unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 32));
        assert_eq!(image::guess_format(&png).unwrap(), image::ImageFormat::Png);
    }

    #[test]
    fn test_watermark_rejects_garbage() {
        assert!(matches!(
            watermark_png(b"not an image", "API ERROR"),
            Err(BgError::Decode(_))
        ));
    }
}
