//! Image preparation for OCR: flatten → downscale → PNG → base64.
//!
//! Providers receive a base64 PNG. Alpha is flattened over white first,
//! since scanned pages with transparent regions otherwise come through as
//! black. Images larger than the side cap are shrunk with Lanczos3, keeping
//! the aspect ratio, so request bodies stay bounded regardless of DPI.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use std::io::Cursor;
use tracing::debug;

/// Prepare a rendered page for an OCR provider.
pub fn prepare_for_ocr(img: DynamicImage, max_side: u32) -> Result<String, image::ImageError> {
    let rgb = flatten_to_rgb(img);
    let rgb = downscale(rgb, max_side);
    encode_png_base64(rgb)
}

/// Composite any alpha channel over a white background.
pub fn flatten_to_rgb(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.into_rgb8();
    }
    let rgba = img.into_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let a = a as u32;
        let blend = |c: u8| ((c as u32 * a + 255 * (255 - a)) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

/// Target size so that neither side exceeds `max_side`.
pub fn fit_within(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_side || max_side == 0 {
        return (width, height);
    }
    let scale = max_side as f64 / longest as f64;
    let w = ((width as f64 * scale).round() as u32).clamp(1, max_side);
    let h = ((height as f64 * scale).round() as u32).clamp(1, max_side);
    (w, h)
}

fn downscale(rgb: RgbImage, max_side: u32) -> RgbImage {
    let (w, h) = fit_within(rgb.width(), rgb.height(), max_side);
    if (w, h) == rgb.dimensions() {
        return rgb;
    }
    debug!("Downscaling {}x{} → {}x{}", rgb.width(), rgb.height(), w, h);
    image::imageops::resize(&rgb, w, h, FilterType::Lanczos3)
}

fn encode_png_base64(rgb: RgbImage) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(rgb).write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());
    Ok(b64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn transparent_pixels_become_white() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 0])));
        let rgb = flatten_to_rgb(img);
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn opaque_pixels_are_unchanged() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([10, 20, 30, 255])));
        assert_eq!(flatten_to_rgb(img).get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn fit_within_preserves_aspect() {
        assert_eq!(fit_within(4000, 1000, 2048), (2048, 512));
        assert_eq!(fit_within(1000, 4096, 2048), (500, 2048));
        assert_eq!(fit_within(800, 600, 2048), (800, 600));
    }

    #[test]
    fn prepared_image_is_base64_png_within_cap() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(300, 100, Rgba([255, 0, 0, 128])));
        let b64 = prepare_for_ocr(img, 150).expect("encode should succeed");
        let bytes = STANDARD.decode(&b64).expect("valid base64");
        assert_eq!(&bytes[1..4], b"PNG");
        let decoded = image::load_from_memory(&bytes).expect("valid png");
        assert_eq!((decoded.width(), decoded.height()), (150, 50));
    }
}
