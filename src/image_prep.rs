//! Photo preprocessing for ID card uploads.
//!
//! Phone photos arrive rotated, in portrait, and often low contrast (older
//! yellow cards especially). Each upload goes through a fixed sequence before
//! it is sent to the model or exported:
//!
//! 1. EXIF orientation (tag 0x0112)
//! 2. rotate 90° counter-clockwise if taller than wide
//! 3. RGB8
//! 4. contrast ×1.8 against the mean grey
//! 5. sharpness ×2.5 against a 3×3 smoothing
//! 6. downscale to fit 1400×1400, aspect preserved, never upscaled
//! 7. JPEG, quality 95

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use tracing::debug;

use crate::error::ImageError;

const CONTRAST_FACTOR: f32 = 1.8;
const SHARPNESS_FACTOR: f32 = 2.5;
const MAX_DIMENSION: u32 = 1400;
const JPEG_QUALITY: u8 = 95;

/// A preprocessed photo, already JPEG-encoded.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

/// Run the full preprocessing sequence on raw upload bytes.
pub fn preprocess(bytes: &[u8]) -> Result<ProcessedImage, ImageError> {
    let decoded = image::load_from_memory(bytes).map_err(ImageError::Decode)?;
    debug!(
        "Decoded upload: {}x{} ({} bytes)",
        decoded.width(),
        decoded.height(),
        bytes.len()
    );

    let oriented = apply_orientation(decoded, read_exif_orientation(bytes));
    let landscape = if oriented.height() > oriented.width() {
        oriented.rotate270()
    } else {
        oriented
    };

    let rgb = landscape.to_rgb8();
    let rgb = enhance_contrast(&rgb, CONTRAST_FACTOR);
    let rgb = enhance_sharpness(&rgb, SHARPNESS_FACTOR);
    let rgb = fit_within(rgb, MAX_DIMENSION);

    let jpeg = encode_jpeg(&rgb)?;
    debug!(
        "Processed image: {}x{} → {} bytes JPEG",
        rgb.width(),
        rgb.height(),
        jpeg.len()
    );

    Ok(ProcessedImage {
        width: rgb.width(),
        height: rgb.height(),
        jpeg,
    })
}

/// Read the EXIF orientation tag. Returns 1 (normal) when absent.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply an EXIF orientation value (1-8) to an image.
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Scale each channel away from the image's mean luminance.
fn enhance_contrast(img: &RgbImage, factor: f32) -> RgbImage {
    let count = (img.width() as u64 * img.height() as u64).max(1);
    let total: u64 = img.pixels().map(|p| luminance(p) as u64).sum();
    let mean = (total as f32 / count as f32).round();

    let mut out = img.clone();
    for pixel in out.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            *channel = blend(mean, *channel as f32, factor);
        }
    }
    out
}

/// Scale each pixel away from its 3×3 smoothed value. Edge pixels are kept.
fn enhance_sharpness(img: &RgbImage, factor: f32) -> RgbImage {
    let (width, height) = img.dimensions();
    if width < 3 || height < 3 {
        return img.clone();
    }

    let mut out = img.clone();
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mut acc = [0u32; 3];
            for dy in 0..3 {
                for dx in 0..3 {
                    let weight = if dx == 1 && dy == 1 { 5 } else { 1 };
                    let neighbour = img.get_pixel(x + dx - 1, y + dy - 1);
                    for (sum, value) in acc.iter_mut().zip(neighbour.0) {
                        *sum += value as u32 * weight;
                    }
                }
            }

            let original = img.get_pixel(x, y);
            let mut sharpened = [0u8; 3];
            for c in 0..3 {
                let smooth = acc[c] as f32 / 13.0;
                sharpened[c] = blend(smooth, original.0[c] as f32, factor);
            }
            out.put_pixel(x, y, Rgb(sharpened));
        }
    }
    out
}

/// Downscale so neither side exceeds `max`. Smaller images pass through.
fn fit_within(img: RgbImage, max: u32) -> RgbImage {
    let (width, height) = img.dimensions();
    if width <= max && height <= max {
        return img;
    }
    let scale = (max as f32 / width as f32).min(max as f32 / height as f32);
    let new_width = ((width as f32 * scale).round() as u32).clamp(1, max);
    let new_height = ((height as f32 * scale).round() as u32).clamp(1, max);
    image::imageops::resize(&img, new_width, new_height, FilterType::Lanczos3)
}

fn encode_jpeg(img: &RgbImage) -> Result<Vec<u8>, ImageError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY)
        .encode_image(img)
        .map_err(ImageError::Encode)?;
    Ok(buf)
}

fn luminance(p: &Rgb<u8>) -> u32 {
    let [r, g, b] = p.0;
    (r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000
}

fn blend(base: f32, value: f32, factor: f32) -> u8 {
    (base + factor * (value - base)).round().clamp(0.0, 255.0) as u8
}
