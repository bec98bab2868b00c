//! Raster canonicalization: dark content on a light field, full contrast, fixed size.

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma, RgbImage, RgbaImage};

use crate::error::{Error, Result};

/// Background luminance below this midpoint means the image is dark-on-light inverted.
pub const LUMA_MIDPOINT: f32 = 255.0 / 2.0;

/// ITU-R BT.601 luma.
pub fn luma(r: u8, g: u8, b: u8) -> f32 {
    0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b)
}

/// Per-pixel luminance of `image`, with transparency composited over white.
pub fn luminance(image: &DynamicImage) -> Vec<f32> {
    flatten_alpha(image.to_rgba8())
        .pixels()
        .map(|pixel| luma(pixel[0], pixel[1], pixel[2]))
        .collect()
}

/// Mean luminance of the outer `band` pixels on every edge.
pub fn border_mean(values: &[f32], width: u32, height: u32, band: u32) -> f32 {
    let band = band.max(1);
    let (mut sum, mut count) = (0.0f64, 0u64);
    for y in 0..height {
        for x in 0..width {
            let on_border =
                x < band || y < band || x + band >= width || y + band >= height;
            if on_border {
                sum += f64::from(values[(y * width + x) as usize]);
                count += 1;
            }
        }
    }
    if count == 0 {
        return 255.0;
    }
    (sum / count as f64) as f32
}

/// True when the border is predominantly dark.
pub fn is_dark_background(values: &[f32], width: u32, height: u32, band: u32) -> bool {
    border_mean(values, width, height, band) < LUMA_MIDPOINT
}

/// Linear min-max stretch onto 0..=255. A flat image becomes pure white.
pub fn stretch_contrast(values: &mut [f32]) {
    let (min, max) = values
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    if values.is_empty() || max <= min {
        values.iter_mut().for_each(|v| *v = 255.0);
        return;
    }
    let span = max - min;
    for value in values.iter_mut() {
        *value = (*value - min) / span * 255.0;
    }
}

/// Grayscale, polarity-corrected, contrast-stretched, RGB, `target`x`target` Lanczos resample.
pub fn canonicalize(image: &DynamicImage, target: u32, band: u32) -> Result<RgbImage> {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(Error::Conversion("image has zero dimensions".to_string()));
    }

    let mut values = luminance(image);
    if is_dark_background(&values, width, height, band) {
        values.iter_mut().for_each(|v| *v = 255.0 - *v);
    }
    stretch_contrast(&mut values);

    let gray = GrayImage::from_fn(width, height, |x, y| {
        let value = values[(y * width + x) as usize];
        Luma([value.round().clamp(0.0, 255.0) as u8])
    });
    let rgb = DynamicImage::ImageLuma8(gray).to_rgb8();
    Ok(image::imageops::resize(&rgb, target, target, FilterType::Lanczos3))
}

fn flatten_alpha(mut rgba: RgbaImage) -> RgbaImage {
    for pixel in rgba.pixels_mut() {
        let alpha = f32::from(pixel[3]) / 255.0;
        if alpha < 1.0 {
            for channel in 0..3 {
                let blended = f32::from(pixel[channel]) * alpha + 255.0 * (1.0 - alpha);
                pixel[channel] = blended.round() as u8;
            }
            pixel[3] = 255;
        }
    }
    rgba
}
