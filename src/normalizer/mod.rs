//! Normalization Engine shared by the indexing and query paths.
//!
//! Both SVG markup and arbitrary raster images end up as the same thing: a square
//! RGB image with dark content on a white field, ready for the image embedder.

pub mod raster;
pub mod svg;

use std::collections::HashSet;
use std::io::Cursor;

use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};
use resvg::{tiny_skia, usvg};
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub use svg::{extract_svg_fragment, ViewBox};

/// Tunables for canonicalization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationConfig {
    /// Edge length of the square raster fed to the embedder.
    pub target_size: u32,
    /// viewBox used when markup carries neither a viewBox nor usable dimensions.
    pub default_viewbox: ViewBox,
    /// Width in pixels of the border ring sampled for background polarity.
    pub border_band: u32,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            target_size: 224,
            default_viewbox: ViewBox::square(24.0),
            border_band: 1,
        }
    }
}

/// Luminance summary of a rasterized image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterStats {
    /// Number of distinct RGB values.
    pub unique_colors: usize,
    /// Darkest pixel.
    pub min_luma: f32,
    /// Brightest pixel.
    pub max_luma: f32,
    /// Mean over all pixels.
    pub mean_luma: f32,
}

impl RasterStats {
    /// Computes statistics over every pixel of `image`.
    pub fn of(image: &RgbImage) -> Self {
        let mut colors = HashSet::new();
        let (mut min, mut max, mut sum) = (f32::MAX, f32::MIN, 0.0f64);
        for pixel in image.pixels() {
            colors.insert(pixel.0);
            let value = raster::luma(pixel[0], pixel[1], pixel[2]);
            min = min.min(value);
            max = max.max(value);
            sum += f64::from(value);
        }
        let count = u64::from(image.width()) * u64::from(image.height());
        if count == 0 {
            return Self {
                unique_colors: 0,
                min_luma: 0.0,
                max_luma: 0.0,
                mean_luma: 0.0,
            };
        }
        Self {
            unique_colors: colors.len(),
            min_luma: min,
            max_luma: max,
            mean_luma: (sum / count as f64) as f32,
        }
    }

    /// A single flat color usually means the artwork failed to draw.
    pub fn is_single_color(&self) -> bool {
        self.unique_colors == 1
    }
}

/// A rasterized canonical SVG.
#[derive(Debug, Clone)]
pub struct Rasterized {
    /// Square RGB pixels.
    pub image: RgbImage,
    /// Luminance summary.
    pub stats: RasterStats,
}

impl Rasterized {
    /// PNG encoding of the pixels.
    pub fn png(&self) -> Result<Vec<u8>> {
        encode_png(&DynamicImage::ImageRgb8(self.image.clone()))
    }
}

/// Deterministic canonicalizer for SVG markup and raster images.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizationConfig,
}

impl Normalizer {
    /// Builds a normalizer with the given settings.
    pub fn new(config: NormalizationConfig) -> Self {
        Self { config }
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &NormalizationConfig {
        &self.config
    }

    /// Rewrites markup into the canonical convention (explicit viewBox, white plate, black fills).
    pub fn canonicalize_svg(&self, markup: &str) -> Result<String> {
        svg::canonicalize(markup, self.config.default_viewbox)
    }

    /// Renders already-canonical markup onto a white `target_size` square.
    pub fn rasterize_svg(&self, canonical: &str) -> Result<Rasterized> {
        let size = self.config.target_size;
        let tree = usvg::Tree::from_str(canonical, &usvg::Options::default())
            .map_err(|err| Error::Conversion(format!("unparseable SVG: {err}")))?;
        let tree_size = tree.size();
        if tree_size.width() <= 0.0 || tree_size.height() <= 0.0 {
            return Err(Error::Conversion("SVG has zero dimensions".to_string()));
        }

        let mut pixmap = tiny_skia::Pixmap::new(size, size)
            .ok_or_else(|| Error::Conversion(format!("cannot allocate {size}x{size} raster")))?;
        pixmap.fill(tiny_skia::Color::WHITE);
        let transform = tiny_skia::Transform::from_scale(
            size as f32 / tree_size.width(),
            size as f32 / tree_size.height(),
        );
        resvg::render(&tree, transform, &mut pixmap.as_mut());

        let (width, height) = (pixmap.width(), pixmap.height());
        let rgba = RgbaImage::from_raw(width, height, pixmap.take())
            .ok_or_else(|| Error::Conversion("rasterizer returned a short buffer".to_string()))?;
        let image = DynamicImage::ImageRgba8(rgba).to_rgb8();
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::Conversion("rasterizer produced an empty image".to_string()));
        }

        let stats = RasterStats::of(&image);
        if stats.is_single_color() {
            warn!(
                mean_luma = stats.mean_luma,
                "rasterized SVG contains a single color; artwork may not have rendered"
            );
        } else {
            debug!(unique_colors = stats.unique_colors, "rasterized SVG");
        }
        Ok(Rasterized { image, stats })
    }

    /// Canonicalizes then rasterizes raw markup.
    pub fn svg_to_raster(&self, markup: &str) -> Result<Rasterized> {
        let canonical = self.canonicalize_svg(markup)?;
        self.rasterize_svg(&canonical)
    }

    /// Decodes an arbitrary image, canonicalizes it, and returns PNG bytes.
    pub fn canonicalize_raster(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let decoded = decode_image(bytes)?;
        let canonical = self.canonicalize_image(&decoded)?;
        encode_png(&DynamicImage::ImageRgb8(canonical))
    }

    /// Canonicalizes an already-decoded image.
    pub fn canonicalize_image(&self, image: &DynamicImage) -> Result<RgbImage> {
        raster::canonicalize(image, self.config.target_size, self.config.border_band)
    }
}

/// Decodes PNG/JPEG/GIF/WebP bytes.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(Error::Conversion("empty image payload".to_string()));
    }
    image::load_from_memory(bytes).map_err(|err| Error::Conversion(format!("undecodable image: {err}")))
}

/// Encodes `image` as PNG. Empty output is a conversion failure.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|err| Error::Conversion(format!("PNG encoding failed: {err}")))?;
    let bytes = buffer.into_inner();
    if bytes.is_empty() {
        return Err(Error::Conversion("PNG encoder produced no bytes".to_string()));
    }
    Ok(bytes)
}
