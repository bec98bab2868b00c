//! Embedding Client: dense vectors for canonical rasters, SVG markup, and text.

mod http;

use std::collections::BTreeMap;

pub use http::HttpEmbedder;
use tracing::warn;

use crate::error::{Error, Result};
use crate::normalizer::Normalizer;

/// Lexical-expansion weights keyed by token.
pub type SparseEmbedding = BTreeMap<String, f32>;

/// Dense vector for query text plus its sparse expansion when one was produced.
#[derive(Clone, Debug, PartialEq)]
pub struct TextEmbedding {
    /// Text-space vector.
    pub dense: Vec<f32>,
    /// Lexical expansion; `None` when expansion failed or came back empty.
    pub sparse: Option<SparseEmbedding>,
}

/// Anything that can turn icon content or query text into vectors.
///
/// Implementations never retry. Every method except `embed_query` makes one outbound call.
pub trait Embedder: Send + Sync {
    /// Dense text-space vector for free text.
    fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Sparse token-weight map for free text. Callers treat failure as soft.
    fn expand_sparse(&self, text: &str) -> Result<SparseEmbedding>;

    /// Dense vector and sparse expansion together. Only a dense failure is an error.
    ///
    /// The default asks for each separately; backends that return both from one
    /// call should override it.
    fn embed_query(&self, text: &str) -> Result<TextEmbedding> {
        let dense = self.embed_text(text)?;
        let sparse = soft_sparse(self.expand_sparse(text));
        Ok(TextEmbedding { dense, sparse })
    }

    /// Image-space vector for PNG bytes that are already canonical.
    fn embed_image(&self, png: &[u8]) -> Result<Vec<f32>>;

    /// Image-space vector for SVG markup, rasterized by the embedding service.
    fn embed_svg(&self, markup: &str) -> Result<Vec<f32>>;
}

/// Downgrades a failed or empty expansion to `None`.
pub fn soft_sparse(expansion: Result<SparseEmbedding>) -> Option<SparseEmbedding> {
    match expansion {
        Ok(weights) if !weights.is_empty() => Some(weights),
        Ok(_) => {
            warn!("sparse expansion came back empty; using dense KNN only");
            None
        }
        Err(err) => {
            warn!(error = %err, "sparse expansion failed; using dense KNN only");
            None
        }
    }
}

/// Rejects empty vectors and vectors whose length differs from `expected`.
pub fn ensure_dims(vector: &[f32], expected: usize, space: &str) -> Result<()> {
    if vector.is_empty() {
        return Err(Error::Embed(format!("{space} embedding was empty")));
    }
    if vector.len() != expected {
        return Err(Error::DimensionMismatch {
            field: space.to_string(),
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// How SVG markup becomes an image-space vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SvgEmbedding {
    /// Canonicalize and rasterize locally, then send PNG bytes to the image endpoint.
    #[default]
    LocalRaster,
    /// Canonicalize locally and send the markup to the embedding service's SVG endpoint.
    Service,
}

impl std::str::FromStr for SvgEmbedding {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "local" | "raster" => Ok(SvgEmbedding::LocalRaster),
            "service" => Ok(SvgEmbedding::Service),
            other => Err(format!("unknown SVG route '{other}' (expected local or service)")),
        }
    }
}

/// Embeds raw SVG markup through `route`. The markup is always canonicalized first.
pub fn embed_svg_markup(
    embedder: &dyn Embedder,
    normalizer: &Normalizer,
    route: SvgEmbedding,
    markup: &str,
) -> Result<Vec<f32>> {
    let vector = match route {
        SvgEmbedding::LocalRaster => {
            let png = normalizer.svg_to_raster(markup)?.png()?;
            embedder.embed_image(&png)?
        }
        SvgEmbedding::Service => {
            let canonical = normalizer.canonicalize_svg(markup)?;
            embedder.embed_svg(&canonical)?
        }
    };
    if vector.is_empty() {
        return Err(Error::Conversion("SVG embedding came back empty".to_string()));
    }
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_guard() {
        assert!(ensure_dims(&[0.0; 4], 4, "text").is_ok());
        assert!(matches!(ensure_dims(&[], 4, "text"), Err(Error::Embed(_))));
        assert!(matches!(
            ensure_dims(&[0.0; 3], 4, "text"),
            Err(Error::DimensionMismatch { expected: 4, actual: 3, .. })
        ));
    }

    #[test]
    fn empty_or_failed_expansion_is_dropped() {
        let weights: SparseEmbedding = [("arrow".to_string(), 1.0)].into_iter().collect();
        assert_eq!(soft_sparse(Ok(weights.clone())), Some(weights));
        assert_eq!(soft_sparse(Ok(SparseEmbedding::new())), None);
        assert_eq!(soft_sparse(Err(Error::Embed("down".to_string()))), None);
    }
}
