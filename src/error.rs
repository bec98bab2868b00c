//! Error taxonomy shared by the indexing and query paths.

use thiserror::Error;

/// Failures surfaced by renderer, embedder, normalizer, and search-engine calls.
#[derive(Debug, Error)]
pub enum Error {
    /// Renderer unreachable, non-2xx, or returned a malformed/empty payload.
    #[error("render failed for {icon}: {reason}")]
    Render {
        /// Logical icon name that was being rendered.
        icon: String,
        /// Human-readable cause.
        reason: String,
    },

    /// Embedder unreachable, non-2xx, or returned an empty vector.
    #[error("embedding failed: {0}")]
    Embed(String),

    /// Vector had the wrong dimensionality for its embedding space.
    #[error("dimension mismatch for {field}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Field or space name the vector was destined for.
        field: String,
        /// Configured dimensionality.
        expected: usize,
        /// Observed vector length.
        actual: usize,
    },

    /// Rasterization or image decoding produced unusable output.
    #[error("conversion failed: {0}")]
    Conversion(String),

    /// Search-engine upsert failed.
    #[error("write failed for {doc_id}: {reason}")]
    Write {
        /// Document identifier that was being written.
        doc_id: String,
        /// Human-readable cause.
        reason: String,
    },

    /// Search-engine read failed or the request was unusable.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Local filesystem failure (source SVG reads, image dumps).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Query-time failures, split so callers can tell bad input from outages.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The caller sent something that can never succeed.
    #[error("invalid query: {0}")]
    BadInput(String),

    /// The search engine could not be reached or answered non-2xx.
    #[error("search backend unavailable: {0}")]
    Unavailable(String),

    /// The search engine answered with a body we could not interpret.
    #[error("malformed search response: {0}")]
    Malformed(String),
}

impl Error {
    /// True when the failure stems from caller input rather than a backend.
    pub fn is_bad_input(&self) -> bool {
        matches!(
            self,
            Error::Query(QueryError::BadInput(_)) | Error::Conversion(_)
        )
    }

    pub(crate) fn render(icon: &str, reason: impl Into<String>) -> Self {
        Error::Render {
            icon: icon.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn write(doc_id: &str, reason: impl Into<String>) -> Self {
        Error::Write {
            doc_id: doc_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
