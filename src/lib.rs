#![warn(missing_docs)]
//! Icon asset normalization, version-gated batch indexing, and hybrid vector search.

pub mod completeness;
pub mod config;
pub mod document;
pub mod embedder;
pub mod error;
pub mod indexer;
pub mod logging;
pub mod manifest;
pub mod normalizer;
pub mod query;
pub mod renderer;
pub mod store;
pub mod version;

pub use config::{Dimensions, ServiceArgs, ServiceConfig};
pub use document::{DocumentId, EmbeddingField, IconRecord, RunScope, Variant};
pub use embedder::{Embedder, HttpEmbedder, SvgEmbedding};
pub use error::{Error, QueryError, Result};
pub use indexer::{Indexer, IndexerOptions, RunOutcome, RunReport};
pub use manifest::{GitCheckout, ManifestSnapshot, MatchedIcon};
pub use normalizer::{NormalizationConfig, Normalizer};
pub use query::{HybridSearcher, QueryKind, SearchRequest, SearchResults};
pub use renderer::{HttpRenderer, IconRenderer};
pub use store::{DocumentStore, ElasticStore};
pub use version::VersionMarker;
