//! Hybrid Query Composer.
//!
//! Text queries combine a sparse lexical-expansion `should` clause with a KNN clause on the
//! text-space field and fall back to KNN alone when sparse expansion fails. Image and SVG
//! queries go through the Normalization Engine and issue one KNN clause per selected
//! image-space field. Multi-field requests rely on the engine's native multi-KNN combination:
//! every clause carries `boost: 1.0`, so a document's score is the sum of its per-field
//! similarities.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::Dimensions;
use crate::document::{
    EmbeddingField, Variant, ICON_TYPE_FIELD, SPARSE_EMBEDDING_FIELD, TEXT_EMBEDDING_FIELD,
};
use crate::embedder::{
    embed_svg_markup, ensure_dims, soft_sparse, Embedder, SparseEmbedding, SvgEmbedding, TextEmbedding,
};
use crate::error::{QueryError, Result};
use crate::normalizer::Normalizer;
use crate::store::{DocumentStore, SearchResponse};

/// Results returned when the caller does not ask for a size.
pub const DEFAULT_RESULT_SIZE: usize = 10;
/// Upper bound on requested results.
pub const MAX_RESULT_SIZE: usize = 100;
/// Source fields fetched for each hit.
pub const RESULT_SOURCE_FIELDS: [&str; 4] = ["icon_name", "descriptions", "release_tag", "icon_type"];

/// What the query payload holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    /// Free text.
    Text,
    /// Base64 image bytes or a `data:` URI.
    Image,
    /// SVG markup.
    Svg,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueryKind::Text => "text",
            QueryKind::Image => "image",
            QueryKind::Svg => "svg",
        })
    }
}

impl FromStr for QueryKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "text" => Ok(QueryKind::Text),
            "image" => Ok(QueryKind::Image),
            "svg" => Ok(QueryKind::Svg),
            other => Err(format!("unknown query type '{other}' (expected text, image, or svg)")),
        }
    }
}

/// One search request.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct SearchRequest {
    /// Payload kind.
    #[serde(rename = "type")]
    pub kind: QueryKind,
    /// Text, base64 image, or SVG markup.
    pub query: String,
    /// Variant filter.
    #[serde(default)]
    pub icon_type: Option<Variant>,
    /// Explicit image-space fields for image/SVG queries.
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    /// Requested result count.
    #[serde(default)]
    pub size: Option<usize>,
}

impl SearchRequest {
    /// Request with no filter, no explicit fields, and the default size.
    pub fn new(kind: QueryKind, query: impl Into<String>) -> Self {
        Self {
            kind,
            query: query.into(),
            icon_type: None,
            fields: None,
            size: None,
        }
    }

    /// Result count clamped to `1..=MAX_RESULT_SIZE`.
    pub fn result_size(&self) -> usize {
        self.size
            .unwrap_or(DEFAULT_RESULT_SIZE)
            .clamp(1, MAX_RESULT_SIZE)
    }
}

/// Picks the image-space fields an image/SVG query searches. Never empty.
///
/// Valid explicit fields win; otherwise the variant's two fields; otherwise all four.
pub fn select_fields(explicit: Option<&[String]>, variant: Option<Variant>) -> Vec<EmbeddingField> {
    if let Some(explicit) = explicit {
        let mut chosen: Vec<EmbeddingField> = Vec::new();
        for name in explicit {
            match name.parse::<EmbeddingField>() {
                Ok(field) if !chosen.contains(&field) => chosen.push(field),
                Ok(_) => {}
                Err(err) => debug!(error = %err, "ignoring requested field"),
            }
        }
        if !chosen.is_empty() {
            return chosen;
        }
        if !explicit.is_empty() {
            warn!(requested = ?explicit, "no valid fields requested; searching all fields");
            return EmbeddingField::ALL.to_vec();
        }
    }
    match variant {
        Some(variant) => variant.fields().to_vec(),
        None => EmbeddingField::ALL.to_vec(),
    }
}

/// Candidate and result counts for KNN clauses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KnnParams {
    /// Neighbours returned per clause.
    pub k: usize,
    /// Candidates examined per shard.
    pub num_candidates: usize,
}

impl KnnParams {
    /// `k` equal to the result size with at least 100 candidates.
    pub fn for_size(size: usize) -> Self {
        Self {
            k: size,
            num_candidates: size.max(100),
        }
    }
}

/// Term filter on the variant label.
pub fn variant_filter(variant: Variant) -> Value {
    json!({ "term": { ICON_TYPE_FIELD: variant.as_str() } })
}

/// One KNN clause.
pub fn knn_clause(field: &str, vector: &[f32], params: KnnParams, filter: Option<&Value>) -> Value {
    let mut clause = json!({
        "field": field,
        "query_vector": vector,
        "k": params.k,
        "num_candidates": params.num_candidates,
    });
    if let Some(filter) = filter {
        clause["filter"] = filter.clone();
    }
    clause
}

/// KNN body over image-space `fields`. Several fields give one clause each.
pub fn vector_query(fields: &[EmbeddingField], vector: &[f32], size: usize) -> Value {
    let params = KnnParams::for_size(size);
    let knn = match fields {
        [single] => knn_clause(single.as_str(), vector, params, None),
        many => Value::Array(
            many.iter()
                .map(|field| {
                    let mut clause = knn_clause(field.as_str(), vector, params, None);
                    clause["boost"] = json!(1.0);
                    clause
                })
                .collect(),
        ),
    };
    json!({ "size": size, "_source": RESULT_SOURCE_FIELDS, "knn": knn })
}

/// Text body: hybrid when `sparse` is present and non-empty, KNN-only otherwise.
pub fn text_query(
    dense: &[f32],
    sparse: Option<&SparseEmbedding>,
    variant: Option<Variant>,
    size: usize,
) -> Value {
    let filter = variant.map(variant_filter);
    let knn = knn_clause(TEXT_EMBEDDING_FIELD, dense, KnnParams::for_size(size), filter.as_ref());
    let mut body = json!({ "size": size, "_source": RESULT_SOURCE_FIELDS, "knn": knn });

    if let Some(sparse) = sparse.filter(|weights| !weights.is_empty()) {
        let mut bool_query = Map::new();
        bool_query.insert(
            "should".to_string(),
            json!([{
                "sparse_vector": {
                    "field": SPARSE_EMBEDDING_FIELD,
                    "query_vector": sparse,
                }
            }]),
        );
        bool_query.insert("minimum_should_match".to_string(), json!(1));
        if let Some(filter) = filter {
            bool_query.insert("filter".to_string(), json!([filter]));
        }
        body["query"] = json!({ "bool": bool_query });
    }
    body
}

/// Decodes a base64 image payload, with or without a `data:<mime>;base64,` prefix.
pub fn decode_image_payload(payload: &str) -> Result<Vec<u8>> {
    let trimmed = payload.trim();
    let encoded = match trimmed.strip_prefix("data:") {
        Some(uri) => uri
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| QueryError::BadInput("data URI has no payload".to_string()))?,
        None => trimmed,
    };
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|err| QueryError::BadInput(format!("image is not valid base64: {err}")))?;
    if bytes.is_empty() {
        return Err(QueryError::BadInput("image payload is empty".to_string()).into());
    }
    Ok(bytes)
}

/// One ranked result.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchResult {
    /// Logical icon name.
    pub icon_name: String,
    /// Engine relevance score.
    pub score: f64,
    /// Free-text descriptions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptions: Option<Vec<String>>,
    /// Release the hit was indexed from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_tag: Option<String>,
    /// Variant label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_type: Option<String>,
}

/// Ranked results in engine order plus the engine's total.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchResults {
    /// Total hits as reported by the engine.
    pub total: u64,
    /// Results in engine relevance order.
    pub results: Vec<SearchResult>,
}

impl From<SearchResponse> for SearchResults {
    fn from(response: SearchResponse) -> Self {
        let results = response
            .hits
            .into_iter()
            .map(|hit| SearchResult {
                icon_name: hit.icon_name.unwrap_or(hit.id),
                score: hit.score,
                descriptions: hit.descriptions,
                release_tag: hit.release_tag,
                icon_type: hit.icon_type,
            })
            .collect();
        Self {
            total: response.total,
            results,
        }
    }
}

/// Embeds queries and runs the composed body against the store.
pub struct HybridSearcher {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn DocumentStore>,
    normalizer: Normalizer,
    dims: Dimensions,
    svg_embedding: SvgEmbedding,
    text_cache: Option<Mutex<LruCache<String, TextEmbedding>>>,
}

impl HybridSearcher {
    /// Searcher without a text-embedding cache.
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn DocumentStore>, dims: Dimensions) -> Self {
        Self {
            embedder,
            store,
            normalizer: Normalizer::default(),
            dims,
            svg_embedding: SvgEmbedding::default(),
            text_cache: None,
        }
    }

    /// Caches up to `capacity` text embeddings with their expansions. Zero disables caching.
    pub fn with_text_cache(mut self, capacity: usize) -> Self {
        self.text_cache = NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap)));
        self
    }

    /// Replaces the normalizer.
    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Selects how SVG queries are embedded.
    pub fn with_svg_embedding(mut self, route: SvgEmbedding) -> Self {
        self.svg_embedding = route;
        self
    }

    /// Embeds, composes, executes, and maps one request.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResults> {
        let body = self.compose(request)?;
        let response = self.store.search(&body)?;
        debug!(kind = %request.kind, total = response.total, hits = response.hits.len(), "search complete");
        Ok(response.into())
    }

    /// Produces the engine body for `request` without executing it.
    pub fn compose(&self, request: &SearchRequest) -> Result<Value> {
        if request.query.trim().is_empty() {
            return Err(QueryError::BadInput("query must not be empty".to_string()).into());
        }
        let size = request.result_size();
        match request.kind {
            QueryKind::Text => {
                let embedding = self.text_embedding(&request.query)?;
                Ok(text_query(
                    &embedding.dense,
                    embedding.sparse.as_ref(),
                    request.icon_type,
                    size,
                ))
            }
            QueryKind::Image => {
                let bytes = decode_image_payload(&request.query)?;
                let png = self.normalizer.canonicalize_raster(&bytes)?;
                let vector = self.embedder.embed_image(&png)?;
                self.image_query(request, &vector, size)
            }
            QueryKind::Svg => {
                let vector = embed_svg_markup(
                    self.embedder.as_ref(),
                    &self.normalizer,
                    self.svg_embedding,
                    &request.query,
                )?;
                self.image_query(request, &vector, size)
            }
        }
    }

    fn image_query(&self, request: &SearchRequest, vector: &[f32], size: usize) -> Result<Value> {
        ensure_dims(vector, self.dims.image, "image")?;
        let fields = select_fields(request.fields.as_deref(), request.icon_type);
        debug!(fields = ?fields, "image-space search");
        Ok(vector_query(&fields, vector, size))
    }

    /// One `/embed` round trip per uncached text. A cached entry whose expansion
    /// failed retries only the expansion.
    fn text_embedding(&self, text: &str) -> Result<TextEmbedding> {
        let key = text.trim().to_string();
        let cached = self
            .text_cache
            .as_ref()
            .and_then(|cache| cache.lock().ok().and_then(|mut guard| guard.get(&key).cloned()));
        let embedding = match cached {
            Some(hit) if hit.sparse.is_some() => return Ok(hit),
            Some(hit) => TextEmbedding {
                sparse: soft_sparse(self.embedder.expand_sparse(&key)),
                dense: hit.dense,
            },
            None => {
                let embedding = self.embedder.embed_query(&key)?;
                ensure_dims(&embedding.dense, self.dims.text, "text")?;
                embedding
            }
        };
        if let Some(cache) = &self.text_cache {
            if let Ok(mut guard) = cache.lock() {
                guard.put(key, embedding.clone());
            }
        }
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(fields: &[EmbeddingField]) -> Vec<&'static str> {
        fields.iter().map(|f| f.as_str()).collect()
    }

    #[test]
    fn bogus_explicit_fields_fall_back_to_all() {
        let fields = select_fields(Some(&["bogus".to_string()]), None);
        assert_eq!(fields, EmbeddingField::ALL.to_vec());
        let fields = select_fields(Some(&["bogus".to_string()]), Some(Variant::Token));
        assert_eq!(fields, EmbeddingField::ALL.to_vec());
    }

    #[test]
    fn explicit_fields_beat_variant() {
        let fields = select_fields(Some(&["icon_svg_embedding".to_string()]), Some(Variant::Token));
        assert_eq!(names(&fields), vec!["icon_svg_embedding"]);
    }

    #[test]
    fn variant_default_and_empty_list() {
        assert_eq!(
            names(&select_fields(None, Some(Variant::Token))),
            vec!["token_image_embedding", "token_svg_embedding"]
        );
        assert_eq!(
            names(&select_fields(Some(&[]), Some(Variant::Icon))),
            vec!["icon_image_embedding", "icon_svg_embedding"]
        );
        assert_eq!(select_fields(None, None).len(), 4);
    }

    #[test]
    fn single_field_issues_one_clause() {
        let body = vector_query(&[EmbeddingField::IconImage], &[0.5, 0.5], 5);
        assert_eq!(
            body["knn"],
            json!({
                "field": "icon_image_embedding",
                "query_vector": [0.5, 0.5],
                "k": 5,
                "num_candidates": 100
            })
        );
    }

    #[test]
    fn many_fields_share_vector_and_params() {
        let body = vector_query(&EmbeddingField::ALL, &[1.0], 10);
        let clauses = body["knn"].as_array().unwrap();
        assert_eq!(clauses.len(), 4);
        for clause in clauses {
            assert_eq!(clause["query_vector"], json!([1.0]));
            assert_eq!(clause["k"], json!(10));
            assert_eq!(clause["boost"], json!(1.0));
        }
    }

    #[test]
    fn hybrid_text_query_with_filter() {
        let sparse: SparseEmbedding = [("arrow".to_string(), 1.5)].into_iter().collect();
        let body = text_query(&[0.1], Some(&sparse), Some(Variant::Icon), 10);
        assert_eq!(
            body["query"],
            json!({ "bool": {
                "should": [{ "sparse_vector": {
                    "field": "text_embedding_sparse",
                    "query_vector": { "arrow": 1.5 }
                } }],
                "minimum_should_match": 1,
                "filter": [{ "term": { "icon_type": "icon" } }]
            } })
        );
        assert_eq!(body["knn"]["field"], json!("text_embedding"));
        assert_eq!(body["knn"]["filter"], json!({ "term": { "icon_type": "icon" } }));
    }

    #[test]
    fn text_query_degrades_without_sparse() {
        let body = text_query(&[0.1], None, None, 3);
        assert!(body.get("query").is_none());
        assert!(body["knn"].get("filter").is_none());
        let empty = SparseEmbedding::new();
        assert!(text_query(&[0.1], Some(&empty), None, 3).get("query").is_none());
    }

    #[test]
    fn image_payload_accepts_data_uri() {
        assert_eq!(decode_image_payload("aGVsbG8=").unwrap(), b"hello".to_vec());
        assert_eq!(
            decode_image_payload("data:image/png;base64,aGVs\nbG8=").unwrap(),
            b"hello".to_vec()
        );
        assert!(decode_image_payload("***").unwrap_err().is_bad_input());
        assert!(decode_image_payload("data:image/png;base64").unwrap_err().is_bad_input());
    }

    #[test]
    fn request_parses_api_shape() {
        let request: SearchRequest = serde_json::from_value(json!({
            "type": "svg",
            "query": "<svg/>",
            "icon_type": "token",
            "fields": ["token_svg_embedding"]
        }))
        .unwrap();
        assert_eq!(request.kind, QueryKind::Svg);
        assert_eq!(request.icon_type, Some(Variant::Token));
        assert_eq!(request.result_size(), DEFAULT_RESULT_SIZE);
    }
}
