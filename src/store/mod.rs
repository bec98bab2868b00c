//! Search-engine document store: keyed reads, partial upserts, and raw searches.

mod elastic;

use serde::Deserialize;
use serde_json::{json, Value};

pub use elastic::ElasticStore;

use crate::config::Dimensions;
use crate::document::{
    DocumentId, EmbeddingField, IconRecord, ICON_TYPE_FIELD, SPARSE_EMBEDDING_FIELD,
    TEXT_EMBEDDING_FIELD,
};
use crate::error::{QueryError, Result};

/// Document store backing the index.
pub trait DocumentStore: Send + Sync {
    /// Reads one document. A missing document is `Ok(None)`.
    fn fetch(&self, id: &DocumentId) -> Result<Option<IconRecord>>;

    /// Merges the populated fields of `record` into the stored document, creating it if absent.
    fn upsert(&self, id: &DocumentId, record: &IconRecord) -> Result<()>;

    /// Runs a raw search body and parses the hit list.
    fn search(&self, body: &Value) -> Result<SearchResponse>;

    /// Counts documents matching `query` (a query clause, not a full body).
    fn count(&self, query: &Value) -> Result<u64>;
}

/// Ranked hits plus the engine's total-hit count, both as reported.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResponse {
    /// Total matches reported by the engine.
    pub total: u64,
    /// Hits in engine relevance order.
    pub hits: Vec<SearchHit>,
}

/// One ranked hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Document id.
    pub id: String,
    /// Engine relevance score.
    pub score: f64,
    /// Logical icon name.
    pub icon_name: Option<String>,
    /// Free-text descriptions, when indexed.
    pub descriptions: Option<Vec<String>>,
    /// Release the document was indexed from.
    pub release_tag: Option<String>,
    /// Variant label, when indexed.
    pub icon_type: Option<String>,
}

impl SearchResponse {
    /// Parses an engine `_search` response body.
    ///
    /// `hits.total` may be a bare count or `{ "value": n, ... }`; when absent the hit count is used.
    pub fn parse(body: Value) -> Result<Self> {
        let raw: RawSearch = serde_json::from_value(body)
            .map_err(|err| QueryError::Malformed(err.to_string()))?;
        let hits: Vec<SearchHit> = raw
            .hits
            .hits
            .into_iter()
            .map(|hit| {
                let source = hit.source.unwrap_or_default();
                SearchHit {
                    id: hit.id,
                    score: hit.score.unwrap_or(0.0),
                    icon_name: source.icon_name,
                    descriptions: source.descriptions,
                    release_tag: source.release_tag,
                    icon_type: source.icon_type,
                }
            })
            .collect();
        let total = match raw.hits.total {
            Some(TotalHits::Count(count)) => count,
            Some(TotalHits::Object { value }) => value,
            None => hits.len() as u64,
        };
        Ok(Self { total, hits })
    }
}

#[derive(Deserialize)]
struct RawSearch {
    hits: RawHits,
}

#[derive(Deserialize)]
struct RawHits {
    #[serde(default)]
    total: Option<TotalHits>,
    #[serde(default)]
    hits: Vec<RawHit>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TotalHits {
    Count(u64),
    Object { value: u64 },
}

#[derive(Deserialize)]
struct RawHit {
    #[serde(rename = "_id", default)]
    id: String,
    #[serde(rename = "_score", default)]
    score: Option<f64>,
    #[serde(rename = "_source", default)]
    source: Option<HitSource>,
}

#[derive(Deserialize, Default)]
struct HitSource {
    #[serde(default)]
    icon_name: Option<String>,
    #[serde(default)]
    descriptions: Option<Vec<String>>,
    #[serde(default)]
    release_tag: Option<String>,
    #[serde(default)]
    icon_type: Option<String>,
}

/// Index settings and mappings for icon documents.
pub fn index_mapping(dims: Dimensions) -> Value {
    let image_vector = json!({
        "type": "dense_vector",
        "dims": dims.image,
        "index": true,
        "similarity": "cosine"
    });
    let mut properties = serde_json::Map::new();
    properties.insert("icon_name".into(), json!({ "type": "keyword" }));
    properties.insert("filename".into(), json!({ "type": "keyword" }));
    properties.insert("release_tag".into(), json!({ "type": "keyword" }));
    properties.insert(ICON_TYPE_FIELD.into(), json!({ "type": "keyword" }));
    properties.insert("token_type".into(), json!({ "type": "keyword" }));
    properties.insert(
        "descriptions".into(),
        json!({ "type": "text", "fields": { "keyword": { "type": "keyword" } } }),
    );
    properties.insert("svg_content".into(), json!({ "type": "text", "index": false }));
    properties.insert("token_svg_content".into(), json!({ "type": "text", "index": false }));
    properties.insert(
        TEXT_EMBEDDING_FIELD.into(),
        json!({ "type": "dense_vector", "dims": dims.text, "index": true, "similarity": "cosine" }),
    );
    properties.insert(SPARSE_EMBEDDING_FIELD.into(), json!({ "type": "sparse_vector" }));
    for field in EmbeddingField::ALL {
        properties.insert(field.as_str().into(), image_vector.clone());
    }
    json!({
        "settings": { "number_of_shards": 1, "number_of_replicas": 0 },
        "mappings": { "properties": properties }
    })
}
