//! Elasticsearch-compatible REST client.

use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;

use super::{DocumentStore, SearchResponse};
use crate::config::{SearchEngineConfig, ServiceConfig};
use crate::document::{DocumentId, IconRecord};
use crate::error::{Error, QueryError, Result};

/// Blocking client for one index.
#[derive(Clone)]
pub struct ElasticStore {
    client: Client,
    endpoint: Url,
    index: String,
}

impl ElasticStore {
    /// Builds a client for `config.index` at `config.endpoint`.
    pub fn new(config: &SearchEngineConfig, timeout: Duration) -> anyhow::Result<Self> {
        anyhow::ensure!(!config.index.trim().is_empty(), "index name is required");
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = config.api_key.as_deref() {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("ApiKey {key}")).context("invalid search API key")?,
            );
        }
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build search HTTP client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            index: config.index.clone(),
        })
    }

    /// Builds a client from the shared service configuration.
    pub fn from_config(config: &ServiceConfig) -> anyhow::Result<Self> {
        Self::new(config.search(), config.timeout())
    }

    /// Name of the index this client targets.
    pub fn index(&self) -> &str {
        &self.index
    }

    /// True when the index exists.
    pub fn index_exists(&self) -> anyhow::Result<bool> {
        let response = self
            .client
            .head(self.url(&[]))
            .send()
            .context("index existence check failed")?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => anyhow::bail!("index existence check answered {status}"),
        }
    }

    /// Deletes the index. A missing index is not an error.
    pub fn delete_index(&self) -> anyhow::Result<()> {
        let response = self
            .client
            .delete(self.url(&[]))
            .send()
            .context("index deletion failed")?;
        let status = response.status();
        anyhow::ensure!(
            status.is_success() || status == StatusCode::NOT_FOUND,
            "index deletion answered {status}: {}",
            body_text(response)
        );
        info!(index = %self.index, "deleted index");
        Ok(())
    }

    /// Creates the index with `mapping`.
    pub fn create_index(&self, mapping: &Value) -> anyhow::Result<()> {
        let response = self
            .client
            .put(self.url(&[]))
            .json(mapping)
            .send()
            .context("index creation failed")?;
        let status = response.status();
        anyhow::ensure!(
            status.is_success(),
            "index creation answered {status}: {}",
            body_text(response)
        );
        info!(index = %self.index, "created index");
        Ok(())
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.push(&self.index);
            for segment in segments {
                path.push(segment);
            }
        }
        url
    }

    fn read(&self, request: reqwest::blocking::RequestBuilder) -> Result<Value> {
        let response = request
            .send()
            .map_err(|err| QueryError::Unavailable(err.to_string()))?;
        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            let reason = format!("engine rejected request: {}", body_text(response));
            return Err(QueryError::Malformed(reason).into());
        }
        if !status.is_success() {
            return Err(QueryError::Unavailable(format!("{status}: {}", body_text(response))).into());
        }
        Ok(response
            .json()
            .map_err(|err| QueryError::Malformed(err.to_string()))?)
    }
}

impl DocumentStore for ElasticStore {
    fn fetch(&self, id: &DocumentId) -> Result<Option<IconRecord>> {
        let doc_id = id.to_string();
        let response = self
            .client
            .get(self.url(&["_doc", &doc_id]))
            .send()
            .map_err(|err| QueryError::Unavailable(err.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            return Err(QueryError::Unavailable(format!("{status}: {}", body_text(response))).into());
        }
        let doc: GetResponse = response
            .json()
            .map_err(|err| QueryError::Malformed(err.to_string()))?;
        if !doc.found {
            return Ok(None);
        }
        doc.source
            .map(serde_json::from_value)
            .transpose()
            .map_err(|err| QueryError::Malformed(format!("document {doc_id}: {err}")).into())
    }

    fn upsert(&self, id: &DocumentId, record: &IconRecord) -> Result<()> {
        let doc_id = id.to_string();
        let body = json!({ "doc": record, "doc_as_upsert": true });
        let response = self
            .client
            .post(self.url(&["_update", &doc_id]))
            .json(&body)
            .send()
            .map_err(|err| Error::write(&doc_id, format!("request failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::write(&doc_id, format!("{status}: {}", body_text(response))));
        }
        debug!(doc_id, "upserted");
        Ok(())
    }

    fn search(&self, body: &Value) -> Result<SearchResponse> {
        let raw = self.read(self.client.post(self.url(&["_search"])).json(body))?;
        SearchResponse::parse(raw)
    }

    fn count(&self, query: &Value) -> Result<u64> {
        let raw = self.read(
            self.client
                .post(self.url(&["_count"]))
                .json(&json!({ "query": query })),
        )?;
        raw.get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| QueryError::Malformed("count response has no count".to_string()).into())
    }
}

#[derive(Deserialize)]
struct GetResponse {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source", default)]
    source: Option<Value>,
}

fn body_text(response: Response) -> String {
    response
        .text()
        .unwrap_or_else(|_| "<body unavailable>".to_string())
}
