//! Embedding service client (`/embed`, `/embed-image`, `/embed-svg`).

use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderValue, ACCEPT};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{soft_sparse, Embedder, SparseEmbedding, TextEmbedding};
use crate::config::{join_path, ServiceConfig};
use crate::error::{Error, Result};

/// Blocking client for the embedding service.
#[derive(Clone)]
pub struct HttpEmbedder {
    client: Client,
    text_url: Url,
    image_url: Url,
    svg_url: Url,
}

impl HttpEmbedder {
    /// Builds a client rooted at `base_url` with a fixed per-request timeout.
    pub fn new(base_url: &Url, timeout: Duration) -> anyhow::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build embedding HTTP client")?;
        Ok(Self {
            client,
            text_url: join_path(base_url, "embed"),
            image_url: join_path(base_url, "embed-image"),
            svg_url: join_path(base_url, "embed-svg"),
        })
    }

    /// Builds a client from the shared service configuration.
    pub fn from_config(config: &ServiceConfig) -> anyhow::Result<Self> {
        Self::new(config.embedder_url(), config.timeout())
    }

    fn text_response(&self, text: &str) -> Result<TextEmbedResponse> {
        send(self.client.post(self.text_url.clone()).json(&TextEmbedRequest { content: text }))
    }
}

impl Embedder for HttpEmbedder {
    fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        non_empty(self.text_response(text)?.embeddings, "text")
    }

    fn expand_sparse(&self, text: &str) -> Result<SparseEmbedding> {
        match self.text_response(text)?.sparse_embeddings {
            Some(weights) if !weights.is_empty() => Ok(weights),
            _ => Err(Error::Embed("service returned no sparse embedding".to_string())),
        }
    }

    fn embed_query(&self, text: &str) -> Result<TextEmbedding> {
        let response = self.text_response(text)?;
        let sparse = soft_sparse(
            response
                .sparse_embeddings
                .ok_or_else(|| Error::Embed("service returned no sparse embedding".to_string())),
        );
        let dense = non_empty(response.embeddings, "text")?;
        Ok(TextEmbedding { dense, sparse })
    }

    fn embed_image(&self, png: &[u8]) -> Result<Vec<f32>> {
        let part = Part::bytes(png.to_vec())
            .file_name("token.png")
            .mime_str("image/png")
            .map_err(|err| Error::Embed(format!("invalid multipart part: {err}")))?;
        let form = Form::new().part("file", part);
        let response: VectorResponse = send(self.client.post(self.image_url.clone()).multipart(form))?;
        non_empty(response.embeddings, "image")
    }

    fn embed_svg(&self, markup: &str) -> Result<Vec<f32>> {
        let request = SvgEmbedRequest { svg_content: markup };
        let response: VectorResponse = send(self.client.post(self.svg_url.clone()).json(&request))?;
        non_empty(response.embeddings, "svg")
    }
}

fn send<T: for<'de> Deserialize<'de>>(request: RequestBuilder) -> Result<T> {
    let response = request
        .send()
        .map_err(|err| Error::Embed(format!("request failed: {err}")))?;
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        return Err(Error::Embed(format!("service answered {status}: {body}")));
    }
    response
        .json()
        .map_err(|err| Error::Embed(format!("unparseable response: {err}")))
}

fn non_empty(vector: Vec<f32>, kind: &str) -> Result<Vec<f32>> {
    if vector.is_empty() {
        return Err(Error::Embed(format!("service returned an empty {kind} vector")));
    }
    debug!(kind, dims = vector.len(), "embedded");
    Ok(vector)
}

#[derive(Serialize)]
struct TextEmbedRequest<'a> {
    content: &'a str,
}

#[derive(Serialize)]
struct SvgEmbedRequest<'a> {
    svg_content: &'a str,
}

#[derive(Deserialize)]
struct TextEmbedResponse {
    #[serde(default)]
    embeddings: Vec<f32>,
    #[serde(default)]
    sparse_embeddings: Option<SparseEmbedding>,
}

#[derive(Deserialize)]
struct VectorResponse {
    #[serde(default)]
    embeddings: Vec<f32>,
}
