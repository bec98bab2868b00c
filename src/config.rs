//! Service endpoints and tunables threaded through every client constructor.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use url::Url;

/// Default per-request timeout for renderer, embedder, and search-engine calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Dimensionality of the image embedding space (CLIP ViT-B/32).
pub const DEFAULT_IMAGE_DIMS: usize = 512;
/// Dimensionality of the text embedding space (MiniLM-L6).
pub const DEFAULT_TEXT_DIMS: usize = 384;
/// Default search index name.
pub const DEFAULT_INDEX: &str = "icons";

/// Fixed vector sizes for the two embedding spaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dimensions {
    /// Image-space vectors (all four icon/token fields).
    pub image: usize,
    /// Text-space vectors (query text and description embeddings).
    pub text: usize,
}

impl Default for Dimensions {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE_DIMS,
            text: DEFAULT_TEXT_DIMS,
        }
    }
}

/// Connection details for the search engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchEngineConfig {
    /// Base URL of the cluster.
    pub endpoint: Url,
    /// Optional API key sent as `Authorization: ApiKey <key>`.
    pub api_key: Option<String>,
    /// Index holding icon documents.
    pub index: String,
}

/// Explicit configuration for all external collaborators.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    embedder_url: Url,
    renderer_url: Url,
    search: SearchEngineConfig,
    timeout: Duration,
    dimensions: Dimensions,
}

impl ServiceConfig {
    /// Builds a configuration from already-validated parts.
    pub fn new(
        embedder_url: Url,
        renderer_url: Url,
        search: SearchEngineConfig,
        timeout: Duration,
        dimensions: Dimensions,
    ) -> Self {
        Self {
            embedder_url,
            renderer_url,
            search,
            timeout,
            dimensions,
        }
    }

    /// Base URL of the embedding service.
    pub fn embedder_url(&self) -> &Url {
        &self.embedder_url
    }

    /// Base URL of the renderer service.
    pub fn renderer_url(&self) -> &Url {
        &self.renderer_url
    }

    /// Search-engine connection details.
    pub fn search(&self) -> &SearchEngineConfig {
        &self.search
    }

    /// Timeout applied to every outbound call.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Embedding dimensionalities.
    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }
}

/// Command-line arguments shared by binaries that talk to external services.
#[derive(Args, Debug, Clone)]
pub struct ServiceArgs {
    /// Base URL of the embedding service
    #[arg(long, env = "EMBEDDING_SERVICE_URL", default_value = "http://localhost:8000")]
    pub embedder_url: String,

    /// Base URL of the icon renderer service
    #[arg(long, env = "ICON_RENDERER_URL", default_value = "http://localhost:3002")]
    pub renderer_url: String,

    /// Search-engine endpoint
    #[arg(long, env = "ELASTICSEARCH_ENDPOINT", default_value = "http://localhost:9200")]
    pub search_endpoint: String,

    /// Search-engine API key
    #[arg(long, env = "ELASTICSEARCH_API_KEY")]
    pub search_api_key: Option<String>,

    /// Index holding icon documents
    #[arg(long, env = "ICONSEARCH_INDEX", default_value = DEFAULT_INDEX)]
    pub index: String,

    /// Seconds before any outbound request times out
    #[arg(long, env = "ICONSEARCH_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Image embedding dimensionality
    #[arg(long, env = "ICONSEARCH_IMAGE_DIMS", default_value_t = DEFAULT_IMAGE_DIMS)]
    pub image_dims: usize,

    /// Text embedding dimensionality
    #[arg(long, env = "ICONSEARCH_TEXT_DIMS", default_value_t = DEFAULT_TEXT_DIMS)]
    pub text_dims: usize,
}

impl ServiceArgs {
    /// Validates the arguments and converts them into a `ServiceConfig`.
    pub fn build_config(&self) -> Result<ServiceConfig> {
        anyhow::ensure!(!self.index.trim().is_empty(), "index name is required");
        anyhow::ensure!(
            self.image_dims > 0 && self.text_dims > 0,
            "embedding dimensions must be positive"
        );
        let search = SearchEngineConfig {
            endpoint: parse_base_url(&self.search_endpoint, "search endpoint")?,
            api_key: self
                .search_api_key
                .as_deref()
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string),
            index: self.index.trim().to_string(),
        };
        Ok(ServiceConfig::new(
            parse_base_url(&self.embedder_url, "embedder URL")?,
            parse_base_url(&self.renderer_url, "renderer URL")?,
            search,
            Duration::from_secs(self.timeout_secs.max(1)),
            Dimensions {
                image: self.image_dims,
                text: self.text_dims,
            },
        ))
    }
}

/// Parses an http(s) base URL, normalizing away any trailing slash.
pub fn parse_base_url(raw: &str, what: &str) -> Result<Url> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = Url::parse(trimmed).with_context(|| format!("invalid {what}: {raw}"))?;
    anyhow::ensure!(
        matches!(url.scheme(), "http" | "https"),
        "{what} must be an http(s) URL"
    );
    Ok(url)
}

/// Appends `segment` to the path of `base` (`http://h/api` + `embed` = `http://h/api/embed`).
pub fn join_path(base: &Url, segment: &str) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty();
        for part in segment.split('/').filter(|part| !part.is_empty()) {
            segments.push(part);
        }
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        service: ServiceArgs,
    }

    #[test]
    fn builds_config_from_flags() {
        let harness = Harness::parse_from([
            "test",
            "--embedder-url",
            "http://embed.local:8000/",
            "--search-api-key",
            "  secret ",
            "--timeout-secs",
            "0",
        ]);
        let config = harness.service.build_config().expect("valid config");
        assert_eq!(config.embedder_url().as_str(), "http://embed.local:8000/");
        assert_eq!(config.search().api_key.as_deref(), Some("secret"));
        assert_eq!(config.timeout(), Duration::from_secs(1));
        assert_eq!(config.dimensions(), Dimensions::default());
    }

    #[test]
    fn rejects_non_http_urls() {
        let harness = Harness::parse_from(["test", "--renderer-url", "ftp://renderer"]);
        assert!(harness.service.build_config().is_err());
    }

    #[test]
    fn join_path_keeps_base_prefix() {
        let base = parse_base_url("http://host:9200/proxy/", "test").unwrap();
        assert_eq!(
            join_path(&base, "icons/_search").as_str(),
            "http://host:9200/proxy/icons/_search"
        );
        let root = parse_base_url("http://host:8000", "test").unwrap();
        assert_eq!(join_path(&root, "embed-svg").as_str(), "http://host:8000/embed-svg");
    }
}
