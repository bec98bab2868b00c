//! Renderer Client: turns a logical icon name into PNG bytes or SVG markup.

use std::time::Duration;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::config::{join_path, ServiceConfig};
use crate::document::Variant;
use crate::error::{Error, Result};
use crate::normalizer::extract_svg_fragment;

/// Remote component renderer.
pub trait IconRenderer: Send + Sync {
    /// PNG bytes of `icon` drawn as `variant`. `size` of `None` uses the service default.
    fn render_image(&self, icon: &str, variant: Variant, size: Option<&str>) -> Result<Vec<u8>>;

    /// Markup emitted for `icon` drawn as `variant`, possibly wrapped in extra elements.
    fn render_svg(&self, icon: &str, variant: Variant, size: Option<&str>) -> Result<String>;

    /// Bare `<svg>` element extracted from [`IconRenderer::render_svg`].
    fn render_svg_element(&self, icon: &str, variant: Variant, size: Option<&str>) -> Result<String> {
        let fragment = self.render_svg(icon, variant, size)?;
        Ok(extract_svg_fragment(&fragment)
            .unwrap_or(fragment.as_str())
            .to_string())
    }
}

/// Blocking client for the renderer's `/render-icon` and `/render-svg` endpoints.
#[derive(Clone)]
pub struct HttpRenderer {
    client: Client,
    image_url: Url,
    svg_url: Url,
}

impl HttpRenderer {
    /// Builds a client rooted at `base_url`.
    pub fn new(base_url: &Url, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build renderer HTTP client")?;
        Ok(Self {
            client,
            image_url: join_path(base_url, "render-icon"),
            svg_url: join_path(base_url, "render-svg"),
        })
    }

    /// Builds a client from the shared service configuration.
    pub fn from_config(config: &ServiceConfig) -> anyhow::Result<Self> {
        Self::new(config.renderer_url(), config.timeout())
    }

    fn call(&self, url: &Url, icon: &str, variant: Variant, size: Option<&str>) -> Result<RenderResponse> {
        let request = RenderRequest {
            icon_name: icon,
            component_type: variant,
            size,
        };
        debug!(icon, %variant, size = size.unwrap_or("default"), "render request");
        let response = self
            .client
            .post(url.clone())
            .json(&request)
            .send()
            .map_err(|err| Error::render(icon, format!("request failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Error::render(icon, format!("renderer answered {status}: {body}")));
        }
        let parsed: RenderResponse = response
            .json()
            .map_err(|err| Error::render(icon, format!("unparseable response: {err}")))?;
        if let Some(returned) = parsed.component_type.as_deref() {
            if returned != variant.as_str() {
                warn!(icon, requested = %variant, returned, "renderer returned a different component type");
            }
        }
        Ok(parsed)
    }
}

impl IconRenderer for HttpRenderer {
    fn render_image(&self, icon: &str, variant: Variant, size: Option<&str>) -> Result<Vec<u8>> {
        let encoded = self
            .call(&self.image_url, icon, variant, size)?
            .image
            .filter(|image| !image.is_empty())
            .ok_or_else(|| Error::render(icon, "response has no image"))?;
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|err| Error::render(icon, format!("image is not base64: {err}")))?;
        if bytes.is_empty() {
            return Err(Error::render(icon, "image decoded to zero bytes"));
        }
        Ok(bytes)
    }

    fn render_svg(&self, icon: &str, variant: Variant, size: Option<&str>) -> Result<String> {
        self.call(&self.svg_url, icon, variant, size)?
            .svg_content
            .filter(|svg| !svg.trim().is_empty())
            .ok_or_else(|| Error::render(icon, "response has no svgContent"))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderRequest<'a> {
    icon_name: &'a str,
    component_type: Variant,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenderResponse {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    svg_content: Option<String>,
    #[serde(default)]
    component_type: Option<String>,
}
