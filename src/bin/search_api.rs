use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use iconsearch::embedder::SvgEmbedding;
use iconsearch::query::{SearchRequest, SearchResults};
use iconsearch::{logging, ElasticStore, HttpEmbedder, HybridSearcher, ServiceArgs};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "iconsearch-api",
    about = "HTTP API for hybrid icon search by text, image, or SVG"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "ICONSEARCH_BIND", default_value = "127.0.0.1:3001")]
    bind: String,

    /// Max cached text embeddings kept in-memory (0 disables caching).
    #[arg(long, default_value_t = 1024)]
    embedding_cache_size: usize,

    /// SVG embedding route: `local` or `service`.
    #[arg(long, default_value = "local")]
    svg_route: SvgEmbedding,

    /// Log at debug level.
    #[arg(long, short, default_value_t = false)]
    verbose: bool,

    #[command(flatten)]
    service: ServiceArgs,
}

#[derive(Clone)]
struct AppState {
    searcher: Arc<HybridSearcher>,
}

#[derive(Debug, Serialize)]
struct SearchResponseBody {
    #[serde(flatten)]
    results: SearchResults,
    latency_ms: f64,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ApiCli::parse();
    logging::init(cli.verbose);
    let config = cli.service.build_config()?;
    let embedder = Arc::new(HttpEmbedder::from_config(&config)?);
    let store = Arc::new(ElasticStore::from_config(&config)?);
    let searcher = HybridSearcher::new(embedder, store, config.dimensions())
        .with_text_cache(cli.embedding_cache_size)
        .with_svg_embedding(cli.svg_route);
    let state = AppState {
        searcher: Arc::new(searcher),
    };
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/search", post(search_handler))
        .with_state(state);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    info!(%addr, "iconsearch-api listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn search_handler(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponseBody>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let start = Instant::now();
    let searcher = state.searcher.clone();
    let kind = request.kind;
    let results = tokio::task::spawn_blocking(move || searcher.search(&request))
        .await
        .map_err(|err| internal_error(format!("search task join error: {err}")))?
        .map_err(|err| {
            if err.is_bad_input() {
                bad_request(err.to_string())
            } else {
                warn!(%kind, error = %err, "search failed");
                bad_gateway(err.to_string())
            }
        })?;
    Ok(Json(SearchResponseBody {
        results,
        latency_ms: start.elapsed().as_secs_f64() * 1000.0,
    }))
}

fn bad_request(message: impl Into<String>) -> ApiError {
    error_response(StatusCode::BAD_REQUEST, message)
}

fn bad_gateway(message: impl Into<String>) -> ApiError {
    error_response(StatusCode::BAD_GATEWAY, message)
}

fn internal_error(message: impl Into<String>) -> ApiError {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, message)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}
