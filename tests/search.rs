mod common;

use std::io::Cursor;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use common::{FakeEmbedder, FakeStore, DIMS};
use iconsearch::query::{QueryKind, SearchRequest};
use iconsearch::{HybridSearcher, Normalizer, SvgEmbedding, Variant};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use pretty_assertions::assert_eq;
use serde_json::json;

fn canned_hits() -> serde_json::Value {
    json!({
        "took": 3,
        "hits": {
            "total": { "value": 42, "relation": "eq" },
            "hits": [
                { "_id": "search_v109.0.0", "_score": 0.93,
                  "_source": { "icon_name": "search", "release_tag": "v109.0.0", "icon_type": "icon" } },
                { "_id": "magnify_v109.0.0", "_score": 0.71,
                  "_source": { "icon_name": "magnify", "descriptions": ["magnifying glass"] } }
            ]
        }
    })
}

fn searcher(embedder: FakeEmbedder) -> (HybridSearcher, Arc<FakeEmbedder>, Arc<FakeStore>) {
    let embedder = Arc::new(embedder);
    let store = Arc::new(FakeStore::default());
    *store.canned.lock().unwrap() = Some(canned_hits());
    let searcher = HybridSearcher::new(embedder.clone(), store.clone(), DIMS);
    (searcher, embedder, store)
}

#[test]
fn text_search_survives_sparse_failure() {
    let (searcher, _, store) = searcher(FakeEmbedder {
        sparse_fails: true,
        ..FakeEmbedder::default()
    });
    let results = searcher
        .search(&SearchRequest::new(QueryKind::Text, "magnifying glass"))
        .unwrap();

    assert_eq!(results.total, 42);
    let names: Vec<&str> = results.results.iter().map(|r| r.icon_name.as_str()).collect();
    assert_eq!(names, vec!["search", "magnify"]);
    assert_eq!(results.results[1].descriptions, Some(vec!["magnifying glass".to_string()]));

    let body = store.last_search();
    assert!(body.get("query").is_none());
    assert_eq!(body["knn"]["field"], json!("text_embedding"));
}

#[test]
fn text_search_is_hybrid_when_sparse_succeeds() {
    let (searcher, _, store) = searcher(FakeEmbedder::default());
    let mut request = SearchRequest::new(QueryKind::Text, "arrow down");
    request.icon_type = Some(Variant::Token);
    searcher.search(&request).unwrap();

    let body = store.last_search();
    assert_eq!(
        body["query"]["bool"]["should"][0]["sparse_vector"]["query_vector"],
        json!({ "arrow": 1.0, "down": 1.0 })
    );
    assert_eq!(body["query"]["bool"]["filter"][0], json!({ "term": { "icon_type": "token" } }));
    assert_eq!(body["knn"]["filter"], json!({ "term": { "icon_type": "token" } }));
}

#[test]
fn text_embeddings_are_cached() {
    let (searcher, embedder, _) = searcher(FakeEmbedder::default());
    let searcher = searcher.with_text_cache(8);
    let request = SearchRequest::new(QueryKind::Text, "alert");
    searcher.search(&request).unwrap();
    assert_eq!(embedder.calls(), 2);
    searcher.search(&request).unwrap();
    assert_eq!(embedder.calls(), 2);
}

#[test]
fn cached_text_retries_only_a_failed_expansion() {
    let (searcher, embedder, store) = searcher(FakeEmbedder {
        sparse_fails: true,
        ..FakeEmbedder::default()
    });
    let searcher = searcher.with_text_cache(8);
    let request = SearchRequest::new(QueryKind::Text, "alert");
    searcher.search(&request).unwrap();
    searcher.search(&request).unwrap();
    // dense + sparse, then the sparse retry alone
    assert_eq!(embedder.calls(), 3);
    assert!(store.last_search().get("query").is_none());
}

#[test]
fn screenshot_query_is_canonicalized_before_embedding() {
    let (searcher, embedder, store) = searcher(FakeEmbedder::default());
    let mut screenshot = RgbImage::from_pixel(40, 30, Rgb([20, 20, 20]));
    for x in 10..30 {
        for y in 10..20 {
            screenshot.put_pixel(x, y, Rgb([230, 230, 230]));
        }
    }
    let mut png = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(screenshot)
        .write_to(&mut png, ImageFormat::Png)
        .unwrap();
    let payload = format!("data:image/png;base64,{}", STANDARD.encode(png.into_inner()));

    let mut request = SearchRequest::new(QueryKind::Image, payload);
    request.icon_type = Some(Variant::Icon);
    searcher.search(&request).unwrap();

    let sent = embedder.last_image.lock().unwrap().clone().unwrap();
    let canonical = image::load_from_memory(&sent).unwrap().to_rgb8();
    assert_eq!(canonical.dimensions(), (224, 224));
    assert_eq!(canonical.get_pixel(0, 0), &Rgb([255, 255, 255]));
    assert_eq!(canonical.get_pixel(112, 112), &Rgb([0, 0, 0]));

    let clauses = store.last_search()["knn"].as_array().cloned().unwrap();
    let fields: Vec<&str> = clauses.iter().map(|c| c["field"].as_str().unwrap()).collect();
    assert_eq!(fields, vec!["icon_image_embedding", "icon_svg_embedding"]);
}

#[test]
fn svg_query_uses_explicit_field() {
    let (searcher, _, store) = searcher(FakeEmbedder::default());
    let searcher = searcher.with_svg_embedding(SvgEmbedding::Service);
    let mut request = SearchRequest::new(
        QueryKind::Svg,
        r#"<svg viewBox="0 0 24 24"><path d="M0 0 L24 24"/></svg>"#,
    );
    request.fields = Some(vec!["token_svg_embedding".to_string()]);
    searcher.search(&request).unwrap();
    assert_eq!(store.last_search()["knn"]["field"], json!("token_svg_embedding"));
}

#[test]
fn bad_input_is_distinguished_from_outage() {
    let (searcher, _, store) = searcher(FakeEmbedder::default());
    let err = searcher
        .search(&SearchRequest::new(QueryKind::Image, "not base64!"))
        .unwrap_err();
    assert!(err.is_bad_input());
    let err = searcher
        .search(&SearchRequest::new(QueryKind::Svg, "no markup here"))
        .unwrap_err();
    assert!(err.is_bad_input());
    assert!(searcher
        .search(&SearchRequest::new(QueryKind::Text, "   "))
        .unwrap_err()
        .is_bad_input());

    *store.canned.lock().unwrap() = None;
    let err = searcher
        .search(&SearchRequest::new(QueryKind::Text, "alert"))
        .unwrap_err();
    assert!(!err.is_bad_input());
}

#[test]
fn end_to_end_svg_canonicalization() {
    let normalizer = Normalizer::default();
    let canonical = normalizer
        .canonicalize_svg(r#"<svg viewBox="0 0 24 24"><path d="M0 0 L24 24"/></svg>"#)
        .unwrap();
    let root_end = canonical.find('>').unwrap() + 1;
    assert!(canonical[root_end..]
        .starts_with(r#"<rect x="0" y="0" width="24" height="24" fill="white"/>"#));
    assert!(canonical.contains(r#"<path fill="black" d="M0 0 L24 24"/>"#));
    let raster = normalizer.rasterize_svg(&canonical).unwrap();
    assert_eq!(raster.image.dimensions(), (224, 224));
}
