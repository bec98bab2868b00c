#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use iconsearch::embedder::SparseEmbedding;
use iconsearch::store::SearchResponse;
use iconsearch::{
    Dimensions, DocumentId, DocumentStore, Embedder, EmbeddingField, Error, IconRecord,
    IconRenderer, QueryError, Result, Variant,
};
use serde_json::Value;

pub const DIMS: Dimensions = Dimensions { image: 4, text: 3 };

pub const ICON_SVG: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 16 16"><path d="M2 2h12v12H2z"/></svg>"#;

/// Writes a registry and one SVG per icon under `root`.
pub fn write_upstream_tree(root: &Path, icons: &[(&str, &str)]) {
    let dir = root.join("src/components/icon");
    fs::create_dir_all(dir.join("assets")).unwrap();
    let mut map = String::from("export const typeToPathMap = {\n");
    for (icon, filename) in icons {
        map.push_str(&format!("  {icon}: '{filename}',\n"));
        fs::write(dir.join("assets").join(format!("{filename}.svg")), ICON_SVG).unwrap();
    }
    map.push_str("};\n");
    fs::write(dir.join("icon_map.ts"), map).unwrap();
}

#[derive(Default)]
pub struct FakeRenderer {
    pub calls: AtomicUsize,
    /// Icons whose token image render fails.
    pub failing_tokens: Mutex<Vec<String>>,
}

impl FakeRenderer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_token_for(&self, icon: &str) {
        self.failing_tokens.lock().unwrap().push(icon.to_string());
    }

    pub fn heal(&self) {
        self.failing_tokens.lock().unwrap().clear();
    }
}

impl IconRenderer for FakeRenderer {
    fn render_image(&self, icon: &str, variant: Variant, _: Option<&str>) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if variant == Variant::Token && self.failing_tokens.lock().unwrap().iter().any(|i| i == icon) {
            return Err(Error::Render {
                icon: icon.to_string(),
                reason: "renderer answered 500".to_string(),
            });
        }
        Ok(format!("{variant}:{icon}").into_bytes())
    }

    fn render_svg(&self, _: &str, _: Variant, _: Option<&str>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!(r#"<div class="euiToken">{ICON_SVG}</div>"#))
    }
}

#[derive(Default)]
pub struct FakeEmbedder {
    pub calls: AtomicUsize,
    pub sparse_fails: bool,
    pub last_image: Mutex<Option<Vec<u8>>>,
}

impl FakeEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for FakeEmbedder {
    fn embed_text(&self, _: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0.1; DIMS.text])
    }

    fn expand_sparse(&self, text: &str) -> Result<SparseEmbedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.sparse_fails {
            return Err(Error::Embed("sparse model not deployed".to_string()));
        }
        Ok(text.split_whitespace().map(|token| (token.to_string(), 1.0)).collect())
    }

    fn embed_image(&self, png: &[u8]) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_image.lock().unwrap() = Some(png.to_vec());
        Ok(vec![0.5; DIMS.image])
    }

    fn embed_svg(&self, _: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0.25; DIMS.image])
    }
}

/// In-memory store with partial-update semantics.
#[derive(Default)]
pub struct FakeStore {
    pub docs: Mutex<HashMap<String, IconRecord>>,
    pub searches: Mutex<Vec<Value>>,
    pub canned: Mutex<Option<Value>>,
}

impl FakeStore {
    pub fn doc(&self, id: &str) -> Option<IconRecord> {
        self.docs.lock().unwrap().get(id).cloned()
    }

    pub fn last_search(&self) -> Value {
        self.searches.lock().unwrap().last().cloned().expect("a search was issued")
    }
}

impl DocumentStore for FakeStore {
    fn fetch(&self, id: &DocumentId) -> Result<Option<IconRecord>> {
        Ok(self.doc(&id.to_string()))
    }

    fn upsert(&self, id: &DocumentId, record: &IconRecord) -> Result<()> {
        let mut docs = self.docs.lock().unwrap();
        let merged = match docs.remove(&id.to_string()) {
            Some(mut existing) => {
                for field in EmbeddingField::ALL {
                    if let Some(vector) = record.embedding(field) {
                        existing.set_embedding(field, vector.to_vec(), DIMS)?;
                    }
                }
                existing.token_svg_content = record
                    .token_svg_content
                    .clone()
                    .or(existing.token_svg_content);
                existing.token_type = record.token_type.clone().or(existing.token_type);
                existing
            }
            None => record.clone(),
        };
        docs.insert(id.to_string(), merged);
        Ok(())
    }

    fn search(&self, body: &Value) -> Result<SearchResponse> {
        self.searches.lock().unwrap().push(body.clone());
        match self.canned.lock().unwrap().clone() {
            Some(response) => SearchResponse::parse(response),
            None => Err(QueryError::Unavailable("no canned response".to_string()).into()),
        }
    }

    fn count(&self, _: &Value) -> Result<u64> {
        Ok(self.docs.lock().unwrap().len() as u64)
    }
}
