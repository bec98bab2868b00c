//! Batch Indexer: render, normalize, embed, and upsert every matched icon for one release.
//!
//! A run moves through `CheckVersion -> (Skip | Process) -> RecordVersion`. Per-icon step
//! failures are collected, never raised: an icon's document is written with whatever fields
//! succeeded, and the version marker only advances when every icon came through clean.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::bounded;
use tracing::{debug, info, warn};

use crate::completeness::is_complete;
use crate::config::Dimensions;
use crate::document::{
    DocumentId, EmbeddingField, IconRecord, RunScope, Variant, DEFAULT_TOKEN_TYPE,
};
use crate::embedder::{embed_svg_markup, Embedder, SvgEmbedding};
use crate::error::{Error, Result};
use crate::manifest::{ManifestSnapshot, MatchedIcon};
use crate::normalizer::Normalizer;
use crate::renderer::IconRenderer;
use crate::store::DocumentStore;
use crate::version::{check_version, GateDecision, VersionMarker};

/// Renderer size requested for plain-icon rasters.
pub const DEFAULT_ICON_SIZE: &str = "xxl";

/// Knobs for one batch run.
#[derive(Debug, Clone)]
pub struct IndexerOptions {
    /// Variants produced (and required for completeness).
    pub scope: RunScope,
    /// Skip the version gate.
    pub force: bool,
    /// Write documents and the marker. `false` is a dry run.
    pub write: bool,
    /// Process at most this many matched icons.
    pub limit: Option<usize>,
    /// Renderer size for plain icons. `None` uses the service default.
    pub icon_size: Option<String>,
    /// Directory receiving rendered PNGs as `<release>/<icon>_<variant>.png`.
    pub save_images: Option<PathBuf>,
    /// Skip steps whose field is already stored for this release.
    pub incremental: bool,
    /// Icons processed concurrently. `1` is strictly sequential.
    pub workers: usize,
    /// SVG embedding route.
    pub svg_embedding: SvgEmbedding,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        Self {
            scope: RunScope::IconsAndTokens,
            force: false,
            write: true,
            limit: None,
            icon_size: Some(DEFAULT_ICON_SIZE.to_string()),
            save_images: None,
            incremental: false,
            workers: 1,
            svg_embedding: SvgEmbedding::default(),
        }
    }
}

/// Per-icon sub-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Reading the source SVG file.
    ReadSource,
    /// Producing one embedding field.
    Embed(EmbeddingField),
    /// Upserting the document.
    Write,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::ReadSource => f.write_str("read source"),
            Step::Embed(field) => write!(f, "{field}"),
            Step::Write => f.write_str("write"),
        }
    }
}

/// A failed sub-step.
#[derive(Debug)]
pub struct StepError {
    /// Which step failed.
    pub step: Step,
    /// Why.
    pub error: Error,
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.error)
    }
}

/// What happened to one icon.
#[derive(Debug)]
pub struct IconOutcome {
    /// Logical icon name.
    pub icon_name: String,
    /// Document key.
    pub doc_id: DocumentId,
    /// Fields produced in this run.
    pub embedded: Vec<EmbeddingField>,
    /// Failed steps.
    pub errors: Vec<StepError>,
    /// The document was upserted.
    pub written: bool,
    /// Incremental mode found nothing to do.
    pub up_to_date: bool,
}

impl IconOutcome {
    fn new(icon: &MatchedIcon, release_tag: &str) -> Self {
        Self {
            icon_name: icon.icon_name.clone(),
            doc_id: DocumentId::new(&icon.icon_name, release_tag),
            embedded: Vec::new(),
            errors: Vec::new(),
            written: false,
            up_to_date: false,
        }
    }

    /// No step failed.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    fn fail(&mut self, step: Step, error: Error) {
        warn!(icon = %self.icon_name, step = %step, error = %error, "step failed");
        self.errors.push(StepError { step, error });
    }
}

/// Results of the `Process` phase.
#[derive(Debug)]
pub struct RunReport {
    /// Release processed.
    pub release_tag: String,
    /// One entry per processed icon, in manifest order.
    pub outcomes: Vec<IconOutcome>,
    /// Documents were written (not a dry run).
    pub wrote: bool,
}

impl RunReport {
    /// Icons with no failed step.
    pub fn successful(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Icons with at least one failed step.
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.successful()
    }

    /// Documents upserted.
    pub fn written(&self) -> usize {
        self.outcomes.iter().filter(|o| o.written).count()
    }

    /// Icons with failures.
    pub fn failures(&self) -> impl Iterator<Item = &IconOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// The marker may advance: documents were written, at least one icon, no failures.
    pub fn may_record_version(&self) -> bool {
        self.wrote && self.failed() == 0 && self.successful() > 0
    }

    /// Process exit status: non-zero when any icon failed.
    pub fn exit_code(&self) -> u8 {
        u8::from(self.failed() > 0)
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The version gate found the release fully indexed.
    Skipped {
        /// Release that was already complete.
        release_tag: String,
    },
    /// Icons were processed.
    Completed {
        /// Per-icon results.
        report: RunReport,
        /// The marker now names this release.
        recorded: bool,
    },
}

impl RunOutcome {
    /// Process exit status.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Skipped { .. } => 0,
            RunOutcome::Completed { report, .. } => report.exit_code(),
        }
    }
}

/// Drives the per-icon pipeline against injected collaborators.
pub struct Indexer<'a> {
    renderer: &'a dyn IconRenderer,
    embedder: &'a dyn Embedder,
    store: &'a dyn DocumentStore,
    normalizer: Normalizer,
    dims: Dimensions,
    options: IndexerOptions,
}

impl<'a> Indexer<'a> {
    /// Builds an indexer with the default normalizer.
    pub fn new(
        renderer: &'a dyn IconRenderer,
        embedder: &'a dyn Embedder,
        store: &'a dyn DocumentStore,
        dims: Dimensions,
        options: IndexerOptions,
    ) -> Self {
        Self {
            renderer,
            embedder,
            store,
            normalizer: Normalizer::default(),
            dims,
            options,
        }
    }

    /// Replaces the normalizer.
    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Active options.
    pub fn options(&self) -> &IndexerOptions {
        &self.options
    }

    /// Full run: gate, process, and record the marker when the run was clean.
    pub fn run(&self, snapshot: &ManifestSnapshot, marker: &VersionMarker) -> Result<RunOutcome> {
        let release_tag = snapshot.release_tag.as_str();
        let stored = marker.read();
        let decision = check_version(stored.as_deref(), release_tag, self.options.force, || {
            is_complete(self.store, snapshot.icons(), release_tag, self.options.scope)
        });
        match decision {
            GateDecision::Skip => {
                info!(release_tag, "release already fully indexed; use --force to re-index");
                return Ok(RunOutcome::Skipped {
                    release_tag: release_tag.to_string(),
                });
            }
            GateDecision::Process(reason) => info!(release_tag, ?reason, "processing release"),
        }

        let icons = match self.options.limit {
            Some(limit) => &snapshot.icons()[..limit.min(snapshot.icons().len())],
            None => snapshot.icons(),
        };
        let report = self.process_all(release_tag, icons);

        let recorded = report.may_record_version();
        if recorded {
            marker.write(release_tag)?;
        } else if report.wrote {
            warn!(
                release_tag,
                failed = report.failed(),
                "version marker not advanced; next run will retry"
            );
        }
        Ok(RunOutcome::Completed { report, recorded })
    }

    /// Processes `icons` and collects their outcomes in input order.
    pub fn process_all(&self, release_tag: &str, icons: &[MatchedIcon]) -> RunReport {
        let workers = self.options.workers.max(1).min(icons.len().max(1));
        info!(icons = icons.len(), workers, release_tag, "processing icons");
        let outcomes = if workers == 1 {
            icons
                .iter()
                .enumerate()
                .map(|(position, icon)| {
                    let outcome = self.process_icon(icon, release_tag);
                    log_progress(position + 1, icons.len(), &outcome);
                    outcome
                })
                .collect()
        } else {
            self.process_parallel(release_tag, icons, workers)
        };
        RunReport {
            release_tag: release_tag.to_string(),
            outcomes,
            wrote: self.options.write,
        }
    }

    fn process_parallel(
        &self,
        release_tag: &str,
        icons: &[MatchedIcon],
        workers: usize,
    ) -> Vec<IconOutcome> {
        let (task_tx, task_rx) = bounded::<(usize, &MatchedIcon)>(workers * 2);
        let (result_tx, result_rx) = bounded::<(usize, IconOutcome)>(workers * 2);
        thread::scope(|scope| {
            for _ in 0..workers {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    for (position, icon) in task_rx {
                        let outcome = self.process_icon(icon, release_tag);
                        if result_tx.send((position, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(task_rx);
            drop(result_tx);

            scope.spawn(move || {
                for task in icons.iter().enumerate() {
                    if task_tx.send(task).is_err() {
                        break;
                    }
                }
            });

            let mut pending: BTreeMap<usize, IconOutcome> = BTreeMap::new();
            let mut ordered = Vec::with_capacity(icons.len());
            for (position, outcome) in result_rx {
                pending.insert(position, outcome);
                while let Some(outcome) = pending.remove(&ordered.len()) {
                    log_progress(ordered.len() + 1, icons.len(), &outcome);
                    ordered.push(outcome);
                }
            }
            ordered.extend(pending.into_values());
            ordered
        })
    }

    /// Runs every sub-step for one icon and upserts the accumulated document once.
    pub fn process_icon(&self, icon: &MatchedIcon, release_tag: &str) -> IconOutcome {
        let mut outcome = IconOutcome::new(icon, release_tag);
        let svg_content = match fs::read_to_string(&icon.svg_path) {
            Ok(content) => content,
            Err(err) => {
                outcome.fail(Step::ReadSource, err.into());
                return outcome;
            }
        };

        let existing = if self.options.incremental {
            self.existing_fields(&outcome.doc_id, release_tag)
        } else {
            Vec::new()
        };
        let needed: Vec<EmbeddingField> = self
            .options
            .scope
            .required_fields()
            .iter()
            .copied()
            .filter(|field| !existing.contains(field))
            .collect();
        if needed.is_empty() {
            debug!(icon = %icon.icon_name, "already complete");
            outcome.up_to_date = true;
            return outcome;
        }

        let mut record = IconRecord::new(&outcome.doc_id, &icon.filename, svg_content.as_str());
        for field in needed {
            let produced = self.produce(field, icon, release_tag, &svg_content, &mut record);
            match produced.and_then(|vector| record.set_embedding(field, vector, self.dims)) {
                Ok(()) => outcome.embedded.push(field),
                Err(err) => outcome.fail(Step::Embed(field), err),
            }
        }
        if self.options.scope.includes_tokens() {
            record.token_type = Some(DEFAULT_TOKEN_TYPE.to_string());
        }

        if self.options.write {
            match self.store.upsert(&outcome.doc_id, &record) {
                Ok(()) => outcome.written = true,
                Err(err) => outcome.fail(Step::Write, err),
            }
        }
        outcome
    }

    fn produce(
        &self,
        field: EmbeddingField,
        icon: &MatchedIcon,
        release_tag: &str,
        svg_content: &str,
        record: &mut IconRecord,
    ) -> Result<Vec<f32>> {
        let name = icon.icon_name.as_str();
        match field {
            EmbeddingField::IconImage => {
                let png = self.renderer.render_image(
                    name,
                    Variant::Icon,
                    self.options.icon_size.as_deref(),
                )?;
                self.save_image(release_tag, name, Variant::Icon, &png);
                self.embedder.embed_image(&png)
            }
            EmbeddingField::IconSvg => self.embed_svg(svg_content),
            EmbeddingField::TokenImage => {
                let png = self.renderer.render_image(name, Variant::Token, None)?;
                self.save_image(release_tag, name, Variant::Token, &png);
                self.embedder.embed_image(&png)
            }
            EmbeddingField::TokenSvg => {
                let markup = self.renderer.render_svg_element(name, Variant::Token, None)?;
                record.token_svg_content = Some(markup.clone());
                self.embed_svg(&markup)
            }
        }
    }

    fn embed_svg(&self, markup: &str) -> Result<Vec<f32>> {
        embed_svg_markup(self.embedder, &self.normalizer, self.options.svg_embedding, markup)
    }

    fn existing_fields(&self, id: &DocumentId, release_tag: &str) -> Vec<EmbeddingField> {
        match self.store.fetch(id) {
            Ok(Some(record)) if record.release_tag == release_tag => record.populated_fields(),
            Ok(_) => Vec::new(),
            Err(err) => {
                warn!(doc_id = %id, error = %err, "could not read existing document; recomputing all fields");
                Vec::new()
            }
        }
    }

    fn save_image(&self, release_tag: &str, icon: &str, variant: Variant, png: &[u8]) {
        let Some(dir) = self.options.save_images.as_deref() else {
            return;
        };
        let path = rendered_image_path(dir, release_tag, icon, variant);
        let written = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::write(&path, png));
        match written {
            Ok(()) => debug!(path = %path.display(), "saved rendered image"),
            Err(err) => warn!(path = %path.display(), error = %err, "could not save rendered image"),
        }
    }
}

/// `<dir>/<release>/<icon>_<variant>.png`
pub fn rendered_image_path(dir: &Path, release_tag: &str, icon: &str, variant: Variant) -> PathBuf {
    dir.join(release_tag).join(format!("{icon}_{variant}.png"))
}

fn log_progress(done: usize, total: usize, outcome: &IconOutcome) {
    if outcome.is_success() {
        info!(
            progress = %format!("{done}/{total}"),
            icon = %outcome.icon_name,
            fields = outcome.embedded.len(),
            written = outcome.written,
            "icon processed"
        );
    } else {
        warn!(
            progress = %format!("{done}/{total}"),
            icon = %outcome.icon_name,
            errors = outcome.errors.len(),
            "icon processed with errors"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::SparseEmbedding;
    use crate::store::SearchResponse;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const DIMS: Dimensions = Dimensions { image: 2, text: 2 };

    struct StubRenderer {
        fail_token_svg: bool,
    }

    impl IconRenderer for StubRenderer {
        fn render_image(&self, icon: &str, _: Variant, _: Option<&str>) -> Result<Vec<u8>> {
            Ok(format!("png:{icon}").into_bytes())
        }

        fn render_svg(&self, icon: &str, _: Variant, _: Option<&str>) -> Result<String> {
            if self.fail_token_svg {
                return Err(Error::render(icon, "503"));
            }
            Ok(r#"<span><svg viewBox="0 0 16 16"><path d="M0 0h8v8z"/></svg></span>"#.into())
        }
    }

    struct StubEmbedder;

    impl Embedder for StubEmbedder {
        fn embed_text(&self, _: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0, 1.0])
        }

        fn expand_sparse(&self, _: &str) -> Result<SparseEmbedding> {
            Ok(SparseEmbedding::new())
        }

        fn embed_image(&self, _: &[u8]) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }

        fn embed_svg(&self, markup: &str) -> Result<Vec<f32>> {
            assert!(markup.contains(r#"fill="white""#), "markup must be canonical");
            Ok(vec![0.5, 0.5])
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        docs: Mutex<HashMap<String, IconRecord>>,
    }

    impl DocumentStore for RecordingStore {
        fn fetch(&self, id: &DocumentId) -> Result<Option<IconRecord>> {
            Ok(self.docs.lock().unwrap().get(&id.to_string()).cloned())
        }

        fn upsert(&self, id: &DocumentId, record: &IconRecord) -> Result<()> {
            self.docs.lock().unwrap().insert(id.to_string(), record.clone());
            Ok(())
        }

        fn search(&self, _: &Value) -> Result<SearchResponse> {
            unreachable!()
        }

        fn count(&self, _: &Value) -> Result<u64> {
            unreachable!()
        }
    }

    fn icons(root: &Path, names: &[&str]) -> Vec<MatchedIcon> {
        names
            .iter()
            .map(|name| {
                let svg_path = root.join(format!("{name}.svg"));
                fs::write(&svg_path, r#"<svg viewBox="0 0 24 24"><path d="M4 4h16v16H4z"/></svg>"#)
                    .unwrap();
                MatchedIcon {
                    icon_name: name.to_string(),
                    filename: name.to_string(),
                    svg_path,
                }
            })
            .collect()
    }

    #[test]
    fn partial_failure_still_writes_document() {
        let temp = TempDir::new().unwrap();
        let renderer = StubRenderer { fail_token_svg: true };
        let store = RecordingStore::default();
        let options = IndexerOptions {
            svg_embedding: SvgEmbedding::Service,
            ..IndexerOptions::default()
        };
        let indexer = Indexer::new(&renderer, &StubEmbedder, &store, DIMS, options);
        let outcome = indexer.process_icon(&icons(temp.path(), &["search"])[0], "v1.0.0");

        assert_eq!(
            outcome.embedded,
            vec![EmbeddingField::IconImage, EmbeddingField::IconSvg, EmbeddingField::TokenImage]
        );
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].step, Step::Embed(EmbeddingField::TokenSvg));
        assert!(outcome.written);

        let stored = store.docs.lock().unwrap()["search_v1.0.0"].clone();
        assert_eq!(stored.token_svg_embedding, None);
        assert_eq!(stored.icon_svg_embedding, Some(vec![0.5, 0.5]));
        assert_eq!(stored.token_type.as_deref(), Some("string"));
    }

    #[test]
    fn token_svg_is_extracted_and_stored() {
        let temp = TempDir::new().unwrap();
        let renderer = StubRenderer { fail_token_svg: false };
        let store = RecordingStore::default();
        let indexer = Indexer::new(&renderer, &StubEmbedder, &store, DIMS, IndexerOptions::default());
        let outcome = indexer.process_icon(&icons(temp.path(), &["search"])[0], "v1.0.0");
        assert!(outcome.is_success(), "{:?}", outcome.errors);
        let stored = store.docs.lock().unwrap()["search_v1.0.0"].clone();
        assert_eq!(
            stored.token_svg_content.as_deref(),
            Some(r#"<svg viewBox="0 0 16 16"><path d="M0 0h8v8z"/></svg>"#)
        );
        assert_eq!(stored.populated_fields(), EmbeddingField::ALL.to_vec());
    }

    #[test]
    fn dimension_mismatch_is_a_step_error() {
        let temp = TempDir::new().unwrap();
        let renderer = StubRenderer { fail_token_svg: false };
        let store = RecordingStore::default();
        let dims = Dimensions { image: 3, text: 2 };
        let options = IndexerOptions {
            scope: RunScope::IconsOnly,
            ..IndexerOptions::default()
        };
        let indexer = Indexer::new(&renderer, &StubEmbedder, &store, dims, options);
        let outcome = indexer.process_icon(&icons(temp.path(), &["x"])[0], "v1.0.0");
        assert_eq!(outcome.errors.len(), 2);
        assert!(matches!(outcome.errors[0].error, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn dry_run_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let renderer = StubRenderer { fail_token_svg: false };
        let store = RecordingStore::default();
        let options = IndexerOptions {
            write: false,
            ..IndexerOptions::default()
        };
        let indexer = Indexer::new(&renderer, &StubEmbedder, &store, DIMS, options);
        let report = indexer.process_all("v1.0.0", &icons(temp.path(), &["a", "b"]));
        assert_eq!(report.successful(), 2);
        assert_eq!(report.written(), 0);
        assert!(!report.may_record_version());
        assert!(store.docs.lock().unwrap().is_empty());
    }

    #[test]
    fn parallel_run_preserves_manifest_order() {
        let temp = TempDir::new().unwrap();
        let renderer = StubRenderer { fail_token_svg: false };
        let store = RecordingStore::default();
        let options = IndexerOptions {
            workers: 3,
            scope: RunScope::IconsOnly,
            ..IndexerOptions::default()
        };
        let indexer = Indexer::new(&renderer, &StubEmbedder, &store, DIMS, options);
        let names = ["a", "b", "c", "d", "e", "f", "g"];
        let report = indexer.process_all("v1.0.0", &icons(temp.path(), &names));
        let order: Vec<&str> = report.outcomes.iter().map(|o| o.icon_name.as_str()).collect();
        assert_eq!(order, names.to_vec());
        assert_eq!(store.docs.lock().unwrap().len(), names.len());
    }

    #[test]
    fn incremental_skips_present_fields() {
        let temp = TempDir::new().unwrap();
        let renderer = StubRenderer { fail_token_svg: true };
        let store = RecordingStore::default();
        let list = icons(temp.path(), &["search"]);
        let mut existing = IconRecord::new(&DocumentId::new("search", "v1.0.0"), "search", "<svg/>");
        existing.token_svg_embedding = Some(vec![0.1, 0.2]);
        store.upsert(&existing.id(), &existing).unwrap();

        let options = IndexerOptions {
            incremental: true,
            ..IndexerOptions::default()
        };
        let indexer = Indexer::new(&renderer, &StubEmbedder, &store, DIMS, options);
        let outcome = indexer.process_icon(&list[0], "v1.0.0");
        assert!(outcome.is_success(), "token svg step should have been skipped");
        assert_eq!(outcome.embedded.len(), 3);
    }

    #[test]
    fn saves_rendered_images() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("images");
        let renderer = StubRenderer { fail_token_svg: false };
        let store = RecordingStore::default();
        let options = IndexerOptions {
            save_images: Some(out.clone()),
            ..IndexerOptions::default()
        };
        let indexer = Indexer::new(&renderer, &StubEmbedder, &store, DIMS, options);
        indexer.process_icon(&icons(temp.path(), &["search"])[0], "v1.0.0");
        let icon_png = rendered_image_path(&out, "v1.0.0", "search", Variant::Icon);
        assert_eq!(fs::read(icon_png).unwrap(), b"png:search".to_vec());
        assert!(rendered_image_path(&out, "v1.0.0", "search", Variant::Token).exists());
    }

    #[test]
    fn missing_source_file_fails_without_write() {
        let temp = TempDir::new().unwrap();
        let renderer = StubRenderer { fail_token_svg: false };
        let store = RecordingStore::default();
        let indexer = Indexer::new(&renderer, &StubEmbedder, &store, DIMS, IndexerOptions::default());
        let icon = MatchedIcon {
            icon_name: "ghost".into(),
            filename: "ghost".into(),
            svg_path: temp.path().join("ghost.svg"),
        };
        let outcome = indexer.process_icon(&icon, "v1.0.0");
        assert_eq!(outcome.errors[0].step, Step::ReadSource);
        assert!(!outcome.written);
    }
}
