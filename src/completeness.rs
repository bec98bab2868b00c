//! Completeness Checker and per-field coverage audit.

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::document::{DocumentId, EmbeddingField, RunScope};
use crate::error::Result;
use crate::manifest::MatchedIcon;
use crate::store::DocumentStore;

/// True when every icon has a document for `release_tag` carrying every field `scope` requires.
///
/// Stops at the first gap. A read failure counts as a gap.
pub fn is_complete(
    store: &dyn DocumentStore,
    icons: &[MatchedIcon],
    release_tag: &str,
    scope: RunScope,
) -> bool {
    for icon in icons {
        let id = DocumentId::new(&icon.icon_name, release_tag);
        match store.fetch(&id) {
            Ok(Some(record)) if record.is_complete_for(release_tag, scope) => {}
            Ok(Some(record)) => {
                debug!(doc_id = %id, missing = ?record.missing_fields(scope), "document incomplete");
                return false;
            }
            Ok(None) => {
                debug!(doc_id = %id, "document missing");
                return false;
            }
            Err(err) => {
                warn!(doc_id = %id, error = %err, "completeness read failed; treating as incomplete");
                return false;
            }
        }
    }
    true
}

/// Document counts for one release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCoverage {
    /// Release audited.
    pub release_tag: String,
    /// Documents tagged with the release.
    pub documents: u64,
    /// Documents carrying each embedding field, in [`EmbeddingField::ALL`] order.
    pub fields: Vec<(EmbeddingField, u64)>,
}

impl FieldCoverage {
    /// Documents lacking `field`.
    pub fn missing(&self, field: EmbeddingField) -> u64 {
        self.fields
            .iter()
            .find(|(candidate, _)| *candidate == field)
            .map(|(_, count)| self.documents.saturating_sub(*count))
            .unwrap_or(self.documents)
    }
}

/// Counts release documents overall and per embedding field.
pub fn field_coverage(store: &dyn DocumentStore, release_tag: &str) -> Result<FieldCoverage> {
    let documents = store.count(&coverage_query(release_tag, None))?;
    let mut fields = Vec::with_capacity(EmbeddingField::ALL.len());
    for field in EmbeddingField::ALL {
        fields.push((field, store.count(&coverage_query(release_tag, Some(field)))?));
    }
    Ok(FieldCoverage {
        release_tag: release_tag.to_string(),
        documents,
        fields,
    })
}

/// `release_tag` term filter, optionally requiring `field` to exist.
pub fn coverage_query(release_tag: &str, field: Option<EmbeddingField>) -> Value {
    let mut filter = vec![json!({ "term": { "release_tag": release_tag } })];
    if let Some(field) = field {
        filter.push(json!({ "exists": { "field": field.as_str() } }));
    }
    json!({ "bool": { "filter": filter } })
}
