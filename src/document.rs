//! Search-index document shape and field-aware completeness.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::Dimensions;
use crate::error::{Error, Result};

/// Dense text-space field queried by text searches.
pub const TEXT_EMBEDDING_FIELD: &str = "text_embedding";
/// Sparse lexical-expansion field queried by hybrid text searches.
pub const SPARSE_EMBEDDING_FIELD: &str = "text_embedding_sparse";
/// Keyword field narrowed by the variant filter on text searches.
pub const ICON_TYPE_FIELD: &str = "icon_type";
/// Token type recorded when token variants are indexed.
pub const DEFAULT_TOKEN_TYPE: &str = "string";

/// Plain icon vs decorated token rendering of the same logical icon.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Plain icon.
    Icon,
    /// Decorated/boxed token.
    Token,
}

impl Variant {
    /// Wire name used by the renderer and search filters.
    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Icon => "icon",
            Variant::Token => "token",
        }
    }

    /// The two image-space fields holding this variant's embeddings.
    pub fn fields(self) -> [EmbeddingField; 2] {
        match self {
            Variant::Icon => [EmbeddingField::IconImage, EmbeddingField::IconSvg],
            Variant::Token => [EmbeddingField::TokenImage, EmbeddingField::TokenSvg],
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "icon" => Ok(Variant::Icon),
            "token" => Ok(Variant::Token),
            other => Err(format!("unknown variant '{other}' (expected icon or token)")),
        }
    }
}

/// The four image-space embedding fields of an icon document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EmbeddingField {
    /// Rendered plain-icon raster.
    IconImage,
    /// Canonicalized source SVG.
    IconSvg,
    /// Rendered token raster.
    TokenImage,
    /// Canonicalized token SVG.
    TokenSvg,
}

impl EmbeddingField {
    /// All fields in document order.
    pub const ALL: [EmbeddingField; 4] = [
        EmbeddingField::IconImage,
        EmbeddingField::IconSvg,
        EmbeddingField::TokenImage,
        EmbeddingField::TokenSvg,
    ];

    /// Document field name.
    pub fn as_str(self) -> &'static str {
        match self {
            EmbeddingField::IconImage => "icon_image_embedding",
            EmbeddingField::IconSvg => "icon_svg_embedding",
            EmbeddingField::TokenImage => "token_image_embedding",
            EmbeddingField::TokenSvg => "token_svg_embedding",
        }
    }

    /// Variant this field belongs to.
    pub fn variant(self) -> Variant {
        match self {
            EmbeddingField::IconImage | EmbeddingField::IconSvg => Variant::Icon,
            EmbeddingField::TokenImage | EmbeddingField::TokenSvg => Variant::Token,
        }
    }
}

impl fmt::Display for EmbeddingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbeddingField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        EmbeddingField::ALL
            .into_iter()
            .find(|field| field.as_str() == s.trim())
            .ok_or_else(|| format!("unknown embedding field '{s}'"))
    }
}

/// Which variants a batch run produces, and therefore which fields completeness requires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunScope {
    /// Plain icons only.
    IconsOnly,
    /// Plain icons and tokens.
    IconsAndTokens,
}

impl RunScope {
    /// Scope for a run that does (or does not) include tokens.
    pub fn from_include_tokens(include_tokens: bool) -> Self {
        if include_tokens {
            RunScope::IconsAndTokens
        } else {
            RunScope::IconsOnly
        }
    }

    /// True when token fields are produced and required.
    pub fn includes_tokens(self) -> bool {
        matches!(self, RunScope::IconsAndTokens)
    }

    /// Fields a document must carry to count as complete for this scope.
    pub fn required_fields(self) -> &'static [EmbeddingField] {
        match self {
            RunScope::IconsOnly => &EmbeddingField::ALL[..2],
            RunScope::IconsAndTokens => &EmbeddingField::ALL,
        }
    }
}

/// Composite document key: `(icon_name, release_tag)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocumentId {
    icon_name: String,
    release_tag: String,
}

impl DocumentId {
    /// Builds the key for an icon at a release.
    pub fn new(icon_name: impl Into<String>, release_tag: impl Into<String>) -> Self {
        Self {
            icon_name: icon_name.into(),
            release_tag: release_tag.into(),
        }
    }

    /// Logical icon name.
    pub fn icon_name(&self) -> &str {
        &self.icon_name
    }

    /// Upstream release tag.
    pub fn release_tag(&self) -> &str {
        &self.release_tag
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.icon_name, self.release_tag)
    }
}

/// One search document per (icon, release). Embedding fields may be partially populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IconRecord {
    /// Stable logical identifier.
    pub icon_name: String,
    /// Source asset filename stem.
    pub filename: String,
    /// Upstream release tag.
    pub release_tag: String,
    /// Original source markup.
    pub svg_content: String,
    /// Plain-icon raster embedding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_image_embedding: Option<Vec<f32>>,
    /// Source SVG embedding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_svg_embedding: Option<Vec<f32>>,
    /// Token raster embedding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_image_embedding: Option<Vec<f32>>,
    /// Token SVG embedding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_svg_embedding: Option<Vec<f32>>,
    /// Token markup as returned by the renderer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_svg_content: Option<String>,
    /// Token type rendered for the token variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl IconRecord {
    /// Creates a record with no embeddings yet.
    pub fn new(id: &DocumentId, filename: impl Into<String>, svg_content: impl Into<String>) -> Self {
        Self {
            icon_name: id.icon_name().to_string(),
            filename: filename.into(),
            release_tag: id.release_tag().to_string(),
            svg_content: svg_content.into(),
            icon_image_embedding: None,
            icon_svg_embedding: None,
            token_image_embedding: None,
            token_svg_embedding: None,
            token_svg_content: None,
            token_type: None,
        }
    }

    /// Composite key of this record.
    pub fn id(&self) -> DocumentId {
        DocumentId::new(&self.icon_name, &self.release_tag)
    }

    /// Embedding stored in `field`, if any.
    pub fn embedding(&self, field: EmbeddingField) -> Option<&[f32]> {
        let slot = match field {
            EmbeddingField::IconImage => &self.icon_image_embedding,
            EmbeddingField::IconSvg => &self.icon_svg_embedding,
            EmbeddingField::TokenImage => &self.token_image_embedding,
            EmbeddingField::TokenSvg => &self.token_svg_embedding,
        };
        slot.as_deref().filter(|vector| !vector.is_empty())
    }

    /// Stores `vector` in `field` after checking it against the image-space size.
    pub fn set_embedding(
        &mut self,
        field: EmbeddingField,
        vector: Vec<f32>,
        dims: Dimensions,
    ) -> Result<()> {
        if vector.is_empty() {
            return Err(Error::Embed(format!("empty vector for {field}")));
        }
        if vector.len() != dims.image {
            return Err(Error::DimensionMismatch {
                field: field.as_str().to_string(),
                expected: dims.image,
                actual: vector.len(),
            });
        }
        let slot = match field {
            EmbeddingField::IconImage => &mut self.icon_image_embedding,
            EmbeddingField::IconSvg => &mut self.icon_svg_embedding,
            EmbeddingField::TokenImage => &mut self.token_image_embedding,
            EmbeddingField::TokenSvg => &mut self.token_svg_embedding,
        };
        *slot = Some(vector);
        Ok(())
    }

    /// Fields present on this record.
    pub fn populated_fields(&self) -> Vec<EmbeddingField> {
        EmbeddingField::ALL
            .into_iter()
            .filter(|field| self.embedding(*field).is_some())
            .collect()
    }

    /// Required fields for `scope` that this record lacks.
    pub fn missing_fields(&self, scope: RunScope) -> Vec<EmbeddingField> {
        scope
            .required_fields()
            .iter()
            .copied()
            .filter(|field| self.embedding(*field).is_none())
            .collect()
    }

    /// True when the record belongs to `release_tag` and carries every field `scope` requires.
    pub fn is_complete_for(&self, release_tag: &str, scope: RunScope) -> bool {
        self.release_tag == release_tag && self.missing_fields(scope).is_empty()
    }
}
