//! Parse the `typeToPathMap` registry that maps logical icon names to asset filenames.
//!
//! The registry is a TypeScript object literal:
//!
//! ```text
//! export const typeToPathMap = {
//!   logoElastic: 'logo_elastic',
//!   'arrow-down': "arrow_down",
//! };
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// One `iconName: 'filename'` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IconMapEntry {
    /// Logical icon name (object key).
    pub icon_name: String,
    /// Asset filename stem (object value).
    pub filename: String,
}

/// Registry entries in source order. A key repeated in the source keeps its first
/// position and its last value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IconMap {
    entries: Vec<IconMapEntry>,
}

/// A filename claimed by more than one icon name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateFilename {
    /// Contested filename stem.
    pub filename: String,
    /// Icon name that wins the reverse lookup (the later entry).
    pub kept: String,
    /// Icon name that lost it.
    pub dropped: String,
}

/// Reverse lookup `filename -> icon_name` plus every collision it resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilenameIndex {
    /// Winning icon name per filename.
    pub by_filename: BTreeMap<String, String>,
    /// Collisions, in the order they were encountered.
    pub duplicates: Vec<DuplicateFilename>,
}

/// Why a registry source could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// No `export const typeToPathMap = { ... }` declaration.
    MissingDeclaration,
    /// The declaration exists but contains no `key: 'value'` pairs.
    NoEntries,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MissingDeclaration => {
                f.write_str("no `export const typeToPathMap = { ... }` declaration found")
            }
            ParseError::NoEntries => f.write_str("typeToPathMap has no entries"),
        }
    }
}

impl std::error::Error for ParseError {}

impl IconMap {
    /// Entries in source order.
    pub fn entries(&self) -> &[IconMapEntry] {
        &self.entries
    }

    /// Number of distinct icon names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Filename for `icon_name`.
    pub fn filename(&self, icon_name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.icon_name == icon_name)
            .map(|entry| entry.filename.as_str())
    }

    /// Builds the reverse lookup. Later entries win; every loser is reported.
    pub fn by_filename(&self) -> FilenameIndex {
        let mut index = FilenameIndex::default();
        for entry in &self.entries {
            if let Some(previous) = index
                .by_filename
                .insert(entry.filename.clone(), entry.icon_name.clone())
            {
                index.duplicates.push(DuplicateFilename {
                    filename: entry.filename.clone(),
                    kept: entry.icon_name.clone(),
                    dropped: previous,
                });
            }
        }
        index
    }

    fn insert(&mut self, icon_name: String, filename: String) {
        match self.entries.iter_mut().find(|entry| entry.icon_name == icon_name) {
            Some(existing) => existing.filename = filename,
            None => self.entries.push(IconMapEntry {
                icon_name,
                filename,
            }),
        }
    }
}

/// Parses the registry out of a TypeScript source file.
pub fn parse_icon_map(source: &str) -> Result<IconMap, ParseError> {
    let body = declaration()
        .captures(source)
        .and_then(|caps| caps.get(1))
        .ok_or(ParseError::MissingDeclaration)?
        .as_str();
    let body = comments().replace_all(body, "");

    let mut map = IconMap::default();
    for caps in entry().captures_iter(&body) {
        let key = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string());
        if let (Some(icon_name), Some(filename)) = (key, caps.get(3)) {
            map.insert(icon_name, filename.as_str().to_string());
        }
    }
    if map.is_empty() {
        return Err(ParseError::NoEntries);
    }
    Ok(map)
}

fn declaration() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"export\s+const\s+typeToPathMap\s*(?::[^=]+)?=\s*\{([^}]+)\}")
            .expect("valid regex")
    })
}

fn entry() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:(\w+)|["']([^"']+)["'])\s*:\s*["']([^"']+)["']"#).expect("valid regex")
    })
}

fn comments() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/|//[^\n]*").expect("valid regex"))
}
