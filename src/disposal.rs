//! Disposal instructions.
//!
//! - `DisposalLookupTable`: read-only map from classifier class id to a
//!   `DisposalEntry`, plus the entry shown for unrecognized items.
//! - `WasteResult`: the user-facing instruction for one classification.
//!
//! The table is configuration. The built-in copy lives in
//! `config/disposal_table.toml`; deployments may point at their own file.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize, Serializer};

const BUILTIN_TABLE: &str = include_str!("../config/disposal_table.toml");

/// Instruction template for one class.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct DisposalEntry {
    pub item_name: String,
    pub category: String,
    pub method: String,
    #[serde(default)]
    pub details: Vec<String>,
    pub display_color: String,
}

#[derive(Debug, Deserialize)]
struct TableFile {
    unrecognized: DisposalEntry,
    #[serde(default)]
    entries: Vec<TableFileEntry>,
}

#[derive(Debug, Deserialize)]
struct TableFileEntry {
    class_id: i64,
    #[serde(flatten)]
    entry: DisposalEntry,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisposalLookupTable {
    entries: BTreeMap<i64, DisposalEntry>,
    unrecognized: DisposalEntry,
}

impl DisposalLookupTable {
    /// Table shipped with the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_TABLE).context("built-in disposal table")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read disposal table {}: {}", path.display(), e))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid disposal table {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: TableFile = toml::from_str(raw)?;
        validate_entry("unrecognized", &file.unrecognized)?;
        let mut entries = BTreeMap::new();
        for item in file.entries {
            validate_entry(&format!("class {}", item.class_id), &item.entry)?;
            if entries.insert(item.class_id, item.entry).is_some() {
                return Err(anyhow!("duplicate disposal entry for class {}", item.class_id));
            }
        }
        Ok(Self {
            entries,
            unrecognized: file.unrecognized,
        })
    }

    pub fn get(&self, class_id: i64) -> Option<&DisposalEntry> {
        self.entries.get(&class_id)
    }

    pub fn class_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mapped result for `class_id`, or `Unrecognized` if it has no entry.
    pub fn result_for(&self, class_id: i64) -> WasteResult {
        match self.entries.get(&class_id) {
            Some(entry) => {
                WasteResult::from_entry(ResultKind::Mapped, ClassSource::Class(class_id), entry)
            }
            None => self.unrecognized(),
        }
    }

    pub fn unrecognized(&self) -> WasteResult {
        WasteResult::from_entry(
            ResultKind::Unrecognized,
            ClassSource::Unknown,
            &self.unrecognized,
        )
    }
}

fn validate_entry(label: &str, entry: &DisposalEntry) -> Result<()> {
    if entry.item_name.trim().is_empty() {
        return Err(anyhow!("{}: item_name must not be empty", label));
    }
    if entry.category.trim().is_empty() {
        return Err(anyhow!("{}: category must not be empty", label));
    }
    if entry.method.trim().is_empty() {
        return Err(anyhow!("{}: method must not be empty", label));
    }
    Ok(())
}

/// Class a result was derived from; serialized as the integer or `"unknown"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassSource {
    Class(i64),
    Unknown,
}

impl Serialize for ClassSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ClassSource::Class(id) => serializer.serialize_i64(*id),
            ClassSource::Unknown => serializer.serialize_str("unknown"),
        }
    }
}

impl fmt::Display for ClassSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassSource::Class(id) => write!(f, "{}", id),
            ClassSource::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Mapped,
    Unrecognized,
    CommunicationFailure,
}

/// User-facing disposal instruction. Built once, never edited:
///
/// ```compile_fail
/// let table = waste_sorter::DisposalLookupTable::builtin().unwrap();
/// let mut result = table.result_for(0);
/// result.item_name = String::from("something else");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WasteResult {
    kind: ResultKind,
    item_name: String,
    category: String,
    method: String,
    details: Vec<String>,
    display_color: String,
    source_class_id: ClassSource,
}

impl WasteResult {
    fn from_entry(kind: ResultKind, source: ClassSource, entry: &DisposalEntry) -> Self {
        Self {
            kind,
            item_name: entry.item_name.clone(),
            category: entry.category.clone(),
            method: entry.method.clone(),
            details: entry.details.clone(),
            display_color: entry.display_color.clone(),
            source_class_id: source,
        }
    }

    /// Shown when the classifier could not be reached or answered garbage.
    pub fn communication_failure() -> Self {
        Self {
            kind: ResultKind::CommunicationFailure,
            item_name: "Classification unavailable".to_string(),
            category: "Unknown".to_string(),
            method: "Try again in a moment".to_string(),
            details: vec![
                "The classification service could not be reached".to_string(),
                "Check your network connection and take the photo again".to_string(),
            ],
            display_color: "red".to_string(),
            source_class_id: ClassSource::Unknown,
        }
    }

    pub fn kind(&self) -> ResultKind {
        self.kind
    }

    pub fn item_name(&self) -> &str {
        &self.item_name
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn details(&self) -> &[String] {
        &self.details
    }

    pub fn display_color(&self) -> &str {
        &self.display_color
    }

    pub fn source_class_id(&self) -> ClassSource {
        self.source_class_id
    }
}

impl fmt::Display for WasteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} [{}]", self.item_name, self.category)?;
        write!(f, "{}", self.method)?;
        for (i, step) in self.details.iter().enumerate() {
            write!(f, "\n  {}. {}", i + 1, step)?;
        }
        Ok(())
    }
}
