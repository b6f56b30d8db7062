//! The per-page extraction data model.
//!
//! Everything here is deliberately lenient: records come out of a language
//! model, so every field carries `#[serde(default)]` and the fields the model
//! most often mangles (page and document numbers arrive as strings, integers,
//! or floats depending on its mood) deserialize through [`LooseText`].
//! A record that is missing half its fields still loads; downstream stages
//! treat absence as empty.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A scalar that the model may emit as a string or a number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum LooseText {
    Int(i64),
    Float(f64),
    Text(String),
}

static RE_FIRST_INT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)").unwrap());

impl LooseText {
    /// String form, as the model wrote it.
    pub fn as_text(&self) -> String {
        match self {
            LooseText::Int(n) => n.to_string(),
            LooseText::Float(f) => f.to_string(),
            LooseText::Text(s) => s.clone(),
        }
    }

    /// Best-effort numeric value: a native number, or the first embedded
    /// integer in strings like `"24 of 66"` or `"24/66"`. `None` when no
    /// digits are present.
    pub fn first_integer(&self) -> Option<i64> {
        match self {
            LooseText::Int(n) => Some(*n),
            LooseText::Float(f) => Some(*f as i64),
            LooseText::Text(s) => RE_FIRST_INT
                .captures(s)
                .and_then(|c| c[1].parse::<i64>().ok()),
        }
    }
}

/// Metadata sub-record of one extracted page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(default)]
    pub page_number: Option<LooseText>,
    #[serde(default)]
    pub document_number: Option<LooseText>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub has_handwriting: bool,
    #[serde(default)]
    pub has_stamps: bool,
}

/// One transcribed region of the page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextBlock {
    /// printed | handwritten | stamp | signature | other
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub content: String,
    /// top | middle | bottom | header | footer | margin
    #[serde(default)]
    pub position: String,
}

/// The five entity categories extracted from a page.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntitySet {
    #[serde(default)]
    pub people: Vec<String>,
    #[serde(default)]
    pub organizations: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub dates: Vec<String>,
    #[serde(default)]
    pub reference_numbers: Vec<String>,
}

impl EntitySet {
    /// Absorb another set; call [`EntitySet::normalize`] afterwards to
    /// restore the sorted-deduplicated invariant.
    pub fn merge(&mut self, other: &EntitySet) {
        self.people.extend(other.people.iter().cloned());
        self.organizations.extend(other.organizations.iter().cloned());
        self.locations.extend(other.locations.iter().cloned());
        self.dates.extend(other.dates.iter().cloned());
        self.reference_numbers
            .extend(other.reference_numbers.iter().cloned());
    }

    /// Sort and deduplicate every category.
    pub fn normalize(&mut self) {
        for list in [
            &mut self.people,
            &mut self.organizations,
            &mut self.locations,
            &mut self.dates,
            &mut self.reference_numbers,
        ] {
            list.sort();
            list.dedup();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
            && self.organizations.is_empty()
            && self.locations.is_empty()
            && self.dates.is_empty()
            && self.reference_numbers.is_empty()
    }
}

/// Structured output for one page image, as returned by the model and
/// persisted one-to-one with its input item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionRecord {
    #[serde(default)]
    pub document_metadata: RecordMetadata,
    #[serde(default)]
    pub full_text: String,
    #[serde(default)]
    pub text_blocks: Vec<TextBlock>,
    #[serde(default)]
    pub entities: EntitySet,
    #[serde(default)]
    pub additional_notes: Option<String>,
}

impl ExtractionRecord {
    /// Sort rank for page ordering inside a document group. Missing or
    /// digit-free page numbers rank 0 so they keep their relative scan order.
    pub fn page_rank(&self) -> i64 {
        self.document_metadata
            .page_number
            .as_ref()
            .and_then(LooseText::first_integer)
            .unwrap_or(0)
    }
}
