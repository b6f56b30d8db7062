//! Document grouper: merge per-page extraction records into documents.
//!
//! Pages arrive as independent records; the only thing tying them together is
//! the document identifier the model transcribed, which varies freely in case,
//! punctuation, and zero-padding ("A-1", "a1", "A 1" are one document). The
//! grouper normalizes identifiers into keys, orders pages by a best-effort
//! numeric rank, and unions entities, so downstream stages see whole
//! documents instead of loose pages.

use crate::error::PagesiftError;
use crate::record::{EntitySet, ExtractionRecord};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Marker inserted between consecutive pages of one document.
pub const PAGE_BREAK: &str = "\n\n--- PAGE BREAK ---\n\n";

/// One loaded extraction record and where it came from.
#[derive(Debug, Clone)]
pub struct LoadedRecord {
    /// Result-file path relative to the results root, `/`-separated.
    pub identity: String,
    pub record: ExtractionRecord,
}

/// An aggregate of pages sharing a normalized document identifier.
#[derive(Debug, Clone)]
pub struct Document {
    /// Normalized grouping key, e.g. `a1`.
    pub document_id: String,
    /// The identifier as first observed, before normalization.
    pub document_number: String,
    /// Every distinct raw identifier spelling seen, in observation order.
    pub raw_identifiers: Vec<String>,
    /// Source identities in page order.
    pub page_identities: Vec<String>,
    /// Page texts joined with [`PAGE_BREAK`], in page order.
    pub full_text: String,
    /// Union of all pages' entities, deduplicated and sorted per category.
    pub entities: EntitySet,
    /// Distinct document-type labels seen across the pages.
    pub document_types: Vec<String>,
}

impl Document {
    pub fn page_count(&self) -> usize {
        self.page_identities.len()
    }
}

/// Load every result file under `results_dir`, leniently.
///
/// Files that are not valid JSON, or not object-shaped, are skipped with a
/// warning; one corrupt record must not block reconciliation of the rest.
pub fn load_records(results_dir: &Path) -> Result<Vec<LoadedRecord>, PagesiftError> {
    if !results_dir.is_dir() {
        return Err(PagesiftError::NoResults {
            path: results_dir.to_path_buf(),
        });
    }

    let mut records = Vec::new();
    for entry in WalkDir::new(results_dir).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!("skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), "unreadable result file: {e}");
                continue;
            }
        };
        match serde_json::from_str::<ExtractionRecord>(&text) {
            Ok(record) => {
                let rel = path.strip_prefix(results_dir).unwrap_or(path);
                let identity = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                records.push(LoadedRecord { identity, record });
            }
            Err(e) => {
                warn!(path = %path.display(), "skipping invalid record: {e}");
            }
        }
    }

    if records.is_empty() {
        return Err(PagesiftError::NoResults {
            path: results_dir.to_path_buf(),
        });
    }
    records.sort_by(|a, b| a.identity.cmp(&b.identity));
    debug!(count = records.len(), "loaded extraction records");
    Ok(records)
}

/// Group records into documents.
///
/// Records are keyed by the normalized document identifier, falling back to
/// the normalized filename stem when the model transcribed none. Output
/// documents are ordered by their raw identifier for deterministic
/// downstream consumption.
pub fn group_documents(records: &[LoadedRecord]) -> Vec<Document> {
    // BTreeMap keeps key iteration deterministic while building.
    let mut groups: BTreeMap<String, Vec<&LoadedRecord>> = BTreeMap::new();
    for rec in records {
        let key = document_key(rec);
        groups.entry(key).or_default().push(rec);
    }

    let mut documents: Vec<Document> = groups
        .into_iter()
        .map(|(key, mut pages)| {
            // Stable sort: ties keep scan order, which is lexicographic by
            // identity from the loader.
            pages.sort_by_key(|r| r.record.page_rank());

            let mut raw_identifiers: Vec<String> = Vec::new();
            let mut entities = EntitySet::default();
            let mut document_types: Vec<String> = Vec::new();
            let mut texts: Vec<&str> = Vec::new();
            let mut page_identities: Vec<String> = Vec::new();

            for page in &pages {
                if let Some(raw) = page
                    .record
                    .document_metadata
                    .document_number
                    .as_ref()
                    .map(|n| n.as_text())
                {
                    if !raw.is_empty() && !raw_identifiers.contains(&raw) {
                        raw_identifiers.push(raw);
                    }
                }
                if let Some(t) = &page.record.document_metadata.document_type {
                    if !t.is_empty() && !document_types.contains(t) {
                        document_types.push(t.clone());
                    }
                }
                entities.merge(&page.record.entities);
                if !page.record.full_text.is_empty() {
                    texts.push(&page.record.full_text);
                }
                page_identities.push(page.identity.clone());
            }
            entities.normalize();

            let document_number = raw_identifiers
                .first()
                .cloned()
                .unwrap_or_else(|| key.clone());

            Document {
                document_id: key,
                document_number,
                raw_identifiers,
                page_identities,
                full_text: texts.join(PAGE_BREAK),
                entities,
                document_types,
            }
        })
        .collect();

    documents.sort_by(|a, b| a.document_number.cmp(&b.document_number));
    documents
}

/// Grouping key for one record: normalized document identifier, else the
/// normalized filename stem.
fn document_key(rec: &LoadedRecord) -> String {
    rec.record
        .document_metadata
        .document_number
        .as_ref()
        .map(|n| n.as_text())
        .and_then(|raw| normalize_identifier(&raw))
        .unwrap_or_else(|| {
            let stem = filename_stem(&rec.identity);
            normalize_identifier(stem).unwrap_or_else(|| stem.to_lowercase())
        })
}

/// Normalize a raw document identifier into a grouping key.
///
/// Case-folds, drops every non-alphanumeric character, and strips the
/// zero-padding of purely numeric identifiers, so "A-1", "a1", and "A 1"
/// produce one key, as do "7", "07", and "7 ". Returns `None` when nothing
/// survives.
pub fn normalize_identifier(raw: &str) -> Option<String> {
    let mut key: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect();

    if key.chars().all(|c| c.is_ascii_digit()) {
        let trimmed = key.trim_start_matches('0');
        key = if trimmed.is_empty() && !key.is_empty() {
            "0".to_string()
        } else {
            trimmed.to_string()
        };
    }

    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

fn filename_stem(identity: &str) -> &str {
    let name = identity.rsplit('/').next().unwrap_or(identity);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}
