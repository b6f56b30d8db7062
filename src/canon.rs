//! Canonicalization engine: reduce raw label sets to canonical labels.
//!
//! Extraction leaves every entity and document-type label exactly as the
//! model transcribed it, so one person appears as "Epstein", "EPSTEIN",
//! "J. Epstein", and "Mr. Epstein" across the corpus. The engine asks the
//! inference service for grouping proposals in fixed-size batches, validates
//! each proposal against category heuristics, and finishes with a
//! conservative cross-batch convergence pass.
//!
//! Two invariants hold no matter what the service returns:
//!
//! * **Totality** — every input label maps to exactly one canonical label,
//!   and canonical labels map to themselves. A failed batch degrades to
//!   identity mappings instead of dropping labels.
//! * **Numbered-identity preservation** — "Witness 1" and "Witness 2" are
//!   different people however similar their surface forms; any proposal that
//!   collapses distinct numbers is exploded back to identity mappings.

use crate::config::PipelineConfig;
use crate::error::PagesiftError;
use crate::group::load_records;
use crate::inference::{ChatMessage, ChatOptions, InferenceProvider};
use crate::process::write_json_atomic;
use crate::prompts;
use crate::recover::recover_json;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The label categories the engine canonicalizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelCategory {
    People,
    Organizations,
    Locations,
    DocumentTypes,
}

impl LabelCategory {
    /// Plural noun used in prompts and log lines.
    pub fn noun(self) -> &'static str {
        match self {
            LabelCategory::People => "people",
            LabelCategory::Organizations => "organizations",
            LabelCategory::Locations => "locations",
            LabelCategory::DocumentTypes => "document types",
        }
    }
}

/// Canonical phrases that must never serve as a person's canonical name:
/// descriptive relations, bare roles, titles, and possessives. Matched on
/// the lowercased label.
static BAD_PERSON_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"'s\s+(brother|sister|friend|attorney|lawyer|associate)",
        r"^(the|a)\s+(defendant|plaintiff|witness|victim|judge|president)",
        r"^(mr|ms|mrs|dr)\.\s*$",
        r"co-conspirator|witness\s+\d+|victim\s+\d+",
        r"'s$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static RE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// Entity mapping file shape: one variant→canonical map per category.
#[derive(Debug, Default, Serialize)]
pub struct EntityMappings {
    pub people: BTreeMap<String, String>,
    pub organizations: BTreeMap<String, String>,
    pub locations: BTreeMap<String, String>,
}

/// Observability stats for document-type canonicalization.
#[derive(Debug, Serialize)]
pub struct TypeStats {
    pub original_types: usize,
    pub canonical_types: usize,
    pub total_documents: usize,
    pub reduction_percentage: f64,
}

/// Document-type mapping file shape.
#[derive(Debug, Serialize)]
pub struct TypeDedupeReport {
    pub stats: TypeStats,
    pub mappings: BTreeMap<String, String>,
}

/// Canonicalize people, organizations, and locations across the whole
/// results tree and write the mapping to `config.dedupe_file`.
pub async fn dedupe_entities(config: &PipelineConfig) -> Result<EntityMappings, PagesiftError> {
    let provider = config.resolve_provider()?;
    let options = config.chat_options();
    let records = load_records(&config.results_dir)?;

    let mut people = Vec::new();
    let mut organizations = Vec::new();
    let mut locations = Vec::new();
    for rec in &records {
        people.extend(rec.record.entities.people.iter().cloned());
        organizations.extend(rec.record.entities.organizations.iter().cloned());
        locations.extend(rec.record.entities.locations.iter().cloned());
    }
    for list in [&mut people, &mut organizations, &mut locations] {
        list.sort();
        list.dedup();
    }
    info!(
        people = people.len(),
        organizations = organizations.len(),
        locations = locations.len(),
        "collected raw entity labels"
    );

    let mappings = EntityMappings {
        people: canonicalize_labels(
            &provider,
            LabelCategory::People,
            &people,
            config.entity_batch_size,
            &options,
        )
        .await,
        organizations: canonicalize_labels(
            &provider,
            LabelCategory::Organizations,
            &organizations,
            config.entity_batch_size,
            &options,
        )
        .await,
        locations: canonicalize_labels(
            &provider,
            LabelCategory::Locations,
            &locations,
            config.entity_batch_size,
            &options,
        )
        .await,
    };

    let value = serde_json::to_value(&mappings)
        .map_err(|e| PagesiftError::Internal(format!("mapping serialization: {e}")))?;
    write_json_atomic(&config.dedupe_file, &value).map_err(|source| {
        PagesiftError::OutputWriteFailed {
            path: config.dedupe_file.clone(),
            source,
        }
    })?;
    info!(path = %config.dedupe_file.display(), "entity mappings saved");
    Ok(mappings)
}

/// Canonicalize document-type labels across the results tree and write the
/// mapping plus stats to `config.types_file`.
pub async fn dedupe_document_types(
    config: &PipelineConfig,
) -> Result<TypeDedupeReport, PagesiftError> {
    let provider = config.resolve_provider()?;
    let options = config.chat_options();
    let records = load_records(&config.results_dir)?;

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for rec in &records {
        if let Some(t) = &rec.record.document_metadata.document_type {
            let t = t.trim();
            if !t.is_empty() {
                *counts.entry(t.to_string()).or_default() += 1;
            }
        }
    }
    if counts.is_empty() {
        return Err(PagesiftError::NoResults {
            path: config.results_dir.clone(),
        });
    }
    info!(unique = counts.len(), "collected document-type labels");

    let mappings =
        canonicalize_document_types(&provider, &counts, config.type_batch_size, &options).await;

    let canonical_count = distinct_values(&mappings);
    let original_count = mappings.len();
    let reduction = if original_count == 0 {
        0.0
    } else {
        let raw = (1.0 - canonical_count as f64 / original_count as f64) * 100.0;
        (raw * 10.0).round() / 10.0
    };
    let report = TypeDedupeReport {
        stats: TypeStats {
            original_types: original_count,
            canonical_types: canonical_count,
            total_documents: counts.values().sum(),
            reduction_percentage: reduction,
        },
        mappings,
    };

    let value = serde_json::to_value(&report)
        .map_err(|e| PagesiftError::Internal(format!("mapping serialization: {e}")))?;
    write_json_atomic(&config.types_file, &value).map_err(|source| {
        PagesiftError::OutputWriteFailed {
            path: config.types_file.clone(),
            source,
        }
    })?;
    info!(
        original = report.stats.original_types,
        canonical = report.stats.canonical_types,
        reduction = report.stats.reduction_percentage,
        "document-type mappings saved"
    );
    Ok(report)
}

/// Run the full two-pass engine over one entity category.
///
/// Never fails: a batch the service cannot serve degrades to identity
/// mappings for its labels, and a failed convergence pass leaves the
/// first-pass mapping in place.
pub async fn canonicalize_labels(
    provider: &Arc<dyn InferenceProvider>,
    category: LabelCategory,
    labels: &[String],
    batch_size: usize,
    options: &ChatOptions,
) -> BTreeMap<String, String> {
    let mut mapping: BTreeMap<String, String> = BTreeMap::new();

    for (batch_idx, batch) in labels.chunks(batch_size.max(1)).enumerate() {
        match propose_groups(provider, category, batch, options).await {
            Ok(groups) => {
                for (canonical, variants) in groups {
                    accept_group(category, canonical, variants, &mut mapping);
                }
            }
            Err(e) => {
                warn!(
                    category = category.noun(),
                    batch = batch_idx,
                    "batch failed, mapping labels to themselves: {e}"
                );
            }
        }
        // Totality backfill: anything the proposal missed (or a failed
        // batch dropped) maps to itself.
        for label in batch {
            mapping.entry(label.clone()).or_insert_with(|| label.clone());
        }
    }

    converge(provider, category, &mut mapping, options).await;
    mapping
}

/// Document-type variant of the engine: flat `{original: canonical}`
/// proposals, descending-frequency batch order, no person heuristics.
pub async fn canonicalize_document_types(
    provider: &Arc<dyn InferenceProvider>,
    counts: &BTreeMap<String, usize>,
    batch_size: usize,
    options: &ChatOptions,
) -> BTreeMap<String, String> {
    // Most frequent first so the common vocabulary anchors the early
    // batches; ties break alphabetically for determinism.
    let mut labels: Vec<&String> = counts.keys().collect();
    labels.sort_by(|a, b| counts[*b].cmp(&counts[*a]).then(a.cmp(b)));
    let labels: Vec<String> = labels.into_iter().cloned().collect();

    let mut mapping: BTreeMap<String, String> = BTreeMap::new();
    for (batch_idx, batch) in labels.chunks(batch_size.max(1)).enumerate() {
        let request = vec![ChatMessage::user(prompts::type_batch_prompt(batch))];
        match request_flat_mapping(provider, &request, options).await {
            Ok(flat) => {
                for (original, canonical) in flat {
                    let canonical = canonical.trim();
                    let canonical = if canonical.is_empty() {
                        "Unknown".to_string()
                    } else {
                        canonical.to_string()
                    };
                    mapping.insert(original, canonical);
                }
            }
            Err(e) => {
                warn!(batch = batch_idx, "type batch failed, using originals: {e}");
            }
        }
        for label in batch {
            mapping.entry(label.clone()).or_insert_with(|| label.clone());
        }
    }

    converge(provider, LabelCategory::DocumentTypes, &mut mapping, options).await;
    mapping
}

/// Request one batch grouping proposal: `{canonical: [variants]}`.
async fn propose_groups(
    provider: &Arc<dyn InferenceProvider>,
    category: LabelCategory,
    batch: &[String],
    options: &ChatOptions,
) -> Result<BTreeMap<String, Vec<String>>, String> {
    let messages = vec![
        ChatMessage::system(prompts::entity_grouping_prompt(category)),
        ChatMessage::user(prompts::entity_batch_request(category, batch)),
    ];
    let reply = provider
        .chat(&messages, options)
        .await
        .map_err(|e| e.to_string())?;
    let value = recover_json(&reply.content).map_err(|e| e.to_string())?;

    let obj = value.as_object().ok_or("proposal is not a JSON object")?;
    let mut groups = BTreeMap::new();
    for (canonical, variants) in obj {
        let variants: Vec<String> = match variants {
            Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            // A lone string is a degenerate single-variant group.
            Value::String(s) => vec![s.clone()],
            _ => continue,
        };
        if !variants.is_empty() {
            groups.insert(canonical.clone(), variants);
        }
    }
    Ok(groups)
}

/// Request a flat `{original: canonical}` mapping for a single-turn prompt.
async fn request_flat_mapping(
    provider: &Arc<dyn InferenceProvider>,
    messages: &[ChatMessage],
    options: &ChatOptions,
) -> Result<BTreeMap<String, String>, String> {
    let reply = provider
        .chat(messages, options)
        .await
        .map_err(|e| e.to_string())?;
    let value = recover_json(&reply.content).map_err(|e| e.to_string())?;
    let obj = value.as_object().ok_or("mapping is not a JSON object")?;
    Ok(obj
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|c| (k.clone(), c.to_string())))
        .collect())
}

/// Validate one proposed group and record its mappings.
///
/// Order of operations: the numbered-identity guard first (a reverted group
/// skips everything else), then the person-canonical rejection with
/// substitution, then the mechanical longest-variant re-pick that makes
/// slightly different canonical spellings within one batch converge.
fn accept_group(
    category: LabelCategory,
    canonical: String,
    variants: Vec<String>,
    mapping: &mut BTreeMap<String, String>,
) {
    if collapses_numeric_range(&canonical, &variants) {
        debug!(
            canonical = %canonical,
            "group spans distinct numbered identities, reverting to identity"
        );
        for variant in variants {
            mapping.insert(variant.clone(), variant);
        }
        return;
    }

    let mut canonical = canonical;
    if category == LabelCategory::People {
        if let Some(pattern) = matching_bad_pattern(&canonical) {
            // Substitute the longest plausible proper name from the group.
            let better = variants
                .iter()
                .filter(|v| v.split_whitespace().count() >= 2)
                .filter(|v| matching_bad_pattern(v).is_none())
                .max_by_key(|v| v.len());
            match better {
                Some(name) => {
                    debug!(
                        rejected = %canonical,
                        substituted = %name,
                        pattern = pattern.as_str(),
                        "replaced bad person canonical"
                    );
                    canonical = name.clone();
                }
                None => {
                    debug!(canonical = %canonical, "no usable substitute in group");
                }
            }
        }
    }

    // Mechanical re-pick: the longest string in the group wins, canonical
    // included, so near-duplicate canonical spellings collapse. For people
    // the rejection patterns stay authoritative: a label the validation
    // refused as canonical cannot win the length contest either.
    let true_canonical = variants
        .iter()
        .chain(std::iter::once(&canonical))
        .filter(|v| category != LabelCategory::People || matching_bad_pattern(v).is_none())
        .fold(&canonical, |best, v| if v.len() > best.len() { v } else { best })
        .clone();

    for variant in variants {
        mapping.insert(variant, true_canonical.clone());
    }
    mapping.insert(true_canonical.clone(), true_canonical);
}

/// Cross-batch convergence: ask the service to merge the distinct canonical
/// labels conservatively, then rewrite the first-pass mapping through the
/// result. Failure leaves the first-pass mapping untouched.
async fn converge(
    provider: &Arc<dyn InferenceProvider>,
    category: LabelCategory,
    mapping: &mut BTreeMap<String, String>,
    options: &ChatOptions,
) {
    let mut canonicals: Vec<String> = mapping.values().cloned().collect();
    canonicals.sort();
    canonicals.dedup();
    if canonicals.len() <= 1 {
        return;
    }

    let request = vec![ChatMessage::user(prompts::convergence_prompt(&canonicals))];
    let second = match request_flat_mapping(provider, &request, options).await {
        Ok(m) => m,
        Err(e) => {
            warn!(category = category.noun(), "convergence pass failed: {e}");
            return;
        }
    };

    let before = canonicals.len();
    for value in mapping.values_mut() {
        if let Some(merged) = second.get(value) {
            let merged = merged.trim();
            if merged.is_empty() || merged == value {
                continue;
            }
            // The conservative pass still must not fuse numbered identities.
            if distinct_number_signatures(value, merged) {
                continue;
            }
            *value = merged.to_string();
        }
    }
    // The reply may merge into a spelling that was never submitted; every
    // final canonical must be a key mapping to itself or re-applying the
    // mapping to a canonical would be undefined.
    let finals: Vec<String> = mapping.values().cloned().collect();
    for label in finals {
        mapping.insert(label.clone(), label);
    }
    let after = distinct_values(mapping);
    debug!(
        category = category.noun(),
        before, after, "convergence pass applied"
    );
}

fn distinct_values(mapping: &BTreeMap<String, String>) -> usize {
    let mut values: Vec<&String> = mapping.values().collect();
    values.sort();
    values.dedup();
    values.len()
}

fn matching_bad_pattern(label: &str) -> Option<&'static Regex> {
    let lower = label.to_lowercase();
    BAD_PERSON_PATTERNS.iter().find(|p| p.is_match(&lower))
}

/// The sequence of numbers embedded in a label, zero-padding stripped, so
/// "Witness 01" and "Witness-1" share a signature while "Witness 2" does not.
fn number_signature(label: &str) -> Vec<String> {
    RE_NUMBER
        .find_iter(label)
        .map(|m| {
            let trimmed = m.as_str().trim_start_matches('0');
            if trimmed.is_empty() { "0" } else { trimmed }.to_string()
        })
        .collect()
}

/// True when the proposal's number-bearing labels disagree on their numbers,
/// i.e. it collapsed a numeric range. The canonical participates in the
/// check: `{"Witness 1": ["Witness 2"]}` collapses a range even though its
/// lone variant is internally consistent.
fn collapses_numeric_range(canonical: &str, variants: &[String]) -> bool {
    let mut seen: Option<Vec<String>> = None;
    for label in std::iter::once(canonical).chain(variants.iter().map(String::as_str)) {
        let sig = number_signature(label);
        if sig.is_empty() {
            continue;
        }
        match &seen {
            None => seen = Some(sig),
            Some(first) => {
                if first != &sig {
                    return true;
                }
            }
        }
    }
    false
}

/// True when both labels carry numbers and the numbers differ.
fn distinct_number_signatures(a: &str, b: &str) -> bool {
    let (sa, sb) = (number_signature(a), number_signature(b));
    !sa.is_empty() && !sb.is_empty() && sa != sb
}
