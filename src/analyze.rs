//! Per-document analysis: summaries and key insights for grouped documents.
//!
//! Runs after extraction and grouping. Each document's combined text (front
//! truncated to the configured limit) goes to the service with the analysis
//! prompt; the structured reply lands in the analyses file, which is
//! rewritten after every new document so an interrupted run resumes where it
//! left off.

use crate::config::PipelineConfig;
use crate::error::PagesiftError;
use crate::group::{group_documents, load_records, Document};
use crate::inference::ChatMessage;
use crate::process::write_json_atomic;
use crate::prompts::ANALYSIS_SYSTEM_PROMPT;
use crate::recover::recover_json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// One analyzed document, as stored in the analyses file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentAnalysis {
    /// Normalized grouping key; the resume key across runs.
    pub document_id: String,
    pub document_number: String,
    pub page_count: usize,
    /// The model's structured analysis, kept verbatim:
    /// `{document_type, key_topics, key_people: [{name, role}],
    /// significance, summary}`.
    pub analysis: Value,
}

/// Analyses file shape.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AnalysisSet {
    pub total: usize,
    #[serde(default)]
    pub analyses: Vec<DocumentAnalysis>,
}

/// What one analysis run did.
#[derive(Debug)]
pub struct AnalysisSummary {
    pub analyzed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total: usize,
}

/// Analyze every document that the analyses file does not already hold.
///
/// Set `force` to discard prior analyses and start over. A document whose
/// reply cannot be parsed is skipped for this run and retried next time; the
/// analyses file never holds a partial entry.
pub async fn analyze_documents(
    config: &PipelineConfig,
    force: bool,
) -> Result<AnalysisSummary, PagesiftError> {
    let provider = config.resolve_provider()?;
    let options = config.chat_options();

    let mut existing: BTreeMap<String, DocumentAnalysis> = BTreeMap::new();
    if !force {
        for prior in load_existing(config) {
            existing.insert(prior.document_id.clone(), prior);
        }
        if !existing.is_empty() {
            info!(count = existing.len(), "resuming with prior analyses");
        }
    }

    let records = load_records(&config.results_dir)?;
    let documents = group_documents(&records);
    let documents: Vec<Document> = match config.limit {
        Some(n) => documents.into_iter().take(n).collect(),
        None => documents,
    };
    info!(documents = documents.len(), "grouped documents for analysis");

    let mut analyses: Vec<DocumentAnalysis> = Vec::new();
    let mut skipped = 0usize;
    let mut failed = 0usize;

    for doc in &documents {
        if let Some(prior) = existing.get(&doc.document_id) {
            analyses.push(prior.clone());
            skipped += 1;
            continue;
        }

        match analyze_one(&provider, doc, config.analysis_text_limit, &options).await {
            Ok(analysis) => {
                analyses.push(DocumentAnalysis {
                    document_id: doc.document_id.clone(),
                    document_number: doc.document_number.clone(),
                    page_count: doc.page_count(),
                    analysis,
                });
                // Incremental save: a crash costs at most the in-flight
                // document.
                save_analyses(config, &analyses)?;
            }
            Err(e) => {
                warn!(document = %doc.document_number, "analysis failed: {e}");
                failed += 1;
            }
        }
    }

    save_analyses(config, &analyses)?;
    let summary = AnalysisSummary {
        analyzed: analyses.len() - skipped,
        skipped,
        failed,
        total: analyses.len(),
    };
    info!(
        analyzed = summary.analyzed,
        skipped = summary.skipped,
        failed = summary.failed,
        path = %config.analyses_file.display(),
        "analysis run complete"
    );
    Ok(summary)
}

async fn analyze_one(
    provider: &std::sync::Arc<dyn crate::inference::InferenceProvider>,
    doc: &Document,
    text_limit: usize,
    options: &crate::inference::ChatOptions,
) -> Result<Value, String> {
    let text = truncate_text(&doc.full_text, text_limit);
    let messages = vec![
        ChatMessage::system(ANALYSIS_SYSTEM_PROMPT),
        ChatMessage::user(format!("Analyze this document:\n\n{text}")),
    ];
    let reply = provider
        .chat(&messages, options)
        .await
        .map_err(|e| e.to_string())?;
    recover_json(&reply.content).map_err(|e| e.to_string())
}

/// Front-truncate at a char boundary, with a marker so readers know the
/// document continues.
fn truncate_text(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let truncated: String = text.chars().take(limit).collect();
    format!("{truncated}\n\n[... document continues ...]")
}

fn load_existing(config: &PipelineConfig) -> Vec<DocumentAnalysis> {
    let text = match std::fs::read_to_string(&config.analyses_file) {
        Ok(t) => t,
        Err(_) => return Vec::new(),
    };
    match serde_json::from_str::<AnalysisSet>(&text) {
        Ok(set) => set.analyses,
        Err(e) => {
            warn!(
                path = %config.analyses_file.display(),
                "could not parse prior analyses, starting fresh: {e}"
            );
            Vec::new()
        }
    }
}

fn save_analyses(
    config: &PipelineConfig,
    analyses: &[DocumentAnalysis],
) -> Result<(), PagesiftError> {
    let set = AnalysisSet {
        total: analyses.len(),
        analyses: analyses.to_vec(),
    };
    let value = serde_json::to_value(&set)
        .map_err(|e| PagesiftError::Internal(format!("analysis serialization: {e}")))?;
    write_json_atomic(&config.analyses_file, &value).map_err(|source| {
        PagesiftError::OutputWriteFailed {
            path: config.analyses_file.clone(),
            source,
        }
    })
}
