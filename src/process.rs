//! Run orchestrator: scan the input tree, dispatch items to the worker pool,
//! persist records, and keep the work index current.
//!
//! One call to [`process_images`] is one *run*. Runs are resumable: the work
//! index is consulted before dispatch and updated after every item, so a
//! crashed run loses at most the items that were in flight. Item failures are
//! aggregated into the [`RunSummary`]; only configuration problems (missing
//! credentials, missing input directory) abort before any work begins.

use crate::config::PipelineConfig;
use crate::error::{ItemError, PagesiftError};
use crate::index::{FailureEntry, WorkIndex};
use crate::pipeline::scan::{discover_images, filter_unprocessed, InputItem};
use crate::pipeline::worker::{process_item, WorkOutcome};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Per-item line in the run summary file.
#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub file: String,
    pub status: ItemStatus,
    /// Mirrored output path, present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Human-readable error, present on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Success,
    Failed,
}

/// What one run did. Serialized to the summary file after the pool drains.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub total_processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<ItemReport>,
    /// Items skipped because the index already held them. Not part of
    /// `total_processed`.
    #[serde(skip)]
    pub skipped: usize,
}

/// Process every unseen image under `config.input_dir`.
///
/// Items run concurrently up to `config.concurrency`; each completion
/// immediately persists its record (or error artifact) and marks the index,
/// so interrupting the process never repeats finished work.
pub async fn process_images(config: &PipelineConfig) -> Result<RunSummary, PagesiftError> {
    let provider = config.resolve_provider()?;
    let options = config.chat_options();

    let discovered = discover_images(&config.input_dir)?;
    let discovered_count = discovered.len();

    let index = WorkIndex::load(&config.index_file);
    let candidates = if config.resume {
        filter_unprocessed(discovered, index.processed())
    } else {
        discovered
    };
    let skipped = discovered_count - candidates.len();

    let candidates: Vec<InputItem> = match config.limit {
        Some(n) => candidates.into_iter().take(n).collect(),
        None => candidates,
    };
    let total = candidates.len();

    info!(
        discovered = discovered_count,
        skipped, dispatching = total, "starting extraction run"
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(total, skipped);
    }

    let index = Arc::new(Mutex::new(index));
    let done = Arc::new(AtomicUsize::new(0));

    let settled: Vec<(String, Result<String, ItemError>)> =
        stream::iter(candidates.into_iter().map(|item| {
            let provider = Arc::clone(&provider);
            let config = config.clone();
            async move {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_item_start(&item.identity);
                }
                let outcome = process_item(&provider, &item, &options).await;
                (item, outcome)
            }
        }))
        .buffer_unordered(config.concurrency)
        .map(|(item, outcome)| {
            // Persistence happens on the completion path, in arrival order, so
            // a crash cannot leave a marked-but-unwritten item behind.
            let result = settle_item(config, &index, &item, outcome);
            let n = done.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(ref cb) = config.progress_callback {
                match &result {
                    Ok(_) => cb.on_item_complete(&item.identity, n, total),
                    Err(e) => cb.on_item_error(&item.identity, &e.to_string(), n, total),
                }
            }
            (item.identity, result)
        })
        .collect()
        .await;

    let mut failures: Vec<FailureEntry> = Vec::new();
    let mut reports: Vec<ItemReport> = Vec::new();
    let mut successful = 0usize;
    for (identity, result) in settled {
        match result {
            Ok(output_path) => {
                successful += 1;
                reports.push(ItemReport {
                    file: identity,
                    status: ItemStatus::Success,
                    output: Some(output_path),
                    error: None,
                });
            }
            Err(e) => {
                warn!(identity = %identity, "item failed: {e}");
                failures.push(FailureEntry {
                    filename: identity.clone(),
                    error: e.to_string(),
                });
                reports.push(ItemReport {
                    file: identity,
                    status: ItemStatus::Failed,
                    output: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let failed = reports.len() - successful;
    {
        let mut idx = index.lock().map_err(|_| {
            PagesiftError::Internal("work index lock poisoned".into())
        })?;
        idx.record_failures(failures)?;
    }

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(total, successful, failed);
    }

    let summary = RunSummary {
        total_processed: total,
        successful,
        failed,
        results: reports,
        skipped,
    };
    write_summary(&config.summary_file, &summary)?;
    info!(
        successful, failed, skipped,
        summary = %config.summary_file.display(),
        "extraction run complete"
    );
    Ok(summary)
}

/// Persist one finished item and mark the index. Returns the mirrored output
/// path on success. Runs synchronously on the completion path.
fn settle_item(
    config: &PipelineConfig,
    index: &Arc<Mutex<WorkIndex>>,
    item: &InputItem,
    outcome: WorkOutcome,
) -> Result<String, ItemError> {
    let result = match outcome {
        WorkOutcome::Extracted(record) => {
            let out = result_path(&config.results_dir, &item.identity);
            write_json_atomic(&out, &record).map_err(|e| ItemError::PersistFailed {
                identity: item.identity.clone(),
                detail: e.to_string(),
            })?;
            Ok(out.to_string_lossy().into_owned())
        }
        WorkOutcome::Unrecoverable { raw_reply, error } => {
            // Keep the raw reply for offline inspection; losing it would make
            // the failure undiagnosable.
            let artifact = error_path(&config.errors_dir, &item.identity);
            if let Err(e) = write_text_atomic(&artifact, &raw_reply) {
                warn!(identity = %item.identity, "could not write error artifact: {e}");
            }
            Err(error)
        }
        WorkOutcome::Failed(e) => Err(e),
    };

    // Mark regardless of outcome: a run-level failure list entry also counts
    // as processed, mirroring the index invariant.
    match index.lock() {
        Ok(mut idx) => {
            if let Err(e) = idx.mark_processed(&item.identity) {
                warn!(identity = %item.identity, "index update failed: {e}");
            }
        }
        Err(_) => warn!(identity = %item.identity, "index lock poisoned, mark skipped"),
    }

    result
}

/// Mirrored result path: identity with its extension replaced by `.json`.
pub(crate) fn result_path(results_dir: &Path, identity: &str) -> PathBuf {
    results_dir.join(replace_extension(identity, "json"))
}

/// Mirrored error-artifact path: identity with `.txt` appended, so the
/// original filename (extension included) stays visible.
fn error_path(errors_dir: &Path, identity: &str) -> PathBuf {
    errors_dir.join(format!("{identity}.txt"))
}

fn replace_extension(identity: &str, ext: &str) -> String {
    match identity.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() && !stem.ends_with('/') => format!("{stem}.{ext}"),
        _ => format!("{identity}.{ext}"),
    }
}

fn write_summary(path: &Path, summary: &RunSummary) -> Result<(), PagesiftError> {
    let value = serde_json::to_value(summary)
        .map_err(|e| PagesiftError::Internal(format!("summary serialization: {e}")))?;
    write_json_atomic(path, &value).map_err(|source| PagesiftError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    })
}

/// Write pretty JSON via a sibling temp file and rename, so readers never
/// observe a half-written document.
pub(crate) fn write_json_atomic(path: &Path, value: &Value) -> std::io::Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    write_text_atomic(path, &text)
}

pub(crate) fn write_text_atomic(path: &Path, text: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
