//! Failure audit: reconcile the work index against the results tree.
//!
//! Crashes, transport failures, and unrecoverable replies all leave marked
//! identities with nothing (or garbage) on disk. The audit classifies every
//! discrepancy; applying it removes those identities from the processed set
//! and clears the failure list, so the next extraction run retries them.

use crate::config::PipelineConfig;
use crate::error::PagesiftError;
use crate::index::WorkIndex;
use crate::process::result_path;
use std::collections::BTreeSet;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Extensions tried when matching an orphaned result file back to an input.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp"];

/// The four discrepancy categories between index and results tree.
#[derive(Debug, Default)]
pub struct FailureReport {
    /// Marked processed but no result file exists.
    pub no_output: Vec<String>,
    /// Result file exists but is not valid JSON.
    pub invalid_output: Vec<String>,
    /// Listed in the index failure list.
    pub explicit_failed: Vec<String>,
    /// Result file exists for an identity the index never marked. Reported
    /// only; never cleaned, because deleting data the index forgot about
    /// would destroy the evidence of the inconsistency.
    pub orphaned: Vec<String>,
}

impl FailureReport {
    /// Identities that cleanup would return to the unprocessed pool.
    pub fn retryable(&self) -> BTreeSet<String> {
        self.no_output
            .iter()
            .chain(self.invalid_output.iter())
            .chain(self.explicit_failed.iter())
            .cloned()
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.retryable().is_empty()
    }
}

/// Audit the index against the results tree without changing anything.
pub fn find_failures(config: &PipelineConfig) -> Result<FailureReport, PagesiftError> {
    let index = WorkIndex::load(&config.index_file);
    let mut report = FailureReport::default();

    for identity in index.processed() {
        let out = result_path(&config.results_dir, identity);
        if !out.exists() {
            report.no_output.push(identity.clone());
        } else if !is_valid_json(&out) {
            report.invalid_output.push(identity.clone());
        }
    }

    for failure in index.failures() {
        report.explicit_failed.push(failure.filename.clone());
    }

    // Result files whose identity the index never saw.
    if config.results_dir.is_dir() {
        for entry in WalkDir::new(&config.results_dir).into_iter().flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let rel = path.strip_prefix(&config.results_dir).unwrap_or(path);
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let stem = rel.strip_suffix(".json").unwrap_or(&rel);
            let matched = IMAGE_EXTENSIONS
                .iter()
                .any(|ext| index.is_processed(&format!("{stem}.{ext}")));
            if !matched {
                report.orphaned.push(rel);
            }
        }
    }

    info!(
        no_output = report.no_output.len(),
        invalid_output = report.invalid_output.len(),
        explicit_failed = report.explicit_failed.len(),
        orphaned = report.orphaned.len(),
        "failure audit complete"
    );
    Ok(report)
}

/// Apply the audit: remove retryable identities from the processed set and
/// clear the failure list. Optionally deletes the invalid result files so
/// the retry starts from a blank slate. Returns the number of identities
/// released for retry.
pub fn apply_cleanup(
    config: &PipelineConfig,
    report: &FailureReport,
    delete_invalid_output: bool,
) -> Result<usize, PagesiftError> {
    let mut index = WorkIndex::load(&config.index_file);
    let removed = index.forget(&report.retryable())?;
    info!(removed, "released identities for retry");

    if delete_invalid_output {
        let mut deleted = 0usize;
        for identity in &report.invalid_output {
            let path = result_path(&config.results_dir, identity);
            match std::fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(e) => warn!(path = %path.display(), "could not delete: {e}"),
            }
        }
        info!(deleted, "removed invalid result files");
    }

    Ok(removed)
}

fn is_valid_json(path: &std::path::Path) -> bool {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok())
        .is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> PipelineConfig {
        PipelineConfig::builder()
            .input_dir(dir.path().join("downloads"))
            .results_dir(dir.path().join("results"))
            .index_file(dir.path().join("processing_index.json"))
            .build()
            .unwrap()
    }

    fn write(dir: &TempDir, rel: &str, content: &str) {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn audit_classifies_all_four_categories() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);

        let mut index = WorkIndex::load(&config.index_file);
        index.mark_processed("good.jpg").unwrap();
        index.mark_processed("missing.jpg").unwrap();
        index.mark_processed("corrupt.jpg").unwrap();
        index
            .record_failures(vec![crate::index::FailureEntry {
                filename: "failed.jpg".into(),
                error: "API timeout".into(),
            }])
            .unwrap();

        write(&dir, "results/good.json", r#"{"full_text": "ok"}"#);
        write(&dir, "results/corrupt.json", "{ not json");
        write(&dir, "results/stray.json", r#"{"full_text": "orphan"}"#);

        let report = find_failures(&config).unwrap();
        assert_eq!(report.no_output, vec!["missing.jpg"]);
        assert_eq!(report.invalid_output, vec!["corrupt.jpg"]);
        assert_eq!(report.explicit_failed, vec!["failed.jpg"]);
        assert_eq!(report.orphaned, vec!["stray.json"]);
        assert!(!report.is_clean());
    }

    #[test]
    fn clean_tree_reports_clean() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let mut index = WorkIndex::load(&config.index_file);
        index.mark_processed("a.png").unwrap();
        write(&dir, "results/a.json", r#"{}"#);

        let report = find_failures(&config).unwrap();
        assert!(report.is_clean());
        assert!(report.orphaned.is_empty());
    }

    #[test]
    fn apply_releases_identities_and_clears_failures() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let mut index = WorkIndex::load(&config.index_file);
        index.mark_processed("a.jpg").unwrap();
        index.mark_processed("b.jpg").unwrap();
        write(&dir, "results/a.json", r#"{}"#);
        // b.jpg has no output.

        let report = find_failures(&config).unwrap();
        let removed = apply_cleanup(&config, &report, false).unwrap();
        assert_eq!(removed, 1);

        let reloaded = WorkIndex::load(&config.index_file);
        assert!(reloaded.is_processed("a.jpg"));
        assert!(!reloaded.is_processed("b.jpg"));
        assert!(reloaded.failures().is_empty());
    }

    #[test]
    fn apply_can_delete_invalid_output() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let mut index = WorkIndex::load(&config.index_file);
        index.mark_processed("bad.jpg").unwrap();
        write(&dir, "results/bad.json", "garbage");

        let report = find_failures(&config).unwrap();
        apply_cleanup(&config, &report, true).unwrap();
        assert!(!dir.path().join("results/bad.json").exists());
    }
}
