//! The persistent work index: which inputs have already been handled.
//!
//! The index is the single source of truth for resumability. Every mutation
//! rewrites the *whole* file through a temp-file-plus-rename, so a crash at
//! any point leaves either the old or the new complete state on disk, never
//! a half-written one. A missing or unreadable index degrades to an empty
//! one — the cost is possible reprocessing, which beats refusing to run.
//!
//! Identities are paths relative to the input root, so "unprocessed =
//! discovered − processed" is a pure set difference independent of scan
//! order.

use crate::error::PagesiftError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One explicitly failed item, kept for the post-run report and the cleanup
/// audit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureEntry {
    pub filename: String,
    pub error: String,
}

/// On-disk shape of the index file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    #[serde(default)]
    processed_files: Vec<String>,
    #[serde(default)]
    failed_files: Vec<FailureEntry>,
    #[serde(default)]
    last_updated: String,
}

/// In-memory work index bound to its backing file.
#[derive(Debug)]
pub struct WorkIndex {
    path: PathBuf,
    processed: BTreeSet<String>,
    failures: Vec<FailureEntry>,
}

impl WorkIndex {
    /// Load the index from `path`, degrading to an empty index when the file
    /// is absent or unreadable.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (processed, failures) = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<IndexFile>(&text) {
                Ok(file) => (
                    file.processed_files.into_iter().collect(),
                    file.failed_files,
                ),
                Err(e) => {
                    warn!("Index file {} is corrupt ({e}); starting empty", path.display());
                    (BTreeSet::new(), Vec::new())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No index at {}; starting empty", path.display());
                (BTreeSet::new(), Vec::new())
            }
            Err(e) => {
                warn!("Could not read index {} ({e}); starting empty", path.display());
                (BTreeSet::new(), Vec::new())
            }
        };

        Self {
            path,
            processed,
            failures,
        }
    }

    /// Whether this identity has already been attempted (success or failure).
    pub fn is_processed(&self, identity: &str) -> bool {
        self.processed.contains(identity)
    }

    /// Mark one identity processed and persist the whole index immediately.
    pub fn mark_processed(&mut self, identity: &str) -> Result<(), PagesiftError> {
        self.processed.insert(identity.to_string());
        self.persist()
    }

    /// Replace the failure list and persist. Every failure identity is also
    /// marked processed so the invariant "failed ⊆ processed" holds even if
    /// the caller forgot to mark it.
    pub fn record_failures(&mut self, failures: Vec<FailureEntry>) -> Result<(), PagesiftError> {
        for f in &failures {
            self.processed.insert(f.filename.clone());
        }
        self.failures = failures;
        self.persist()
    }

    /// Remove identities from the processed set (so they are retried on the
    /// next run) and clear the failure list. Used by the cleanup audit.
    pub fn forget(&mut self, identities: &BTreeSet<String>) -> Result<usize, PagesiftError> {
        let before = self.processed.len();
        self.processed.retain(|id| !identities.contains(id));
        self.failures.clear();
        self.persist()?;
        Ok(before - self.processed.len())
    }

    pub fn processed(&self) -> &BTreeSet<String> {
        &self.processed
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    pub fn failures(&self) -> &[FailureEntry] {
        &self.failures
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total-overwrite persistence: serialize everything, write to a sibling
    /// temp file, rename over the old index.
    fn persist(&self) -> Result<(), PagesiftError> {
        let file = IndexFile {
            processed_files: self.processed.iter().cloned().collect(),
            failed_files: self.failures.clone(),
            last_updated: chrono::Utc::now().to_rfc3339(),
        };

        let body = serde_json::to_string_pretty(&file)
            .map_err(|e| PagesiftError::Internal(format!("index serialisation: {e}")))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| PagesiftError::OutputWriteFailed {
                    path: self.path.clone(),
                    source: e,
                })?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(|e| PagesiftError::OutputWriteFailed {
            path: tmp.clone(),
            source: e,
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| PagesiftError::OutputWriteFailed {
            path: self.path.clone(),
            source: e,
        })?;

        Ok(())
    }
}
