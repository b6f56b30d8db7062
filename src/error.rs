//! Error types for the pagesift library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PagesiftError`] — **Fatal**: the run cannot proceed at all
//!   (bad input directory, missing API credentials, invalid config).
//!   Returned as `Err(PagesiftError)` from the top-level entry points.
//!
//! * [`ItemError`] — **Non-fatal**: a single page image failed (transport
//!   glitch, unrecoverable model reply) but every other item is fine.
//!   Surfaced through the failed [`crate::process::ItemReport`] lines of the
//!   run summary and the work-index failure list, so callers can inspect
//!   partial success rather than losing the whole run to one bad scan.
//!
//! The separation lets callers decide their own tolerance: abort on the first
//! item failure, log and continue, or collect all errors for a post-run report.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pagesift library.
///
/// Item-level failures use [`ItemError`] and are recorded in the work index
/// rather than propagated here.
#[derive(Debug, Error)]
pub enum PagesiftError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The configured image root does not exist or is not a directory.
    #[error("Input directory not found: '{path}'\nCheck the path exists and is readable.")]
    InputDirNotFound { path: PathBuf },

    /// No result files were found where a reconciliation stage expected them.
    #[error("No extraction results under '{path}'\nRun `pagesift process` first.")]
    NoResults { path: PathBuf },

    // ── Inference errors ──────────────────────────────────────────────────
    /// The inference endpoint is not configured (missing URL or API key).
    #[error("Inference service is not configured.\n{hint}")]
    ProviderNotConfigured { hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not read a file the run depends on.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single input item.
///
/// Carried inside the item's outcome and the index failure list. The overall
/// dispatch run continues regardless of how many items fail.
#[derive(Debug, Clone, Error)]
pub enum ItemError {
    /// The image file could not be read or encoded.
    #[error("{identity}: failed to read image: {detail}")]
    ReadFailed { identity: String, detail: String },

    /// The inference call itself failed (network, HTTP, rate limit).
    #[error("{identity}: inference call failed: {detail}")]
    InferenceFailed { identity: String, detail: String },

    /// The model reply survived no rung of the recovery ladder, including
    /// the repair-mode retry. The raw reply is preserved under the errors
    /// root for diagnosis.
    #[error("{identity}: reply is not valid JSON after recovery and repair: {detail}")]
    Unrecoverable { identity: String, detail: String },

    /// The recovered record could not be persisted.
    #[error("{identity}: failed to persist result: {detail}")]
    PersistFailed { identity: String, detail: String },
}

impl ItemError {
    /// Relative-path identity of the item this error belongs to.
    pub fn identity(&self) -> &str {
        match self {
            ItemError::ReadFailed { identity, .. }
            | ItemError::InferenceFailed { identity, .. }
            | ItemError::Unrecoverable { identity, .. }
            | ItemError::PersistFailed { identity, .. } => identity,
        }
    }
}
