//! # pagesift
//!
//! Turn directories of scanned page images into structured, reconciled
//! document data using an OpenAI-compatible vision model.
//!
//! ## Why this crate?
//!
//! Vision models read scanned pages well but reply badly: valid JSON one
//! minute, fenced JSON with commentary the next, truncated garbage after
//! that. On a corpus of tens of thousands of pages a pipeline that trusts
//! the model's formatting loses data, and one that crashes on the first bad
//! reply never finishes. pagesift treats every reply as hostile input — a
//! recovery ladder with a model-assisted repair round salvages what can be
//! salvaged, a crash-safe work index makes every run resumable, and item
//! failures are aggregated instead of fatal.
//!
//! ## Pipeline Overview
//!
//! ```text
//! downloads/**.jpg
//!  │
//!  ├─ 1. Scan      enumerate images, subtract the work index
//!  ├─ 2. Encode    image file → base64 data-URI
//!  ├─ 3. Extract   concurrent vision calls, recovery ladder + repair
//!  ├─ 4. Persist   mirrored results/**.json, index marked per item
//!  │
//!  └─ then, over the results tree:
//!     ├─ Group     pages → documents (normalized identifiers, page order)
//!     ├─ Dedupe    entity & document-type canonicalization (two passes)
//!     ├─ Analyze   per-document summaries (resumable)
//!     └─ Cleanup   audit index vs. outputs, release failures for retry
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pagesift::{process_images, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Endpoint resolved from OPENAI_API_URL / OPENAI_API_KEY
//!     let config = PipelineConfig::builder()
//!         .input_dir("./downloads")
//!         .concurrency(5)
//!         .build()?;
//!     let summary = process_images(&config).await?;
//!     eprintln!("{} ok / {} failed", summary.successful, summary.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pagesift` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pagesift = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod canon;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod group;
pub mod index;
pub mod inference;
mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod recover;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{analyze_documents, AnalysisSummary, DocumentAnalysis};
pub use canon::{
    dedupe_document_types, dedupe_entities, EntityMappings, LabelCategory, TypeDedupeReport,
};
pub use cleanup::{apply_cleanup, find_failures, FailureReport};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{ItemError, PagesiftError};
pub use group::{group_documents, load_records, Document, LoadedRecord};
pub use index::WorkIndex;
pub use inference::{
    ChatMessage, ChatOptions, ChatResponse, InferenceError, InferenceProvider, OpenAiCompatClient,
    Role,
};
pub use process::{process_images, RunSummary};
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
pub use record::{EntitySet, ExtractionRecord};
pub use recover::recover_json;
