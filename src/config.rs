//! Configuration for the extraction/reconciliation pipeline.
//!
//! All behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share configs across stages, log them, and diff two runs to
//! understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A fifteen-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use crate::error::PagesiftError;
use crate::inference::{InferenceProvider, OpenAiCompatClient};
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default model when neither config nor environment names one.
pub const DEFAULT_MODEL: &str = "meta-llama/Llama-4-Maverick-17B-128E-Instruct";

/// Configuration for a pagesift run.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use pagesift::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .input_dir("./downloads")
///     .concurrency(8)
///     .limit(100)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Root directory scanned recursively for page images. Default: `./downloads`.
    pub input_dir: PathBuf,

    /// Root for per-item extraction JSON, path-mirrored from the input root.
    /// Default: `./results`.
    pub results_dir: PathBuf,

    /// Root for raw unrecoverable replies, path-mirrored. Default: `./errors`.
    pub errors_dir: PathBuf,

    /// The crash-safe work index file. Default: `processing_index.json`.
    pub index_file: PathBuf,

    /// Post-run summary file. Default: `processed_results.json`.
    pub summary_file: PathBuf,

    /// Entity canonical-mapping output. Default: `dedupe.json`.
    pub dedupe_file: PathBuf,

    /// Document-type canonical-mapping output. Default: `dedupe_types.json`.
    pub types_file: PathBuf,

    /// Per-document analysis output. Default: `analyses.json`.
    pub analyses_file: PathBuf,

    /// OpenAI-compatible API base URL. Falls back to `PAGESIFT_API_URL` /
    /// `OPENAI_API_URL` at provider resolution.
    pub api_url: Option<String>,

    /// API key. Falls back to `OPENAI_API_KEY`.
    pub api_key: Option<String>,

    /// Model identifier. Falls back to `OPENAI_MODEL`, then [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// Pre-constructed provider. Takes precedence over `api_url`/`api_key`;
    /// the seam tests use to inject a scripted service.
    pub provider: Option<Arc<dyn InferenceProvider>>,

    /// Number of concurrent extraction workers. Default: 5.
    ///
    /// Inference calls are network-bound, not CPU-bound; each extra worker
    /// occupies one in-flight request. Lower this if the endpoint rate-limits.
    pub concurrency: usize,

    /// Truncate the candidate set before dispatch. Useful for staged
    /// rollout, not a correctness knob. Default: no limit.
    pub limit: Option<usize>,

    /// Resume from the work index (process only unseen items). Default: true.
    pub resume: bool,

    /// Sampling temperature. Default: 0.1 — extraction wants the model
    /// faithful to the page, not creative.
    pub temperature: f32,

    /// Max tokens the model may generate per reply. Default: 4096.
    pub max_tokens: usize,

    /// Per-request transport timeout in seconds. Default: 120. A stalled
    /// call blocks only its own worker slot.
    pub api_timeout_secs: u64,

    /// Labels per canonicalization batch for entity categories. Default: 50.
    pub entity_batch_size: usize,

    /// Labels per canonicalization batch for document types. Default: 100.
    pub type_batch_size: usize,

    /// Characters of document text forwarded to the analysis prompt before
    /// truncation. Default: 8000.
    pub analysis_text_limit: usize,

    /// Per-item progress events. Default: none.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("./downloads"),
            results_dir: PathBuf::from("./results"),
            errors_dir: PathBuf::from("./errors"),
            index_file: PathBuf::from("processing_index.json"),
            summary_file: PathBuf::from("processed_results.json"),
            dedupe_file: PathBuf::from("dedupe.json"),
            types_file: PathBuf::from("dedupe_types.json"),
            analyses_file: PathBuf::from("analyses.json"),
            api_url: None,
            api_key: None,
            model: None,
            provider: None,
            concurrency: 5,
            limit: None,
            resume: true,
            temperature: 0.1,
            max_tokens: 4096,
            api_timeout_secs: 120,
            entity_batch_size: 50,
            type_batch_size: 100,
            analysis_text_limit: 8000,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("input_dir", &self.input_dir)
            .field("results_dir", &self.results_dir)
            .field("errors_dir", &self.errors_dir)
            .field("index_file", &self.index_file)
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn InferenceProvider>"))
            .field("concurrency", &self.concurrency)
            .field("limit", &self.limit)
            .field("resume", &self.resume)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("entity_batch_size", &self.entity_batch_size)
            .field("type_batch_size", &self.type_batch_size)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Resolve the inference provider, from most-specific to least-specific:
    ///
    /// 1. **Pre-built provider** (`provider`) — the caller constructed it
    ///    entirely; used as-is. This is how tests inject a mock.
    /// 2. **Config url/key/model** — explicit fields on this struct.
    /// 3. **Environment** — `PAGESIFT_API_URL` or `OPENAI_API_URL` plus
    ///    `OPENAI_API_KEY` and optional `OPENAI_MODEL`.
    ///
    /// Missing credentials are the one error reported before any work
    /// begins.
    pub fn resolve_provider(&self) -> Result<Arc<dyn InferenceProvider>, PagesiftError> {
        if let Some(ref provider) = self.provider {
            return Ok(Arc::clone(provider));
        }

        let url = self
            .api_url
            .clone()
            .or_else(|| std::env::var("PAGESIFT_API_URL").ok().filter(|s| !s.is_empty()))
            .or_else(|| std::env::var("OPENAI_API_URL").ok().filter(|s| !s.is_empty()))
            .ok_or_else(|| PagesiftError::ProviderNotConfigured {
                hint: "Set --api-url, PAGESIFT_API_URL, or OPENAI_API_URL to an \
                       OpenAI-compatible endpoint."
                    .into(),
            })?;

        let key = self
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok().filter(|s| !s.is_empty()))
            .ok_or_else(|| PagesiftError::ProviderNotConfigured {
                hint: "Set --api-key or OPENAI_API_KEY.".into(),
            })?;

        let model = self
            .model
            .clone()
            .or_else(|| std::env::var("OPENAI_MODEL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let client = OpenAiCompatClient::new(url, key, model, self.api_timeout_secs)
            .map_err(|e| PagesiftError::Internal(format!("HTTP client: {e}")))?;
        Ok(Arc::new(client))
    }

    /// Sampling options shared by every request this config issues.
    pub fn chat_options(&self) -> crate::inference::ChatOptions {
        crate::inference::ChatOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.input_dir = dir.into();
        self
    }

    pub fn results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.results_dir = dir.into();
        self
    }

    pub fn errors_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.errors_dir = dir.into();
        self
    }

    pub fn index_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.index_file = path.into();
        self
    }

    pub fn summary_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.summary_file = path.into();
        self
    }

    pub fn dedupe_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.dedupe_file = path.into();
        self
    }

    pub fn types_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.types_file = path.into();
        self
    }

    pub fn analyses_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.analyses_file = path.into();
        self
    }

    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn InferenceProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.config.limit = Some(n);
        self
    }

    pub fn resume(mut self, v: bool) -> Self {
        self.config.resume = v;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn entity_batch_size(mut self, n: usize) -> Self {
        self.config.entity_batch_size = n.max(1);
        self
    }

    pub fn type_batch_size(mut self, n: usize) -> Self {
        self.config.type_batch_size = n.max(1);
        self
    }

    pub fn analysis_text_limit(mut self, n: usize) -> Self {
        self.config.analysis_text_limit = n;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PagesiftError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(PagesiftError::InvalidConfig("concurrency must be ≥ 1".into()));
        }
        if c.entity_batch_size == 0 || c.type_batch_size == 0 {
            return Err(PagesiftError::InvalidConfig("batch size must be ≥ 1".into()));
        }
        if c.max_tokens == 0 {
            return Err(PagesiftError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = PipelineConfig::default();
        assert_eq!(c.concurrency, 5);
        assert!(c.resume);
        assert_eq!(c.entity_batch_size, 50);
        assert_eq!(c.type_batch_size, 100);
    }

    #[test]
    fn builder_clamps_concurrency() {
        let c = PipelineConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn builder_sets_paths() {
        let c = PipelineConfig::builder()
            .input_dir("/scans")
            .results_dir("/out")
            .limit(10)
            .resume(false)
            .build()
            .unwrap();
        assert_eq!(c.input_dir, PathBuf::from("/scans"));
        assert_eq!(c.results_dir, PathBuf::from("/out"));
        assert_eq!(c.limit, Some(10));
        assert!(!c.resume);
    }

    #[test]
    fn chat_options_mirror_config() {
        let c = PipelineConfig::builder().temperature(0.3).max_tokens(2048).build().unwrap();
        let opts = c.chat_options();
        assert_eq!(opts.temperature, Some(0.3));
        assert_eq!(opts.max_tokens, Some(2048));
    }
}
