//! CLI binary for pagesift.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pagesift::{
    analyze_documents, apply_cleanup, dedupe_document_types, dedupe_entities, find_failures,
    process_images, PipelineConfig, ProgressCallback, RunProgressCallback,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus per-item log lines. Items
/// complete out of order, so every line carries its own identity.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_run_start
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Scanning");
        bar.set_message("enumerating images…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_items: usize, skipped_items: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total_items as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
        if skipped_items > 0 {
            self.bar.println(format!(
                "{} {}",
                cyan("◆"),
                dim(&format!("{skipped_items} already processed, skipping"))
            ));
        }
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_items} pages…"))
        ));
    }

    fn on_item_start(&self, identity: &str) {
        self.bar.set_message(identity.to_string());
    }

    fn on_item_complete(&self, identity: &str, _done: usize, _total: usize) {
        self.bar
            .println(format!("  {} {}", green("✓"), dim(identity)));
        self.bar.inc(1);
    }

    fn on_item_error(&self, identity: &str, error: &str, _done: usize, _total: usize) {
        let msg = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {}  {}", red("✗"), identity, red(&msg)));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_items: usize, success_count: usize, failure_count: usize) {
        self.bar.finish_and_clear();
        if failure_count == 0 {
            eprintln!(
                "{} {} pages extracted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages extracted  ({} failed)",
                if success_count == 0 { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total_items,
                red(&failure_count.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract every new page image under ./downloads
  pagesift process

  # First 100 pages, 8 concurrent requests, against a local vLLM endpoint
  pagesift --api-url http://localhost:8000/v1 process --limit 100 -c 8

  # Ignore the index and reprocess everything
  pagesift process --no-resume

  # Canonicalize entities, then document types
  pagesift dedupe
  pagesift dedupe-types

  # Summarise each grouped document (resumable; --force starts over)
  pagesift analyze --limit 20

  # Audit the index against the results tree (dry run), then apply
  pagesift cleanup
  pagesift cleanup --doit --delete-invalid-json

ENVIRONMENT VARIABLES:
  PAGESIFT_API_URL   OpenAI-compatible endpoint base URL (preferred)
  OPENAI_API_URL     Endpoint base URL (fallback)
  OPENAI_API_KEY     API key
  OPENAI_MODEL       Model ID (default: meta-llama/Llama-4-Maverick-17B-128E-Instruct)

FILES:
  processing_index.json   crash-safe work index (per-item, atomic rewrite)
  results/                per-page extraction JSON, mirroring downloads/
  errors/                 raw replies that defeated the recovery ladder
  processed_results.json  run summary
  dedupe.json             entity canonical mappings
  dedupe_types.json       document-type canonical mappings + stats
  analyses.json           per-document analyses
"#;

/// Extract structured data from scanned page images with a vision LLM.
#[derive(Parser, Debug)]
#[command(
    name = "pagesift",
    version,
    about = "Extract structured data from scanned page images with a vision LLM",
    long_about = "Send scanned page images to an OpenAI-compatible vision model, recover \
structured JSON from noisy replies, and reconcile the per-page records into documents with \
canonicalized entities. Every stage is resumable and survives per-item failures.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// OpenAI-compatible API base URL.
    #[arg(long, global = true, env = "PAGESIFT_API_URL")]
    api_url: Option<String>,

    /// API key.
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model ID.
    #[arg(long, global = true, env = "OPENAI_MODEL")]
    model: Option<String>,

    /// Work index file.
    #[arg(long, global = true, default_value = "processing_index.json")]
    index: PathBuf,

    /// Input directory of page images.
    #[arg(long, global = true, default_value = "./downloads")]
    input_dir: PathBuf,

    /// Per-page extraction output directory.
    #[arg(long, global = true, default_value = "./results")]
    results_dir: PathBuf,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract structured records from new page images.
    Process {
        /// Number of concurrent inference requests.
        #[arg(short, long, env = "PAGESIFT_CONCURRENCY", default_value_t = 5)]
        concurrency: usize,

        /// Process at most this many new pages.
        #[arg(short, long)]
        limit: Option<usize>,

        /// Ignore the work index and process everything.
        #[arg(long)]
        no_resume: bool,

        /// Directory for raw unrecoverable replies.
        #[arg(long, default_value = "./errors")]
        errors_dir: PathBuf,

        /// Run summary output file.
        #[arg(short, long, default_value = "processed_results.json")]
        output: PathBuf,

        /// Sampling temperature (0.0–2.0).
        #[arg(long, default_value_t = 0.1)]
        temperature: f32,

        /// Max model output tokens per page.
        #[arg(long, default_value_t = 4096)]
        max_tokens: usize,

        /// Per-request timeout in seconds.
        #[arg(long, env = "PAGESIFT_API_TIMEOUT", default_value_t = 120)]
        api_timeout: u64,

        /// Disable the progress bar.
        #[arg(long)]
        no_progress: bool,
    },

    /// Canonicalize people, organizations, and locations across all results.
    Dedupe {
        /// Labels per batch sent to the model.
        #[arg(long, default_value_t = 50)]
        batch_size: usize,

        /// Mapping output file.
        #[arg(short, long, default_value = "dedupe.json")]
        output: PathBuf,
    },

    /// Canonicalize document-type labels across all results.
    DedupeTypes {
        /// Labels per batch sent to the model.
        #[arg(long, default_value_t = 100)]
        batch_size: usize,

        /// Mapping output file.
        #[arg(short, long, default_value = "dedupe_types.json")]
        output: PathBuf,
    },

    /// Group pages into documents and generate per-document analyses.
    Analyze {
        /// Analyze at most this many documents.
        #[arg(short, long)]
        limit: Option<usize>,

        /// Discard prior analyses and start over.
        #[arg(long)]
        force: bool,

        /// Analyses output file.
        #[arg(short, long, default_value = "analyses.json")]
        output: PathBuf,
    },

    /// Audit the work index against the results tree; release failures for retry.
    Cleanup {
        /// Actually perform the cleanup (default: dry run).
        #[arg(long)]
        doit: bool,

        /// Also delete corrupt result files.
        #[arg(long)]
        delete_invalid_json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Suppress INFO-level library logs when the progress bar is live; the
    // bar is the feedback channel.
    let show_progress = matches!(
        cli.command,
        Command::Process { no_progress: false, .. }
    ) && !cli.quiet;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Process {
            concurrency,
            limit,
            no_resume,
            errors_dir,
            output,
            temperature,
            max_tokens,
            api_timeout,
            no_progress,
        } => {
            let progress: Option<ProgressCallback> = if show_progress && !no_progress {
                let cb: ProgressCallback = CliProgressCallback::new();
                Some(cb)
            } else {
                None
            };

            let mut builder = base_builder(&cli)
                .errors_dir(errors_dir)
                .summary_file(output)
                .concurrency(*concurrency)
                .resume(!no_resume)
                .temperature(*temperature)
                .max_tokens(*max_tokens)
                .api_timeout_secs(*api_timeout);
            if let Some(n) = limit {
                builder = builder.limit(*n);
            }
            if let Some(cb) = progress {
                builder = builder.progress_callback(cb);
            }
            let config = builder.build().context("Invalid configuration")?;

            let summary = process_images(&config).await.context("Extraction failed")?;
            if !cli.quiet && !show_progress {
                eprintln!(
                    "Processed {} pages: {} ok, {} failed ({} skipped)",
                    summary.total_processed, summary.successful, summary.failed, summary.skipped
                );
            }
            if summary.successful == 0 && summary.failed > 0 {
                std::process::exit(1);
            }
        }

        Command::Dedupe { batch_size, output } => {
            let config = base_builder(&cli)
                .entity_batch_size(*batch_size)
                .dedupe_file(output)
                .build()
                .context("Invalid configuration")?;
            let mappings = dedupe_entities(&config).await.context("Deduplication failed")?;
            if !cli.quiet {
                for (noun, map) in [
                    ("people", &mappings.people),
                    ("organizations", &mappings.organizations),
                    ("locations", &mappings.locations),
                ] {
                    let unique: std::collections::BTreeSet<&String> = map.values().collect();
                    eprintln!(
                        "  {noun}: {} → {} unique",
                        map.len(),
                        bold(&unique.len().to_string())
                    );
                }
                eprintln!("{} mappings saved to {}", green("✔"), output.display());
            }
        }

        Command::DedupeTypes { batch_size, output } => {
            let config = base_builder(&cli)
                .type_batch_size(*batch_size)
                .types_file(output)
                .build()
                .context("Invalid configuration")?;
            let report = dedupe_document_types(&config)
                .await
                .context("Type deduplication failed")?;
            if !cli.quiet {
                eprintln!(
                    "{} {} types → {} canonical ({}% reduction) saved to {}",
                    green("✔"),
                    report.stats.original_types,
                    bold(&report.stats.canonical_types.to_string()),
                    report.stats.reduction_percentage,
                    output.display()
                );
            }
        }

        Command::Analyze { limit, force, output } => {
            let mut builder = base_builder(&cli).analyses_file(output);
            if let Some(n) = limit {
                builder = builder.limit(*n);
            }
            let config = builder.build().context("Invalid configuration")?;
            let summary = analyze_documents(&config, *force)
                .await
                .context("Analysis failed")?;
            if !cli.quiet {
                eprintln!(
                    "{} {} analyzed, {} already done, {} failed  →  {}",
                    green("✔"),
                    bold(&summary.analyzed.to_string()),
                    summary.skipped,
                    summary.failed,
                    output.display()
                );
            }
        }

        Command::Cleanup {
            doit,
            delete_invalid_json,
        } => {
            let config = base_builder(&cli).build().context("Invalid configuration")?;
            let report = find_failures(&config).context("Audit failed")?;

            print_failure_report(&report);
            if report.is_clean() {
                eprintln!("{} No failures found", green("✔"));
                return Ok(());
            }

            if !doit {
                eprintln!(
                    "\n{} Dry run only — re-run with {} to release these for retry",
                    dim("·"),
                    bold("--doit")
                );
                return Ok(());
            }

            if !confirm("Remove these identities from the processed list? (yes/no): ")? {
                eprintln!("{} Cleanup cancelled", red("✘"));
                return Ok(());
            }
            let removed = apply_cleanup(&config, &report, *delete_invalid_json)
                .context("Cleanup failed")?;
            eprintln!(
                "{} {} identities released; they will be retried on the next run",
                green("✔"),
                bold(&removed.to_string())
            );
        }
    }

    Ok(())
}

/// Shared builder from the global flags.
fn base_builder(cli: &Cli) -> pagesift::PipelineConfigBuilder {
    let mut builder = PipelineConfig::builder()
        .input_dir(&cli.input_dir)
        .results_dir(&cli.results_dir)
        .index_file(&cli.index);
    if let Some(ref url) = cli.api_url {
        builder = builder.api_url(url);
    }
    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    builder
}

fn print_failure_report(report: &pagesift::FailureReport) {
    let sections: [(&str, &Vec<String>); 4] = [
        ("NO OUTPUT (marked processed, no result file)", &report.no_output),
        ("INVALID OUTPUT (result file is not valid JSON)", &report.invalid_output),
        ("EXPLICITLY FAILED (listed in the index)", &report.explicit_failed),
        ("ORPHANED (result file the index never saw)", &report.orphaned),
    ];
    for (title, items) in sections {
        if items.is_empty() {
            continue;
        }
        eprintln!("\n{} ({} files)", bold(title), items.len());
        for item in items.iter().take(10) {
            eprintln!("  - {item}");
        }
        if items.len() > 10 {
            eprintln!("  {} and {} more", dim("…"), items.len() - 10);
        }
    }
    eprintln!(
        "\n{}",
        bold(&format!("TOTAL RETRYABLE: {}", report.retryable().len()))
    );
}

/// Interactive yes/no gate for the destructive path.
fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt}");
    io::stderr().flush().ok();
    let mut answer = String::new();
    io::stdin()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    Ok(answer.trim().eq_ignore_ascii_case("yes"))
}
