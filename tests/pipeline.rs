//! End-to-end pipeline tests against a scripted in-process inference service.
//!
//! No network, no live model: the "pages" are tiny text files whose bytes
//! script the mock provider's reply, so every path through extraction,
//! recovery, repair, persistence, and resume can be driven deterministically.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use pagesift::{
    apply_cleanup, dedupe_entities, find_failures, group_documents, load_records, process_images,
    ChatMessage, ChatOptions, ChatResponse, InferenceError, InferenceProvider, PipelineConfig,
    Role,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Write one fake page image whose bytes script the mock's reply.
fn write_page(root: &Path, rel: &str, script: &str) {
    let path = root.join("downloads").join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, script).unwrap();
}

fn test_config(root: &Path, provider: Arc<dyn InferenceProvider>) -> PipelineConfig {
    PipelineConfig::builder()
        .input_dir(root.join("downloads"))
        .results_dir(root.join("results"))
        .errors_dir(root.join("errors"))
        .index_file(root.join("processing_index.json"))
        .summary_file(root.join("processed_results.json"))
        .dedupe_file(root.join("dedupe.json"))
        .types_file(root.join("dedupe_types.json"))
        .analyses_file(root.join("analyses.json"))
        .provider(provider)
        .concurrency(3)
        .build()
        .unwrap()
}

/// A well-formed extraction reply for a `doc|page|person` script.
fn record_reply(doc: &str, page: &str, person: &str) -> String {
    json!({
        "document_metadata": {
            "document_number": doc,
            "page_number": page,
            "document_type": "Letter"
        },
        "full_text": format!("Page {page} of document {doc}."),
        "text_blocks": [{"type": "printed", "content": "body", "position": "middle"}],
        "entities": {
            "people": [person],
            "organizations": [],
            "locations": [],
            "dates": [],
            "reference_numbers": []
        }
    })
    .to_string()
}

// ── Mock providers ───────────────────────────────────────────────────────────

/// Replies according to the page bytes embedded in the request's data URI:
///
/// - `FAIL_TRANSPORT`         → transport error
/// - `GARBAGE`                → prose with no JSON, on extraction and repair
/// - `FENCED:doc|page|name`   → good JSON buried in a markdown fence
/// - `BROKEN_THEN_OK:d|p|n`   → truncated JSON first, good JSON on repair
/// - `doc|page|name`          → good JSON directly
struct PageModel {
    calls: AtomicUsize,
}

impl PageModel {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceProvider for PageModel {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<ChatResponse, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let data_uri = messages
            .iter()
            .find_map(|m| m.image.as_deref())
            .ok_or_else(|| InferenceError::Api("request carries no image".into()))?;
        let payload = data_uri.rsplit(',').next().unwrap_or("");
        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;
        let script = String::from_utf8_lossy(&bytes).to_string();
        let repairing = messages.iter().any(|m| m.role == Role::Assistant);

        let content = if script == "FAIL_TRANSPORT" {
            return Err(InferenceError::Network("connection reset by peer".into()));
        } else if script == "GARBAGE" {
            "The page is too faded to read, sorry.".to_string()
        } else if let Some(rest) = script.strip_prefix("FENCED:") {
            let [doc, page, person] = split_script(rest);
            format!(
                "Here is the extraction you asked for:\n```json\n{}\n```\nLet me know!",
                record_reply(doc, page, person)
            )
        } else if let Some(rest) = script.strip_prefix("BROKEN_THEN_OK:") {
            let [doc, page, person] = split_script(rest);
            if repairing {
                record_reply(doc, page, person)
            } else {
                r#"Sure! {"document_metadata": {"page_number""#.to_string()
            }
        } else {
            let [doc, page, person] = split_script(&script);
            record_reply(doc, page, person)
        };

        Ok(ChatResponse {
            content,
            prompt_tokens: 0,
            completion_tokens: 0,
        })
    }
}

fn split_script(script: &str) -> [&str; 3] {
    let mut parts = script.splitn(3, '|');
    [
        parts.next().unwrap_or(""),
        parts.next().unwrap_or(""),
        parts.next().unwrap_or(""),
    ]
}

/// Pops one pre-canned reply per chat call.
struct ScriptedModel {
    replies: Mutex<Vec<Result<String, InferenceError>>>,
}

impl ScriptedModel {
    fn new(replies: Vec<Result<String, InferenceError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies),
        })
    }
}

#[async_trait]
impl InferenceProvider for ScriptedModel {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<ChatResponse, InferenceError> {
        let mut replies = self.replies.lock().unwrap();
        assert!(!replies.is_empty(), "more chat calls than scripted replies");
        replies.remove(0).map(|content| ChatResponse {
            content,
            prompt_tokens: 0,
            completion_tokens: 0,
        })
    }
}

// ── Extraction and persistence ───────────────────────────────────────────────

#[tokio::test]
async fn extracts_pages_and_mirrors_results() {
    let tmp = TempDir::new().unwrap();
    write_page(tmp.path(), "box1/page_0001.jpg", "7|1|Jane Roe");
    write_page(tmp.path(), "box1/page_0002.jpg", "7|2|John Doe");
    write_page(tmp.path(), "box2/page_0001.png", "9|1|Jane Roe");

    let model = PageModel::new();
    let config = test_config(tmp.path(), model.clone());
    let summary = process_images(&config).await.unwrap();

    assert_eq!(summary.total_processed, 3);
    assert_eq!(summary.successful, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(model.calls(), 3);

    // Results mirror the input tree, extension replaced by .json.
    let out = tmp.path().join("results/box1/page_0002.json");
    let record: Value = serde_json::from_str(&std::fs::read_to_string(out).unwrap()).unwrap();
    assert_eq!(record["document_metadata"]["document_number"], "7");
    assert_eq!(record["entities"]["people"][0], "John Doe");

    // Summary file written.
    let summary_file = tmp.path().join("processed_results.json");
    let written: Value =
        serde_json::from_str(&std::fs::read_to_string(summary_file).unwrap()).unwrap();
    assert_eq!(written["successful"], 3);
    assert_eq!(written["results"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn second_run_dispatches_nothing() {
    let tmp = TempDir::new().unwrap();
    write_page(tmp.path(), "a.jpg", "1|1|Jane Roe");
    write_page(tmp.path(), "b.jpg", "1|2|Jane Roe");

    let model = PageModel::new();
    let config = test_config(tmp.path(), model.clone());
    process_images(&config).await.unwrap();
    assert_eq!(model.calls(), 2);

    let again = process_images(&config).await.unwrap();
    assert_eq!(model.calls(), 2, "resume must not re-dispatch processed items");
    assert_eq!(again.total_processed, 0);
    assert_eq!(again.skipped, 2);
}

#[tokio::test]
async fn fenced_reply_recovered_without_repair() {
    let tmp = TempDir::new().unwrap();
    write_page(tmp.path(), "a.jpg", "FENCED:3|1|Jane Roe");

    let model = PageModel::new();
    let config = test_config(tmp.path(), model.clone());
    let summary = process_images(&config).await.unwrap();

    assert_eq!(summary.successful, 1);
    assert_eq!(model.calls(), 1, "cheap rungs must not trigger a repair call");
    assert!(tmp.path().join("results/a.json").exists());
}

#[tokio::test]
async fn repair_round_recovers_broken_reply() {
    let tmp = TempDir::new().unwrap();
    write_page(tmp.path(), "a.jpg", "BROKEN_THEN_OK:3|1|Jane Roe");

    let model = PageModel::new();
    let config = test_config(tmp.path(), model.clone());
    let summary = process_images(&config).await.unwrap();

    assert_eq!(summary.successful, 1);
    assert_eq!(model.calls(), 2, "exactly one repair round");
    let record: Value = serde_json::from_str(
        &std::fs::read_to_string(tmp.path().join("results/a.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(record["document_metadata"]["document_number"], "3");
}

#[tokio::test]
async fn unrecoverable_reply_saved_to_errors_dir() {
    let tmp = TempDir::new().unwrap();
    write_page(tmp.path(), "box1/bad.jpg", "GARBAGE");

    let model = PageModel::new();
    let config = test_config(tmp.path(), model.clone());
    let summary = process_images(&config).await.unwrap();

    assert_eq!(summary.successful, 0);
    assert_eq!(summary.failed, 1);
    assert_eq!(model.calls(), 2, "extraction plus one repair attempt");

    // Exactly one side effect: the raw reply under errors/, no result file.
    let raw = std::fs::read_to_string(tmp.path().join("errors/box1/bad.jpg.txt")).unwrap();
    assert!(raw.contains("too faded"));
    assert!(!tmp.path().join("results/box1/bad.json").exists());

    // The item is marked so the next run does not retry it automatically.
    let again = process_images(&config).await.unwrap();
    assert_eq!(again.total_processed, 0);
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn transport_failure_released_by_cleanup() {
    let tmp = TempDir::new().unwrap();
    write_page(tmp.path(), "flaky.jpg", "FAIL_TRANSPORT");

    let model = PageModel::new();
    let config = test_config(tmp.path(), model.clone());
    let summary = process_images(&config).await.unwrap();
    assert_eq!(summary.failed, 1);

    // The audit sees it both ways: marked processed with no output, and on
    // the failure list.
    let report = find_failures(&config).unwrap();
    assert!(report.retryable().contains("flaky.jpg"));
    assert!(!report.is_clean());

    let removed = apply_cleanup(&config, &report, false).unwrap();
    assert_eq!(removed, 1);

    // The endpoint recovered; the released item is picked up again.
    write_page(tmp.path(), "flaky.jpg", "5|1|Jane Roe");
    let retry = process_images(&config).await.unwrap();
    assert_eq!(retry.successful, 1);
    assert!(tmp.path().join("results/flaky.json").exists());
}

// ── Grouping ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn grouping_unifies_identifier_spellings_and_orders_pages() {
    let tmp = TempDir::new().unwrap();
    // Same document under three spellings, pages arriving out of order.
    write_page(tmp.path(), "p1.jpg", "7 |2|Jane Roe");
    write_page(tmp.path(), "p2.jpg", "07|1|John Doe");
    write_page(tmp.path(), "p3.jpg", "7|3|Jane Roe");

    let config = test_config(tmp.path(), PageModel::new());
    process_images(&config).await.unwrap();

    let records = load_records(&tmp.path().join("results")).unwrap();
    let docs = group_documents(&records);

    assert_eq!(docs.len(), 1, "all three spellings share one key");
    let doc = &docs[0];
    assert_eq!(doc.page_count(), 3);
    assert_eq!(doc.page_identities, vec!["p2.jpg", "p1.jpg", "p3.jpg"]);
    assert!(doc.full_text.contains("Page 1"));
    assert!(
        doc.full_text.find("Page 1").unwrap() < doc.full_text.find("Page 2").unwrap(),
        "pages concatenated in page order"
    );
    assert_eq!(doc.entities.people, vec!["Jane Roe", "John Doe"]);
    assert_eq!(doc.document_types, vec!["Letter"]);
}

// ── Canonicalization over the results tree ───────────────────────────────────

#[tokio::test]
async fn dedupe_entities_is_total_and_persists_mapping() {
    let tmp = TempDir::new().unwrap();
    write_page(tmp.path(), "p1.jpg", "1|1|J. Epstein");
    write_page(tmp.path(), "p2.jpg", "2|1|Jeffrey Epstein");
    let config = test_config(tmp.path(), PageModel::new());
    process_images(&config).await.unwrap();

    // One people batch; a single surviving canonical skips convergence.
    let canon = ScriptedModel::new(vec![Ok(json!({
        "Jeffrey Epstein": ["J. Epstein", "Jeffrey Epstein"]
    })
    .to_string())]);
    let dedupe_config = PipelineConfig::builder()
        .results_dir(tmp.path().join("results"))
        .dedupe_file(tmp.path().join("dedupe.json"))
        .provider(canon)
        .build()
        .unwrap();

    let mappings = dedupe_entities(&dedupe_config).await.unwrap();
    assert_eq!(
        mappings.people.get("J. Epstein").map(String::as_str),
        Some("Jeffrey Epstein")
    );
    assert_eq!(
        mappings.people.get("Jeffrey Epstein").map(String::as_str),
        Some("Jeffrey Epstein")
    );
    assert!(mappings.organizations.is_empty());

    let written: Value =
        serde_json::from_str(&std::fs::read_to_string(tmp.path().join("dedupe.json")).unwrap())
            .unwrap();
    assert_eq!(written["people"]["J. Epstein"], "Jeffrey Epstein");
}

#[tokio::test]
async fn dedupe_survives_a_failing_batch() {
    let tmp = TempDir::new().unwrap();
    write_page(tmp.path(), "p1.jpg", "1|1|Jane Roe");
    let config = test_config(tmp.path(), PageModel::new());
    process_images(&config).await.unwrap();

    // The single people batch fails at transport level; every label must
    // still map, to itself.
    let canon = ScriptedModel::new(vec![Err(InferenceError::Network("boom".into()))]);
    let dedupe_config = PipelineConfig::builder()
        .results_dir(tmp.path().join("results"))
        .dedupe_file(tmp.path().join("dedupe.json"))
        .provider(canon)
        .build()
        .unwrap();

    let mappings = dedupe_entities(&dedupe_config).await.unwrap();
    assert_eq!(
        mappings.people.get("Jane Roe").map(String::as_str),
        Some("Jane Roe")
    );
}
