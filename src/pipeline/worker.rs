//! Per-item worker: prompt, call the vision model, recover JSON, repair once.

use crate::error::ItemError;
use crate::inference::{ChatMessage, ChatOptions, InferenceProvider};
use crate::pipeline::encode::encode_data_uri;
use crate::pipeline::scan::InputItem;
use crate::prompts::{EXTRACTION_SYSTEM_PROMPT, EXTRACTION_USER_PROMPT};
use crate::recover::{recover_json, repair_json};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// The decision the worker reached for one item.
///
/// Every variant is terminal for this run: the dispatcher marks the item
/// processed (or records the failure) and moves on. Item failures never
/// abort the batch.
pub(crate) enum WorkOutcome {
    /// A record was recovered; the dispatcher persists it verbatim.
    Extracted(Value),
    /// The model replied but no JSON could be recovered even after one
    /// repair round. The raw reply is kept so the dispatcher can write an
    /// error artifact for offline inspection.
    Unrecoverable { raw_reply: String, error: ItemError },
    /// The item never produced a reply (unreadable file, transport error).
    /// No artifact is written; only the failure list records it.
    Failed(ItemError),
}

/// Process one item end-to-end against `provider`.
///
/// The recovery ladder runs first on the raw reply; if every rung fails,
/// the same conversation is replayed once with the broken reply appended as
/// an assistant turn and a repair instruction as the final user turn. The
/// repaired reply gets the cheap extraction rungs but no further repair
/// round, so the worker issues at most two requests per item.
pub(crate) async fn process_item(
    provider: &Arc<dyn InferenceProvider>,
    item: &InputItem,
    options: &ChatOptions,
) -> WorkOutcome {
    let data_uri = match encode_data_uri(&item.path, &item.identity) {
        Ok(uri) => uri,
        Err(e) => return WorkOutcome::Failed(e),
    };

    let messages = vec![
        ChatMessage::system(EXTRACTION_SYSTEM_PROMPT),
        ChatMessage::user_with_image(EXTRACTION_USER_PROMPT, data_uri),
    ];

    let reply = match provider.chat(&messages, options).await {
        Ok(resp) => resp.content,
        Err(e) => {
            return WorkOutcome::Failed(ItemError::InferenceFailed {
                identity: item.identity.clone(),
                detail: e.to_string(),
            })
        }
    };

    match recover_json(&reply) {
        Ok(value) => {
            debug!(identity = %item.identity, "recovered record from reply");
            WorkOutcome::Extracted(value)
        }
        Err(parse_err) => {
            warn!(
                identity = %item.identity,
                error = %parse_err,
                "reply not parseable, attempting model-assisted repair"
            );
            match repair_json(provider, &messages, &reply, &parse_err.0, options).await {
                Ok(value) => {
                    debug!(identity = %item.identity, "repair round produced valid JSON");
                    WorkOutcome::Extracted(value)
                }
                Err(repair_err) => WorkOutcome::Unrecoverable {
                    raw_reply: reply,
                    error: ItemError::Unrecoverable {
                        identity: item.identity.clone(),
                        detail: format!("parse: {parse_err}; repair: {repair_err}"),
                    },
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{ChatResponse, InferenceError, Role};
    use async_trait::async_trait;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Replays a scripted sequence of replies, one per call.
    struct ScriptedProvider {
        replies: Mutex<Vec<Result<String, InferenceError>>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<String, InferenceError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl InferenceProvider for ScriptedProvider {
        async fn chat(
            &self,
            messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<ChatResponse, InferenceError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            let content = self.replies.lock().unwrap().remove(0)?;
            Ok(ChatResponse {
                content,
                prompt_tokens: 0,
                completion_tokens: 0,
            })
        }
    }

    fn item_with_file(dir: &TempDir) -> InputItem {
        let path = dir.path().join("page.jpg");
        fs::write(&path, b"jpegbytes").unwrap();
        InputItem {
            path,
            identity: "page.jpg".to_string(),
        }
    }

    #[tokio::test]
    async fn clean_reply_is_extracted_in_one_call() {
        let dir = TempDir::new().unwrap();
        let provider: Arc<dyn InferenceProvider> = Arc::new(ScriptedProvider::new(vec![Ok(
            r#"{"full_text": "hello"}"#.to_string(),
        )]));
        let outcome = process_item(&provider, &item_with_file(&dir), &ChatOptions::default()).await;
        match outcome {
            WorkOutcome::Extracted(v) => assert_eq!(v["full_text"], "hello"),
            _ => panic!("expected extraction"),
        }
    }

    #[tokio::test]
    async fn repair_round_replays_broken_reply_as_assistant_turn() {
        let dir = TempDir::new().unwrap();
        let scripted = Arc::new(ScriptedProvider::new(vec![
            Ok("totally not json".to_string()),
            Ok(r#"{"full_text": "fixed"}"#.to_string()),
        ]));
        let provider: Arc<dyn InferenceProvider> = scripted.clone();

        let outcome = process_item(&provider, &item_with_file(&dir), &ChatOptions::default()).await;
        match outcome {
            WorkOutcome::Extracted(v) => assert_eq!(v["full_text"], "fixed"),
            _ => panic!("expected repaired extraction"),
        }

        let seen = scripted.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        // Second conversation carries the broken reply back to the model.
        let second = &seen[1];
        assert_eq!(second.len(), 4);
        assert_eq!(second[2].role, Role::Assistant);
        assert_eq!(second[2].text, "totally not json");
        assert_eq!(second[3].role, Role::User);
    }

    #[tokio::test]
    async fn failed_repair_is_unrecoverable_with_original_reply() {
        let dir = TempDir::new().unwrap();
        let provider: Arc<dyn InferenceProvider> = Arc::new(ScriptedProvider::new(vec![
            Ok("garbage one".to_string()),
            Ok("garbage two".to_string()),
        ]));
        let outcome = process_item(&provider, &item_with_file(&dir), &ChatOptions::default()).await;
        match outcome {
            WorkOutcome::Unrecoverable { raw_reply, error } => {
                assert_eq!(raw_reply, "garbage one");
                assert_eq!(error.identity(), "page.jpg");
            }
            _ => panic!("expected unrecoverable"),
        }
    }

    #[tokio::test]
    async fn transport_error_is_a_plain_failure() {
        let dir = TempDir::new().unwrap();
        let provider: Arc<dyn InferenceProvider> = Arc::new(ScriptedProvider::new(vec![Err(
            InferenceError::Network("connection refused".to_string()),
        )]));
        let outcome = process_item(&provider, &item_with_file(&dir), &ChatOptions::default()).await;
        match outcome {
            WorkOutcome::Failed(ItemError::InferenceFailed { identity, .. }) => {
                assert_eq!(identity, "page.jpg");
            }
            _ => panic!("expected inference failure"),
        }
    }

    #[tokio::test]
    async fn unreadable_file_never_reaches_the_provider() {
        let scripted = Arc::new(ScriptedProvider::new(vec![]));
        let provider: Arc<dyn InferenceProvider> = scripted.clone();
        let item = InputItem {
            path: PathBuf::from("/no/such/page.jpg"),
            identity: "page.jpg".to_string(),
        };
        let outcome = process_item(&provider, &item, &ChatOptions::default()).await;
        assert!(matches!(
            outcome,
            WorkOutcome::Failed(ItemError::ReadFailed { .. })
        ));
        assert!(scripted.seen.lock().unwrap().is_empty());
    }
}
