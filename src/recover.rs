//! Response recovery: coerce a free-text model reply into valid JSON.
//!
//! Models answer with prose around the object, markdown fencing, or replies
//! truncated mid-stream. The ladder below is attempted in order, first
//! success wins:
//!
//! 1. content of a fenced ` ```json ` block
//! 2. the outermost `{ … }` span (first `{` to last `}`)
//! 3. textual fence stripping
//! 4. parse
//! 5. balanced-brace scan from the first `{` for the shortest complete
//!    top-level object
//! 6. repair mode — replay the original request plus the broken reply and an
//!    explicit correction instruction, then parse that response (no further
//!    recursion)
//!
//! Steps 1–5 are pure ([`recover_json`]); step 6 ([`repair_json`]) is the
//! only one that talks to the service. When everything fails the caller is
//! expected to preserve the *original* reply verbatim for diagnosis.

use crate::inference::{ChatMessage, ChatOptions, InferenceProvider};
use crate::prompts;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Terminal recovery failure. Carries the parse error from the last rung so
/// repair mode can quote it back to the model.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct RecoverError(pub String);

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*\n(.*?)\n```").unwrap());

/// Rung 1: content between a fenced code-block delimiter pair.
fn extract_fenced(content: &str) -> Option<String> {
    RE_FENCED
        .captures(content)
        .map(|caps| caps[1].trim().to_string())
}

/// Rung 2: the outermost brace-delimited span, by naive first-`{` /
/// last-`}` matching.
fn extract_braced(content: &str) -> Option<String> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| content[start..=end].trim().to_string())
}

/// Rung 3: strip leading/trailing fence markers textually.
fn strip_fences(content: &str) -> String {
    let mut s = content.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim().to_string()
}

/// Rung 5: balanced-brace scan from the first `{` — returns the shortest
/// complete top-level object, which salvages replies with trailing garbage
/// or a second, truncated object.
fn balanced_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let bytes = content.as_bytes();
    let mut depth = 0usize;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&content[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Run the pure rungs of the ladder (1–5) over a raw reply.
pub fn recover_json(raw: &str) -> Result<Value, RecoverError> {
    let content = raw.trim();

    let candidate = if let Some(fenced) = extract_fenced(content) {
        fenced
    } else if let Some(braced) = extract_braced(content) {
        braced
    } else {
        strip_fences(content)
    };

    match serde_json::from_str::<Value>(&candidate) {
        Ok(value) => Ok(value),
        Err(parse_err) => {
            if let Some(span) = balanced_object(&candidate) {
                if let Ok(value) = serde_json::from_str::<Value>(span) {
                    debug!("recovered JSON via balanced-brace scan");
                    return Ok(value);
                }
            }
            Err(RecoverError(parse_err.to_string()))
        }
    }
}

/// Rung 6: ask the model to fix its own broken reply.
///
/// Replays `base_messages` (the original request), the broken assistant
/// reply, and a correction instruction quoting the parse error. The repair
/// reply gets the textual extraction rungs only — a broken repair is
/// terminal, never retried.
pub async fn repair_json(
    provider: &Arc<dyn InferenceProvider>,
    base_messages: &[ChatMessage],
    broken_reply: &str,
    parse_error: &str,
    options: &ChatOptions,
) -> Result<Value, RecoverError> {
    let mut messages = base_messages.to_vec();
    messages.push(ChatMessage::assistant(broken_reply));
    messages.push(ChatMessage::user(prompts::repair_instruction(parse_error)));

    let response = provider
        .chat(&messages, options)
        .await
        .map_err(|e| RecoverError(format!("repair call failed: {e}")))?;

    let content = response.content.trim();
    let candidate = extract_fenced(content)
        .or_else(|| extract_braced(content))
        .unwrap_or_else(|| content.to_string());

    serde_json::from_str::<Value>(&candidate)
        .map_err(|e| RecoverError(format!("repair reply still invalid: {e}")))
}
