//! Image encoding: file bytes to a base64 data URI for multimodal requests.

use crate::error::ItemError;
use base64::Engine;
use std::path::Path;

/// Read `path` and produce a `data:<mime>;base64,<payload>` URI.
///
/// The MIME type is inferred from the file extension alone; the endpoint
/// decodes the payload itself, so a mismatch only matters to servers that
/// validate the header.
pub(crate) fn encode_data_uri(path: &Path, identity: &str) -> Result<String, ItemError> {
    let bytes = std::fs::read(path).map_err(|e| ItemError::ReadFailed {
        identity: identity.to_string(),
        detail: e.to_string(),
    })?;
    let payload = base64::engine::general_purpose::STANDARD.encode(&bytes);
    Ok(format!("data:{};base64,{}", mime_for(path), payload))
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("tiff") => "image/tiff",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}
