//! Input discovery: walk the input tree and enumerate page images.

use crate::error::PagesiftError;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Extensions recognised as page images, compared case-insensitively.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp"];

/// One candidate work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InputItem {
    /// Absolute (or caller-relative) path on disk.
    pub path: PathBuf,
    /// Path relative to the input root with `/` separators. This string is
    /// the item's identity everywhere: the work index, the mirrored result
    /// path, and log lines.
    pub identity: String,
}

/// Recursively enumerate image files under `input_dir`, sorted by identity.
///
/// Sorting makes run ordering deterministic, which keeps `--limit N`
/// meaningful across invocations: the same prefix of the corpus is selected
/// every time.
pub(crate) fn discover_images(input_dir: &Path) -> Result<Vec<InputItem>, PagesiftError> {
    if !input_dir.is_dir() {
        return Err(PagesiftError::InputDirNotFound {
            path: input_dir.to_path_buf(),
        });
    }

    let mut items = Vec::new();
    for entry in WalkDir::new(input_dir).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!("skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !has_image_extension(path) {
            continue;
        }
        let identity = relative_identity(input_dir, path);
        items.push(InputItem {
            path: path.to_path_buf(),
            identity,
        });
    }

    items.sort_by(|a, b| a.identity.cmp(&b.identity));
    debug!(count = items.len(), "discovered input images");
    Ok(items)
}

/// Drop items whose identity is already in `processed`.
pub(crate) fn filter_unprocessed(
    items: Vec<InputItem>,
    processed: &BTreeSet<String>,
) -> Vec<InputItem> {
    items
        .into_iter()
        .filter(|item| !processed.contains(&item.identity))
        .collect()
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

/// Identity of `path` relative to `root`, always `/`-separated.
fn relative_identity(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"fake").unwrap();
    }

    #[test]
    fn finds_images_recursively_and_sorted() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "b/page2.PNG");
        touch(dir.path(), "a/page1.jpg");
        touch(dir.path(), "a/notes.txt");
        touch(dir.path(), "top.jpeg");

        let items = discover_images(dir.path()).unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.identity.as_str()).collect();
        assert_eq!(ids, vec!["a/page1.jpg", "b/page2.PNG", "top.jpeg"]);
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        assert!(has_image_extension(Path::new("x/Y.JPG")));
        assert!(has_image_extension(Path::new("x/y.TiFf")));
        assert!(!has_image_extension(Path::new("x/y.pdf")));
        assert!(!has_image_extension(Path::new("x/noext")));
    }

    #[test]
    fn missing_input_dir_is_an_error() {
        let err = discover_images(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, PagesiftError::InputDirNotFound { .. }));
    }

    #[test]
    fn filter_drops_processed_identities() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.jpg");
        touch(dir.path(), "b.jpg");
        let items = discover_images(dir.path()).unwrap();

        let mut processed = BTreeSet::new();
        processed.insert("a.jpg".to_string());
        let remaining = filter_unprocessed(items, &processed);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].identity, "b.jpg");
    }

    #[test]
    fn identity_uses_forward_slashes() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "sub/deep/page.png");
        let items = discover_images(dir.path()).unwrap();
        assert_eq!(items[0].identity, "sub/deep/page.png");
    }
}
