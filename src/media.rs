//! Media file metadata and directory scanning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// One media file known to the system, with enough metadata for a viewer
/// to sort and display it without touching the filesystem again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub file_name: String,
    pub path: PathBuf,
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub extension: String,
    pub source: String,
    pub is_new: bool,
}

impl MediaItem {
    pub fn from_path(path: &Path, source: &str, is_new: bool) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        Ok(Self {
            file_name,
            path: path.to_path_buf(),
            size: metadata.len(),
            created: metadata.created().ok().map(DateTime::from),
            modified: metadata.modified().ok().map(DateTime::from),
            extension,
            source: source.to_string(),
            is_new,
        })
    }
}

/// List the media files directly inside `dir`, sorted by file name.
/// Unreadable entries are skipped with a warning.
pub fn scan_media_dir(
    dir: &Path,
    extensions: &[String],
    source: &str,
) -> std::io::Result<Vec<MediaItem>> {
    let mut items = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() || !extension_allowed(&path, extensions) {
            continue;
        }
        match MediaItem::from_path(&path, source, false) {
            Ok(item) => items.push(item),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable file");
            }
        }
    }
    items.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(items)
}

/// Whether the file's extension is in the allow list. Entries are expected
/// in dot-prefixed form (".jpg") and matched case-insensitively.
pub(crate) fn extension_allowed(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension() else {
        return false;
    };
    let dotted = format!(".{}", ext.to_string_lossy());
    extensions
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(&dotted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn jpg_only() -> Vec<String> {
        vec![".jpg".to_string(), ".cr2".to_string()]
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        assert!(extension_allowed(Path::new("IMG_0001.JPG"), &jpg_only()));
        assert!(extension_allowed(Path::new("IMG_0002.cr2"), &jpg_only()));
        assert!(!extension_allowed(Path::new("notes.txt"), &jpg_only()));
        assert!(!extension_allowed(Path::new("no_extension"), &jpg_only()));
    }

    #[test]
    fn scan_lists_only_allowed_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"bb").unwrap();
        std::fs::write(dir.path().join("a.JPG"), b"a").unwrap();
        std::fs::write(dir.path().join("skip.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub.jpg")).unwrap();

        let items = scan_media_dir(dir.path(), &jpg_only(), "holding").unwrap();
        let names: Vec<_> = items.iter().map(|item| item.file_name.as_str()).collect();
        assert_eq!(names, ["a.JPG", "b.jpg"]);
        assert_eq!(items[0].extension, ".jpg");
        assert_eq!(items[0].size, 1);
        assert!(!items[0].is_new);
    }
}
