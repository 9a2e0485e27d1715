//! On-disk storage for uploaded images and processed results.

use crate::error::BgError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Extensions accepted for uploads
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// URL prefix the upload directory is served under
pub const UPLOADS_ROUTE: &str = "/static/uploads";
/// URL prefix the result directory is served under
pub const RESULTS_ROUTE: &str = "/static/results";

/// Returns true if the filename carries an allowed image extension
pub fn allowed_file(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => ALLOWED_EXTENSIONS.contains(&ext.to_lowercase().as_str()),
        None => false,
    }
}

/// Reduce a client-supplied filename to a safe ASCII form
///
/// Path separators become spaces, whitespace runs are joined with `_`, and
/// anything outside `[A-Za-z0-9_.-]` is dropped. Non-ASCII letters are
/// dropped too rather than transliterated, so `ünïcode.png` becomes
/// `ncode.png`. Leading and trailing dots and underscores are stripped so the
/// result can never climb directories.
pub fn secure_filename(filename: &str) -> String {
    let spaced: String = filename
        .chars()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");

    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// A file written by the store
#[derive(Debug, Clone)]
pub struct StoredFile {
    /// Generated file name, `<uuid>.<ext>`
    pub id: String,
    pub path: PathBuf,
}

/// Upload and result directories
#[derive(Debug, Clone)]
pub struct MediaStore {
    upload_dir: PathBuf,
    result_dir: PathBuf,
}

impl MediaStore {
    /// Open the store, creating both directories if needed
    pub fn new(upload_dir: impl Into<PathBuf>, result_dir: impl Into<PathBuf>) -> Result<Self, BgError> {
        let store = Self {
            upload_dir: upload_dir.into(),
            result_dir: result_dir.into(),
        };

        for dir in [&store.upload_dir, &store.result_dir] {
            fs::create_dir_all(dir).map_err(|e| {
                BgError::Storage(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }

        Ok(store)
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn result_dir(&self) -> &Path {
        &self.result_dir
    }

    /// Save an uploaded image under a fresh name that keeps its extension
    pub fn save_upload(&self, original_name: &str, data: &[u8]) -> Result<StoredFile, BgError> {
        let safe = secure_filename(original_name);
        let ext = match safe.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => ext.to_lowercase(),
            _ => return Err(BgError::InvalidFile),
        };

        self.write(&self.upload_dir, &ext, data)
    }

    /// Save a processed result; results are always PNG
    pub fn save_result(&self, data: &[u8]) -> Result<StoredFile, BgError> {
        self.write(&self.result_dir, "png", data)
    }

    fn write(&self, dir: &Path, ext: &str, data: &[u8]) -> Result<StoredFile, BgError> {
        let id = format!("{}.{}", uuid::Uuid::new_v4().simple(), ext);
        let path = dir.join(&id);

        fs::write(&path, data).map_err(|e| {
            BgError::Storage(format!("Failed to write {}: {}", path.display(), e))
        })?;

        tracing::debug!("Stored {} bytes at {:?}", data.len(), path);
        Ok(StoredFile { id, path })
    }

    /// Delete stored files whose modification time is older than `max_age`
    ///
    /// Files that cannot be inspected or removed are skipped.
    pub fn cleanup_older_than(&self, max_age: Duration) -> usize {
        let cutoff = match SystemTime::now().checked_sub(max_age) {
            Some(cutoff) => cutoff,
            None => return 0,
        };

        let mut removed = 0;
        for dir in [&self.upload_dir, &self.result_dir] {
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::debug!("Skipping cleanup of {:?}: {}", dir, e);
                    continue;
                }
            };

            for entry in entries.flatten() {
                let path = entry.path();
                let expired = entry
                    .metadata()
                    .and_then(|meta| meta.modified())
                    .map(|mtime| mtime < cutoff)
                    .unwrap_or(false);

                if !expired || !path.is_file() {
                    continue;
                }

                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => tracing::debug!("Failed to remove {:?}: {}", path, e),
                }
            }
        }

        if removed > 0 {
            tracing::info!("Cleanup removed {} expired files", removed);
        }
        removed
    }
}

/// Public URL of a stored upload
pub fn upload_url(file: &StoredFile) -> String {
    format!("{}/{}", UPLOADS_ROUTE, file.id)
}

/// Public URL of a stored result
pub fn result_url(file: &StoredFile) -> String {
    format!("{}/{}", RESULTS_ROUTE, file.id)
}
