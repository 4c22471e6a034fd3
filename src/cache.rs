//! On-disk apidoc cache.
//!
//! One directory per server and API version; each cached document is a file
//! named `<cache name><extension>`, where the extension is `.json` or
//! `.<language>.json`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::apidoc::ApiDoc;
use crate::error::ApiError;

pub const DEFAULT_CACHE_NAME: &str = "default";

#[derive(Debug, Clone)]
pub struct ApidocCache {
    dir: PathBuf,
    extension: String,
}

impl ApidocCache {
    pub fn new(dir: impl Into<PathBuf>, language: Option<&str>) -> Self {
        let extension = match language {
            Some(lang) => format!(".{lang}.json"),
            None => ".json".to_string(),
        };
        Self {
            dir: dir.into(),
            extension,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Full path of the cache file for `name`.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}{}", self.extension))
    }

    /// All cache files currently in the directory, sorted by path.
    pub fn files(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(&self.extension))
            })
            .collect();
        files.sort();
        files
    }

    /// Name of the first cached document, or `default` when there is none.
    pub fn find_name(&self) -> String {
        self.files()
            .first()
            .and_then(|path| path.file_name())
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(self.extension.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_CACHE_NAME.to_string())
    }

    /// Read the document cached under `name`; `None` if it is absent or unreadable.
    pub fn load(&self, name: &str) -> Option<ApiDoc> {
        let path = self.file(name);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "apidoc cache miss");
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(doc) => Some(doc),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "ignoring undecodable apidoc cache");
                None
            }
        }
    }

    /// Create the cache directory; an existing directory is fine.
    pub fn ensure_dir(&self) -> Result<(), ApiError> {
        match fs::create_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists && self.dir.is_dir() => Ok(()),
            Err(source) => Err(ApiError::CacheIo {
                path: self.dir.clone(),
                source,
            }),
        }
    }

    /// Write `document` as the cache file for `name`, replacing any previous one.
    pub fn store(&self, name: &str, document: &Value) -> Result<PathBuf, ApiError> {
        let path = self.file(name);
        let text = serde_json::to_string(document).map_err(ApiError::ResponseDecode)?;
        fs::write(&path, text).map_err(|source| ApiError::CacheIo {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Remove every cached document in the directory.
    pub fn clean(&self) -> Result<(), ApiError> {
        for path in self.files() {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(source) => return Err(ApiError::CacheIo { path, source }),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn extension_depends_on_language() {
        let dir = TempDir::new().unwrap();
        assert_eq!(ApidocCache::new(dir.path(), None).extension(), ".json");
        assert_eq!(
            ApidocCache::new(dir.path(), Some("en_US")).extension(),
            ".en_US.json"
        );
        assert_eq!(
            ApidocCache::new(dir.path(), Some("de")).file("abc"),
            dir.path().join("abc.de.json")
        );
    }

    #[test]
    fn find_name_defaults_when_empty_or_missing() {
        let dir = TempDir::new().unwrap();
        let cache = ApidocCache::new(dir.path().join("missing"), None);
        assert_eq!(cache.find_name(), "default");

        let cache = ApidocCache::new(dir.path(), None);
        assert_eq!(cache.find_name(), "default");
    }

    #[test]
    fn find_name_uses_existing_file() {
        let dir = TempDir::new().unwrap();
        let cache = ApidocCache::new(dir.path(), None);
        cache.store("3f2a9c", &json!({"docs": {}})).unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        assert_eq!(cache.find_name(), "3f2a9c");
    }

    #[test]
    fn store_then_load() {
        let dir = TempDir::new().unwrap();
        let cache = ApidocCache::new(dir.path().join("nested/v2"), None);
        cache.ensure_dir().unwrap();
        cache.ensure_dir().unwrap();
        cache
            .store("default", &json!({"docs": {"resources": {"hosts": {"methods": []}}}}))
            .unwrap();

        let doc = cache.load("default").unwrap();
        assert_eq!(doc.resource_names(), vec!["hosts"]);
    }

    #[test]
    fn load_ignores_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let cache = ApidocCache::new(dir.path(), None);
        fs::write(cache.file("default"), "{not json").unwrap();
        assert!(cache.load("default").is_none());
        assert!(cache.load("other").is_none());
    }

    #[test]
    fn clean_removes_only_cache_files() {
        let dir = TempDir::new().unwrap();
        let cache = ApidocCache::new(dir.path(), None);
        cache.store("a", &json!({})).unwrap();
        cache.store("b", &json!({})).unwrap();
        fs::write(dir.path().join("keep.txt"), "x").unwrap();

        cache.clean().unwrap();
        assert!(cache.files().is_empty());
        assert!(dir.path().join("keep.txt").exists());
    }
}
