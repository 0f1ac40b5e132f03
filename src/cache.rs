//! Persisted fallback for the rule rows: one JSON document keyed by
//! `"profiles"` and `"users"`, written best-effort on every successful load
//! and read only at bootstrap when the backing store is unreachable.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::PathBuf;

use crate::errors::EngineError;

#[derive(Debug, Clone)]
pub struct FileCache {
    path: PathBuf,
}

impl FileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read one keyed entry. An absent file, an absent key, or an unreadable
    /// document all come back as `Ok(None)`: a corrupt cache must degrade to
    /// "no cache", not abort bootstrap.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, EngineError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        let doc: Map<String, Value> = match serde_json::from_str(&raw) {
            Ok(doc) => doc,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), %err, "Fallback cache is unreadable");
                return Ok(None);
            }
        };
        match doc.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Write one keyed entry, keeping the other keys. The next successful
    /// write replaces a corrupt document wholesale.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), EngineError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut doc = if self.path.exists() {
            serde_json::from_str(&fs::read_to_string(&self.path)?).unwrap_or_default()
        } else {
            Map::new()
        };
        doc.insert(key.to_string(), serde_json::to_value(value)?);
        doc.insert("saved_at".to_string(), json!(Utc::now().to_rfc3339()));

        fs::write(
            &self.path,
            serde_json::to_string_pretty(&Value::Object(doc))?,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::types::ProfileRow;
    use tempfile::TempDir;

    fn sample_rows() -> Vec<ProfileRow> {
        vec![ProfileRow {
            id: 1,
            name: "partners".into(),
            open: false,
            host: Some("example.org".into()),
            rcpt: None,
            rcpt_re: None,
            maxsize: Some(1000),
        }]
    }

    #[test]
    fn test_set_then_get_round_trip() {
        let dir = TempDir::new().expect("temp dir");
        let cache = FileCache::new(dir.path().join("store.json"));

        cache.set("profiles", &sample_rows()).expect("set");
        let rows: Vec<ProfileRow> = cache.get("profiles").expect("get").expect("present");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "partners");
        assert_eq!(rows[0].maxsize, Some(1000));
    }

    #[test]
    fn test_set_preserves_other_keys() {
        let dir = TempDir::new().expect("temp dir");
        let cache = FileCache::new(dir.path().join("store.json"));

        cache.set("profiles", &sample_rows()).expect("set profiles");
        cache.set("users", &Vec::<String>::new()).expect("set users");

        let rows: Option<Vec<ProfileRow>> = cache.get("profiles").expect("get");
        assert!(rows.is_some());
        let users: Option<Vec<String>> = cache.get("users").expect("get");
        assert!(users.is_some());
    }

    #[test]
    fn test_missing_file_and_key_are_absent() {
        let dir = TempDir::new().expect("temp dir");
        let cache = FileCache::new(dir.path().join("store.json"));

        let absent: Option<Vec<ProfileRow>> = cache.get("profiles").expect("get");
        assert!(absent.is_none());

        cache.set("users", &Vec::<String>::new()).expect("set");
        let still_absent: Option<Vec<ProfileRow>> = cache.get("profiles").expect("get");
        assert!(still_absent.is_none());
    }

    #[test]
    fn test_corrupt_document_reads_as_absent() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{ not json").expect("write");

        let cache = FileCache::new(&path);
        let absent: Option<Vec<ProfileRow>> = cache.get("profiles").expect("get");
        assert!(absent.is_none());

        // A later write self-heals the document.
        cache.set("profiles", &sample_rows()).expect("set");
        let rows: Option<Vec<ProfileRow>> = cache.get("profiles").expect("get");
        assert!(rows.is_some());
    }

    #[test]
    fn test_set_creates_parent_directories() {
        let dir = TempDir::new().expect("temp dir");
        let cache = FileCache::new(dir.path().join("nested/deeper/store.json"));
        cache.set("profiles", &sample_rows()).expect("set");
        let rows: Option<Vec<ProfileRow>> = cache.get("profiles").expect("get");
        assert!(rows.is_some());
    }
}
