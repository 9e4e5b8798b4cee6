//! JSON document file.
//!
//! The file holds one table of documents keyed by a stringified counter:
//!
//! ```json
//! {"_default": {"1": {...}, "2": {...}}}
//! ```
//!
//! Changes stay in memory until [`flush`](JsonDocumentStore::flush), which
//! writes a sibling temporary file and renames it over the original.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use repograph_core::Record;
use serde_json::Value;

use crate::error::{RepositoryError, RepositoryResult};

const DEFAULT_TABLE: &str = "_default";

#[derive(Debug)]
pub struct JsonDocumentStore {
    path: PathBuf,
    documents: BTreeMap<u64, Record>,
    next_key: u64,
}

impl JsonDocumentStore {
    /// Open the file at `path`, creating it when missing.
    ///
    /// The parent directory must exist.
    pub fn open(path: impl Into<PathBuf>) -> RepositoryResult<Self> {
        let path = path.into();

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::File::create(&path).map_err(|e| {
                    RepositoryError::connection_from(
                        format!("Could not create the database file {}", path.display()),
                        e,
                    )
                })?;
                String::new()
            }
            Err(e) => {
                return Err(RepositoryError::connection_from(
                    format!("Could not read the database file {}", path.display()),
                    e,
                ));
            }
        };

        let documents = parse_documents(&path, &contents)?;
        let next_key = documents.keys().next_back().map_or(1, |key| key + 1);

        Ok(Self {
            path,
            documents,
            next_key,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A fresh copy of the store as the file holds it now.
    pub fn reload(&self) -> RepositoryResult<Self> {
        Self::open(self.path.clone())
    }

    /// Documents accepted by `predicate`, in insertion order.
    pub fn search<F>(&self, predicate: F) -> Vec<&Record>
    where
        F: Fn(&Record) -> bool,
    {
        self.documents.values().filter(|doc| predicate(*doc)).collect()
    }

    /// Replace every document accepted by `predicate` with `document`, or
    /// insert it when none is.
    pub fn upsert<F>(&mut self, document: Record, predicate: F)
    where
        F: Fn(&Record) -> bool,
    {
        let mut replaced = false;
        for existing in self.documents.values_mut() {
            if predicate(&*existing) {
                *existing = document.clone();
                replaced = true;
            }
        }

        if !replaced {
            self.documents.insert(self.next_key, document);
            self.next_key += 1;
        }
    }

    /// Remove the documents accepted by `predicate`; returns how many went.
    pub fn remove<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&Record) -> bool,
    {
        let before = self.documents.len();
        self.documents.retain(|_, doc| !predicate(&*doc));
        before - self.documents.len()
    }

    /// Write the documents to disk.
    pub fn flush(&self) -> RepositoryResult<()> {
        let table: serde_json::Map<String, Value> = self
            .documents
            .iter()
            .map(|(key, doc)| (key.to_string(), Value::Object(doc.clone())))
            .collect();
        let mut root = serde_json::Map::new();
        root.insert(DEFAULT_TABLE.to_owned(), Value::Object(table));

        let bytes = serde_json::to_vec(&Value::Object(root))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn parse_documents(path: &Path, contents: &str) -> RepositoryResult<BTreeMap<u64, Record>> {
    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let root: Value = serde_json::from_str(contents).map_err(|e| {
        RepositoryError::connection_from(
            format!("{} is not a document database", path.display()),
            e,
        )
    })?;

    let table = match root.get(DEFAULT_TABLE) {
        None => return Ok(BTreeMap::new()),
        Some(Value::Object(table)) => table,
        Some(_) => {
            return Err(RepositoryError::connection(format!(
                "{} has a malformed {DEFAULT_TABLE} table",
                path.display()
            )));
        }
    };

    let mut documents = BTreeMap::new();
    for (key, doc) in table {
        let (Ok(key), Value::Object(doc)) = (key.parse::<u64>(), doc) else {
            return Err(RepositoryError::connection(format!(
                "{} has a malformed document under key {key}",
                path.display()
            )));
        };
        documents.insert(key, doc.clone());
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn is_id(id: i64) -> impl Fn(&Record) -> bool {
        move |doc| doc.get("id") == Some(&json!(id))
    }

    #[test]
    fn creates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        let store = JsonDocumentStore::open(&path).unwrap();
        assert!(path.exists());
        assert!(store.search(|_| true).is_empty());
    }

    #[test]
    fn missing_parent_directory_is_a_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("db.json");
        assert!(JsonDocumentStore::open(path).unwrap_err().is_connection());
    }

    #[test]
    fn flushed_documents_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");

        let mut store = JsonDocumentStore::open(&path).unwrap();
        store.upsert(doc(json!({"id": 1, "title": "a"})), is_id(1));
        store.upsert(doc(json!({"id": 2, "title": "b"})), is_id(2));
        store.upsert(doc(json!({"id": 1, "title": "c"})), is_id(1));
        store.flush().unwrap();

        let reopened = JsonDocumentStore::open(&path).unwrap();
        let titles: Vec<Value> = reopened
            .search(|_| true)
            .into_iter()
            .map(|d| d["title"].clone())
            .collect();
        assert_eq!(titles, vec![json!("c"), json!("b")]);

        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["_default"]["2"]["title"], json!("b"));
    }

    #[test]
    fn reload_sees_writes_from_other_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        let first = JsonDocumentStore::open(&path).unwrap();

        let mut second = JsonDocumentStore::open(&path).unwrap();
        second.upsert(doc(json!({"id": 1})), is_id(1));
        second.flush().unwrap();

        assert!(first.search(is_id(1)).is_empty());
        assert_eq!(first.reload().unwrap().search(is_id(1)).len(), 1);
    }

    #[test]
    fn remove_reports_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonDocumentStore::open(dir.path().join("db.json")).unwrap();
        store.upsert(doc(json!({"id": 1})), is_id(1));
        assert_eq!(store.remove(is_id(1)), 1);
        assert_eq!(store.remove(is_id(1)), 0);
    }

    #[test]
    fn rejects_garbage_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        fs::write(&path, "not json").unwrap();
        assert!(JsonDocumentStore::open(&path).unwrap_err().is_connection());
    }
}
