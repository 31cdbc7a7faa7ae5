//! Generic JSON object store persisted as a single file.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{StoreError, write_file};

/// String keys mapped to JSON values, backed by one JSON object file.
///
/// With autosave enabled every successful mutation rewrites the whole file
/// before returning, so the on-disk state always matches memory.
#[derive(Debug)]
pub struct KeyValueStore {
    path: PathBuf,
    data: Map<String, Value>,
    autosave: bool,
    defaults: Map<String, Value>,
}

impl KeyValueStore {
    /// Load the store at `path`, seeding it from `defaults` (and writing the
    /// file) when it does not exist yet.
    pub fn open(
        path: impl AsRef<Path>,
        defaults: Map<String, Value>,
        autosave: bool,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let data: Map<String, Value> = serde_json::from_str(&content)
                    .map_err(|e| StoreError::Parse { path: path.clone(), source: e })?;
                debug!("Loaded store {:?} ({} keys)", path, data.len());
                Ok(Self { path, data, autosave, defaults })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No store at {:?}, writing defaults", path);
                let store = Self { path, data: defaults.clone(), autosave, defaults };
                store.dump()?;
                Ok(store)
            }
            Err(e) => Err(StoreError::Io { path, source: e }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn autosave(&self) -> bool {
        self.autosave
    }

    pub fn set_autosave(&mut self, autosave: bool) {
        self.autosave = autosave;
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    #[cfg(test)]
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Value stored under `key`, or `default` when absent.
    pub fn get(&self, key: &str, default: Value) -> Value {
        self.data.get(key).cloned().unwrap_or(default)
    }

    /// Boolean stored under `key`; `default` when absent or not a boolean.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.data.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    /// Replace the value of `key`. Unless `create_if_missing` is set the key
    /// must already exist.
    pub fn set(
        &mut self,
        key: &str,
        value: Value,
        create_if_missing: bool,
    ) -> Result<&Value, StoreError> {
        if !create_if_missing && !self.data.contains_key(key) {
            return Err(StoreError::MissingKey(key.to_string()));
        }

        self.data.insert(key.to_string(), value);
        if self.autosave {
            self.dump()?;
        }

        Ok(&self.data[key])
    }

    /// Remove `key` and return its value.
    pub fn unset(&mut self, key: &str) -> Result<Value, StoreError> {
        let value = self
            .data
            .remove(key)
            .ok_or_else(|| StoreError::MissingKey(key.to_string()))?;

        if self.autosave {
            self.dump()?;
        }
        Ok(value)
    }

    /// Delete the backing file and start over from the defaults.
    pub fn reset_defaults(&mut self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::Io { path: self.path.clone(), source: e }),
        }

        self.data = self.defaults.clone();
        info!("Reset store {:?} to defaults", self.path);
        self.dump()
    }

    /// Rewrite the whole backing file from memory.
    pub fn dump(&self) -> Result<(), StoreError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.data
            .serialize(&mut ser)
            .map_err(|e| StoreError::Serialize { path: self.path.clone(), source: e })?;

        // serde_json only ever emits UTF-8
        let json = String::from_utf8_lossy(&buf);
        write_file(&self.path, &json)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Aligned `key > value | type` table, one row per key.
impl fmt::Display for KeyValueStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key_width = self.data.keys().map(|k| k.chars().count()).max().unwrap_or(0);
        let val_width = self.data.values().map(|v| plain(v).chars().count()).max().unwrap_or(0);

        let mut entries: Vec<(&String, &Value)> = self.data.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let rows: Vec<String> = entries
            .into_iter()
            .map(|(k, v)| {
                format!(
                    "{:<kw$} > {:<vw$} | {}",
                    k,
                    plain(v),
                    type_name(v),
                    kw = key_width,
                    vw = val_width
                )
            })
            .collect();

        write!(f, "{}", rows.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn defaults() -> Map<String, Value> {
        match json!({"read": true, "write": false}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn on_disk(path: &Path) -> Map<String, Value> {
        let content = std::fs::read_to_string(path).unwrap();
        serde_json::from_str(&content).unwrap()
    }

    #[test]
    fn test_open_missing_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("perms.json");

        let store = KeyValueStore::open(&path, defaults(), true).unwrap();
        assert!(path.exists());
        assert_eq!(on_disk(&path), defaults());
        assert_eq!(store.data(), &defaults());
    }

    #[test]
    fn test_open_creates_parent_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("perms.json");

        KeyValueStore::open(&path, defaults(), false).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_set_then_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("perms.json");

        let mut store = KeyValueStore::open(&path, defaults(), true).unwrap();
        store.set("write", json!(true), false).unwrap();

        let reloaded = KeyValueStore::open(&path, Map::new(), true).unwrap();
        assert_eq!(reloaded.get("read", json!(null)), json!(true));
        assert_eq!(reloaded.get("write", json!(null)), json!(true));
        assert_eq!(reloaded.data().len(), 2);
    }

    #[test]
    fn test_set_missing_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("perms.json");
        let mut store = KeyValueStore::open(&path, defaults(), true).unwrap();

        let err = store.set("missing_key", json!(1), false).unwrap_err();
        assert!(matches!(err, StoreError::MissingKey(ref k) if k == "missing_key"));
        assert!(!on_disk(&path).contains_key("missing_key"));

        let value = store.set("missing_key", json!(1), true).unwrap().clone();
        assert_eq!(value, json!(1));
        assert_eq!(on_disk(&path).get("missing_key"), Some(&json!(1)));
    }

    #[test]
    fn test_unset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("perms.json");
        let mut store = KeyValueStore::open(&path, defaults(), true).unwrap();

        assert_eq!(store.unset("read").unwrap(), json!(true));
        assert!(!on_disk(&path).contains_key("read"));
        assert!(matches!(store.unset("read"), Err(StoreError::MissingKey(_))));
    }

    #[test]
    fn test_reload_matches_memory_after_every_mutation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("perms.json");
        let mut store = KeyValueStore::open(&path, defaults(), true).unwrap();

        store.set("a", json!("x"), true).unwrap();
        assert_eq!(&on_disk(&path), store.data());
        store.set("read", json!([1, 2]), false).unwrap();
        assert_eq!(&on_disk(&path), store.data());
        store.unset("write").unwrap();
        assert_eq!(&on_disk(&path), store.data());
        store.set("b", json!({"nested": 1.5}), true).unwrap();
        assert_eq!(&on_disk(&path), store.data());
    }

    #[test]
    fn test_no_autosave_until_dump() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("perms.json");
        let mut store = KeyValueStore::open(&path, defaults(), false).unwrap();

        store.set("write", json!(true), false).unwrap();
        assert_eq!(on_disk(&path).get("write"), Some(&json!(false)));

        store.dump().unwrap();
        assert_eq!(on_disk(&path).get("write"), Some(&json!(true)));
    }

    #[test]
    fn test_reset_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("perms.json");
        let mut store = KeyValueStore::open(&path, defaults(), true).unwrap();
        store.set("write", json!(true), false).unwrap();
        store.set("extra", json!(3), true).unwrap();

        store.reset_defaults().unwrap();
        assert_eq!(store.data(), &defaults());

        let reloaded = KeyValueStore::open(&path, Map::new(), true).unwrap();
        assert_eq!(reloaded.data(), &defaults());
    }

    #[test]
    fn test_malformed_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("perms.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = KeyValueStore::open(&path, defaults(), true).unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
        // the broken file is left for the operator
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn test_array_file_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("perms.json");
        std::fs::write(&path, "[1, 2]").unwrap();

        assert!(matches!(
            KeyValueStore::open(&path, defaults(), true),
            Err(StoreError::Parse { .. })
        ));
    }

    #[test]
    fn test_get_defaults() {
        let dir = TempDir::new().unwrap();
        let store = KeyValueStore::open(dir.path().join("p.json"), defaults(), true).unwrap();

        assert_eq!(store.get("nope", json!("fallback")), json!("fallback"));
        assert!(store.get_bool("read", false));
        assert!(store.get_bool("nope", true));
    }

    #[test]
    fn test_display_table() {
        let dir = TempDir::new().unwrap();
        let store = KeyValueStore::open(dir.path().join("p.json"), defaults(), true).unwrap();

        let table = store.to_string();
        assert_eq!(table, "read  > true  | bool\nwrite > false | bool");
    }
}
