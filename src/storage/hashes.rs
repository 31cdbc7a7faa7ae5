//! Seen torrent hashes, used to notify each completed torrent once.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{StoreError, write_file};

/// Append-only set of identifiers persisted as a JSON array of strings.
///
/// The first `is_new` (or `insert`) naming an identifier moves it to the
/// seen state for the lifetime of the backing file.
#[derive(Debug)]
pub struct SeenHashes {
    path: PathBuf,
    seen: Vec<String>,
    index: HashSet<String>,
    saves: usize,
}

impl SeenHashes {
    /// Load the set at `path`. A missing file is an empty set; a malformed
    /// one is an error the operator has to fix.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let seen: Vec<String> = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| StoreError::Parse { path: path.clone(), source: e })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No hashes file at {:?}, starting empty", path);
                Vec::new()
            }
            Err(e) => return Err(StoreError::Io { path, source: e }),
        };

        let mut hashes = Self { path, seen: Vec::with_capacity(seen.len()), index: HashSet::new(), saves: 0 };
        // a hand-edited file may contain repeats
        for h in seen {
            hashes.push(h);
        }

        debug!("Loaded {} seen hashes from {:?}", hashes.seen.len(), hashes.path);
        Ok(hashes)
    }

    /// Absorb identifiers that must never be reported as new, e.g. torrents
    /// that were already complete when the bot started.
    pub fn seed<I, S>(&mut self, ids: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let added = self.insert(ids)?;
        info!("Seeded {} hashes ({} known, {} writes)", added, self.seen.len(), self.saves);
        Ok(added)
    }

    /// Add every identifier not seen yet and persist once. Returns how many
    /// were actually added.
    pub fn insert<I, S>(&mut self, ids: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = 0;
        for id in ids {
            if self.push(id.into()) {
                added += 1;
            }
        }
        self.save()?;
        Ok(added)
    }

    /// `true` exactly once per identifier; the identifier is recorded and
    /// persisted before returning. When the save fails the identifier stays
    /// recorded in memory, so the error stands in for `Ok(true)`.
    pub fn is_new(&mut self, id: &str) -> Result<bool, StoreError> {
        if self.index.contains(id) {
            return Ok(false);
        }

        self.push(id.to_string());
        self.save()?;
        Ok(true)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Seen identifiers in insertion order.
    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.seen.iter().map(String::as_str)
    }

    fn push(&mut self, id: String) -> bool {
        if self.index.contains(&id) {
            return false;
        }
        self.index.insert(id.clone());
        self.seen.push(id);
        true
    }

    fn save(&mut self) -> Result<(), StoreError> {
        let json = serde_json::to_string(&self.seen)
            .map_err(|e| StoreError::Serialize { path: self.path.clone(), source: e })?;
        write_file(&self.path, &json)?;
        self.saves += 1;
        Ok(())
    }

    /// Number of file writes performed by this instance.
    pub fn saves(&self) -> usize {
        self.saves
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn on_disk(path: &Path) -> Vec<String> {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_seeded_then_new() {
        let dir = TempDir::new().unwrap();
        let mut hashes = SeenHashes::open(dir.path().join("completed.json")).unwrap();

        hashes.seed(["h1", "h2"]).unwrap();
        assert!(!hashes.is_new("h1").unwrap());
        assert!(hashes.is_new("h3").unwrap());
        assert!(!hashes.is_new("h3").unwrap());
    }

    #[test]
    fn test_insert_dedupes_with_single_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("completed.json");
        let mut hashes = SeenHashes::open(&path).unwrap();

        let added = hashes.insert(["a", "b", "a", "c"]).unwrap();
        assert_eq!(added, 3);
        assert_eq!(hashes.saves(), 1);
        assert_eq!(hashes.iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(on_disk(&path), vec!["a", "b", "c"]);

        // repeats are skipped but the call still writes once
        assert_eq!(hashes.insert(["b"]).unwrap(), 0);
        assert_eq!(hashes.saves(), 2);
        assert_eq!(hashes.len(), 3);
    }

    #[test]
    fn test_is_new_true_once_across_interleaving() {
        let dir = TempDir::new().unwrap();
        let mut hashes = SeenHashes::open(dir.path().join("completed.json")).unwrap();

        assert!(hashes.is_new("x").unwrap());
        hashes.insert(["x", "y"]).unwrap();
        assert!(!hashes.is_new("x").unwrap());
        assert!(!hashes.is_new("y").unwrap());

        let mut trues = 0;
        for id in ["z", "z", "w", "z", "w"] {
            if hashes.is_new(id).unwrap() {
                trues += 1;
            }
            hashes.insert([id]).unwrap();
        }
        assert_eq!(trues, 2);
    }

    #[test]
    fn test_survives_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("completed.json");

        {
            let mut hashes = SeenHashes::open(&path).unwrap();
            assert!(hashes.is_new("abc").unwrap());
        }

        let mut hashes = SeenHashes::open(&path).unwrap();
        assert!(hashes.contains("abc"));
        assert!(!hashes.is_new("abc").unwrap());
    }

    #[test]
    fn test_missing_file_is_empty_and_not_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("completed.json");

        let hashes = SeenHashes::open(&path).unwrap();
        assert!(hashes.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_corrupt_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("completed.json");
        std::fs::write(&path, r#"{"a": 1}"#).unwrap();

        assert!(matches!(SeenHashes::open(&path), Err(StoreError::Parse { .. })));
    }

    #[test]
    fn test_repeats_in_file_collapsed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("completed.json");
        std::fs::write(&path, r#"["a", "a", "b"]"#).unwrap();

        let hashes = SeenHashes::open(&path).unwrap();
        assert_eq!(hashes.len(), 2);
    }
}
