//! JSON-file backed control-plane state: permission flags and seen hashes.

pub mod hashes;
pub mod permissions;
pub mod store;

use std::fmt;
use std::path::PathBuf;

pub use hashes::SeenHashes;
pub use permissions::{Access, Flag, Permission, Permissions};
pub use store::KeyValueStore;

/// Errors raised by the file stores.
#[derive(Debug)]
pub enum StoreError {
    /// The backing file could not be read, written or removed.
    Io { path: PathBuf, source: std::io::Error },
    /// The backing file exists but does not hold the expected JSON shape.
    Parse { path: PathBuf, source: serde_json::Error },
    /// In-memory state could not be encoded as JSON.
    Serialize { path: PathBuf, source: serde_json::Error },
    /// A mutation named a key that is not in the store.
    MissingKey(String),
    /// The file was written by a newer version of the bot.
    UnsupportedSchema { path: PathBuf, found: u64, supported: u64 },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "i/o error on '{}': {}", path.display(), source)
            }
            Self::Parse { path, source } => {
                write!(f, "malformed store file '{}': {}", path.display(), source)
            }
            Self::Serialize { path, source } => {
                write!(f, "cannot encode store '{}': {}", path.display(), source)
            }
            Self::MissingKey(key) => write!(f, "key '{}' does not exist", key),
            Self::UnsupportedSchema { path, found, supported } => write!(
                f,
                "store file '{}' has schema version {} (supported: {})",
                path.display(),
                found,
                supported
            ),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } | Self::Serialize { source, .. } => Some(source),
            Self::MissingKey(_) | Self::UnsupportedSchema { .. } => None,
        }
    }
}

/// Write `contents` to `path`, creating the parent directory when needed.
pub(crate) fn write_file(path: &std::path::Path, contents: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| StoreError::Io { path: parent.to_path_buf(), source: e })?;
    }
    std::fs::write(path, contents).map_err(|e| StoreError::Io { path: path.to_path_buf(), source: e })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_and_decode_errors_are_distinct() {
        let source = || serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let path = PathBuf::from("/data/permissions.json");

        let parse = StoreError::Parse { path: path.clone(), source: source() };
        let encode = StoreError::Serialize { path, source: source() };
        assert!(parse.to_string().starts_with("malformed store file '/data/permissions.json'"));
        assert!(encode.to_string().starts_with("cannot encode store '/data/permissions.json'"));
        assert!(std::error::Error::source(&encode).is_some());
    }
}
