//! Permission flags for non-admin users.

use serde_json::{Map, Value, json};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use super::{KeyValueStore, StoreError};

/// Current on-disk layout. Version 1 files have no `schema_version` key and
/// use the short flag names.
pub const SCHEMA_VERSION: u64 = 2;

const VERSION_KEY: &str = "schema_version";

const LEGACY_KEYS: [(&str, Flag); 3] = [
    ("read", Flag::FreeRead),
    ("write", Flag::FreeWrite),
    ("edit", Flag::FreeEdit),
];

/// Level a command requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Read,
    Write,
    Edit,
    Admin,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Edit => "edit",
            Permission::Admin => "admin",
        }
    }
}

/// A boolean switch stored in the permissions file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    /// Nobody but the configured admins can use the bot.
    AdminsOnly,
    FreeRead,
    FreeWrite,
    FreeEdit,
}

impl Flag {
    pub const ALL: [Flag; 4] = [Flag::AdminsOnly, Flag::FreeRead, Flag::FreeWrite, Flag::FreeEdit];

    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::AdminsOnly => "admins_only",
            Flag::FreeRead => "free_read",
            Flag::FreeWrite => "free_write",
            Flag::FreeEdit => "free_edit",
        }
    }

    fn default_value(&self) -> bool {
        matches!(self, Flag::FreeRead)
    }
}

impl FromStr for Flag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Flag::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown permission key '{}'", s))
    }
}

/// Outcome of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Granted,
    /// Admin-level command, or the bot is locked to admins.
    AdminsOnly,
    /// The flag for this level is off for non-admins.
    Disabled(Permission),
}

pub fn default_permissions() -> Map<String, Value> {
    let mut map: Map<String, Value> = Flag::ALL
        .into_iter()
        .map(|f| (f.as_str().to_string(), Value::Bool(f.default_value())))
        .collect();
    map.insert(VERSION_KEY.to_string(), json!(SCHEMA_VERSION));
    map
}

/// Typed view over the permissions store.
pub struct Permissions {
    store: KeyValueStore,
}

impl Permissions {
    /// Open (or create) the permissions file, migrating older layouts.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut store = KeyValueStore::open(path, default_permissions(), true)?;

        match store.get(VERSION_KEY, Value::Null).as_u64() {
            Some(v) if v > SCHEMA_VERSION => {
                return Err(StoreError::UnsupportedSchema {
                    path: store.path().to_path_buf(),
                    found: v,
                    supported: SCHEMA_VERSION,
                });
            }
            Some(SCHEMA_VERSION) => {}
            found => migrate(&mut store, found.unwrap_or(1))?,
        }

        Ok(Self { store })
    }

    pub fn flag(&self, flag: Flag) -> bool {
        self.store.get_bool(flag.as_str(), flag.default_value())
    }

    pub fn set_flag(&mut self, flag: Flag, value: bool) -> Result<(), StoreError> {
        self.store.set(flag.as_str(), Value::Bool(value), false)?;
        Ok(())
    }

    /// Delete the file and start over from the defaults.
    pub fn reset(&mut self) -> Result<(), StoreError> {
        self.store.reset_defaults()
    }

    /// Decide whether a user may run a command of level `required`.
    /// `write` and `edit` also need `free_read`.
    pub fn check(&self, required: Permission, is_admin: bool) -> Access {
        if is_admin {
            return Access::Granted;
        }
        if required == Permission::Admin || self.flag(Flag::AdminsOnly) {
            return Access::AdminsOnly;
        }

        let read = self.flag(Flag::FreeRead);
        let allowed = match required {
            Permission::Read => read,
            Permission::Write => read && self.flag(Flag::FreeWrite),
            Permission::Edit => read && self.flag(Flag::FreeEdit),
            Permission::Admin => false,
        };

        if allowed { Access::Granted } else { Access::Disabled(required) }
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.store, f)
    }
}

fn migrate(store: &mut KeyValueStore, from: u64) -> Result<(), StoreError> {
    info!("Migrating permissions {:?} from schema v{} to v{}", store.path(), from, SCHEMA_VERSION);

    let autosave = store.autosave();
    store.set_autosave(false);

    for (old, flag) in LEGACY_KEYS {
        if !store.contains_key(old) {
            continue;
        }
        let value = store.unset(old)?;
        // a new-style key already present wins over the legacy one
        if !store.contains_key(flag.as_str()) {
            store.set(flag.as_str(), value, true)?;
        }
    }

    for flag in Flag::ALL {
        if !store.contains_key(flag.as_str()) {
            store.set(flag.as_str(), Value::Bool(flag.default_value()), true)?;
        }
    }
    store.set(VERSION_KEY, json!(SCHEMA_VERSION), true)?;

    store.set_autosave(autosave);
    store.dump()
}
