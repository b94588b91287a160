//! Key-value persistence for subscription and rule state.
//!
//! Three keys are stored, each as one JSON document:
//!
//! - `subscriptions`: the subscription store, including retired filter sets
//! - `dynamic_filters`: the dynamic filter table
//! - `static_disabled`: disabled static rules per subscription

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bb_core::{DynamicFilterTable, StaticDisableSet, SubscriptionStore};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{PersistenceError, Result, SyncError};

pub const SUBSCRIPTIONS_KEY: &str = "subscriptions";
pub const DYNAMIC_FILTERS_KEY: &str = "dynamic_filters";
pub const STATIC_DISABLED_KEY: &str = "static_disabled";

/// Synchronous string key-value storage.
pub trait Persistence: Send + Sync {
    fn get(&self, key: &str) -> std::result::Result<Option<String>, PersistenceError>;
    fn set(&self, key: &str, value: &str) -> std::result::Result<(), PersistenceError>;
}

/// In-memory storage. Clones share the same map, so a clone outlives the
/// engine that wrote to it.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }
}

impl Persistence for MemoryPersistence {
    fn get(&self, key: &str) -> std::result::Result<Option<String>, PersistenceError> {
        Ok(self.raw(key))
    }

    fn set(&self, key: &str, value: &str) -> std::result::Result<(), PersistenceError> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// One `<key>.json` file per key in a directory.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    dir: PathBuf,
}

impl JsonFilePersistence {
    pub fn open(dir: impl Into<PathBuf>) -> std::result::Result<Self, PersistenceError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| PersistenceError::Io {
            key: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl Persistence for JsonFilePersistence {
    fn get(&self, key: &str) -> std::result::Result<Option<String>, PersistenceError> {
        match std::fs::read_to_string(self.path(key)) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistenceError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> std::result::Result<(), PersistenceError> {
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        let io = |source| PersistenceError::Io {
            key: key.to_string(),
            source,
        };
        std::fs::write(&tmp, value).map_err(io)?;
        std::fs::rename(&tmp, &path).map_err(io)
    }
}

/// Everything the engine persists.
#[derive(Debug, Clone, Default)]
pub struct PersistedState {
    pub subscriptions: SubscriptionStore,
    pub dynamic: DynamicFilterTable,
    pub disabled: StaticDisableSet,
}

pub fn load_state(persistence: &dyn Persistence) -> Result<PersistedState> {
    Ok(PersistedState {
        subscriptions: load_key(persistence, SUBSCRIPTIONS_KEY)?,
        dynamic: load_key(persistence, DYNAMIC_FILTERS_KEY)?,
        disabled: load_key(persistence, STATIC_DISABLED_KEY)?,
    })
}

pub fn save_state(
    persistence: &dyn Persistence,
    subscriptions: &SubscriptionStore,
    dynamic: &DynamicFilterTable,
    disabled: &StaticDisableSet,
) -> Result<()> {
    save_key(persistence, SUBSCRIPTIONS_KEY, subscriptions)?;
    save_key(persistence, DYNAMIC_FILTERS_KEY, dynamic)?;
    save_key(persistence, STATIC_DISABLED_KEY, disabled)
}

fn load_key<T: DeserializeOwned + Default>(persistence: &dyn Persistence, key: &'static str) -> Result<T> {
    match persistence.get(key)? {
        Some(text) => serde_json::from_str(&text).map_err(|err| SyncError::Serialization {
            key,
            message: err.to_string(),
        }),
        None => Ok(T::default()),
    }
}

fn save_key<T: Serialize>(persistence: &dyn Persistence, key: &'static str, value: &T) -> Result<()> {
    let text = serde_json::to_string(value).map_err(|err| SyncError::Serialization {
        key,
        message: err.to_string(),
    })?;
    persistence.set(key, &text)?;
    Ok(())
}
