//! Key-value settings store backing "internal" objects.
//!
//! Internal objects persist every accepted value change under their own
//! name and re-hydrate from the store when constructed, so operator-set
//! state survives restarts. The trait is synchronous: writes happen on the
//! object mutation path, which never holds an async lock.
//!
//! Values round-trip through the tagged wire encoding of
//! [`kaza_proto::Value`], so the store needs no serialisation format of
//! its own.

use std::{path::Path, sync::Arc};

use kaza_proto::Value;
use parking_lot::Mutex;
use redb::{Database, TableDefinition};

/// Table: object name → tagged value bytes.
const SETTINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("settings");

/// Errors from the settings store.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Underlying storage failure.
    #[error("settings i/o error: {0}")]
    Io(String),

    /// A stored value did not decode as a tagged value.
    #[error("corrupt stored value: {0}")]
    Codec(#[from] kaza_proto::ProtocolError),
}

/// Persistence contract for internal objects.
///
/// Implementations share state behind `Arc`, are thread-safe, and must not
/// block for long: `put` runs on the object mutation path.
pub trait SettingsStore: Send + Sync + 'static {
    /// Stored value for an object name. `Ok(None)` when never persisted.
    fn get(&self, name: &str) -> Result<Option<Value>, SettingsError>;

    /// Persist a value under an object name, replacing any previous one.
    fn put(&self, name: &str, value: &Value) -> Result<(), SettingsError>;
}

/// In-memory store for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemorySettings {
    entries: Mutex<std::collections::HashMap<String, Value>>,
}

impl MemorySettings {
    /// New empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// New empty store behind an `Arc`, ready to hand to objects.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, name: &str) -> Result<Option<Value>, SettingsError> {
        Ok(self.entries.lock().get(name).cloned())
    }

    fn put(&self, name: &str, value: &Value) -> Result<(), SettingsError> {
        self.entries.lock().insert(name.to_string(), value.clone());
        Ok(())
    }
}

/// Durable store backed by redb.
///
/// Redb gives single-file ACID transactions; a torn write cannot corrupt
/// previously persisted values. Clone is cheap (shared `Arc`).
#[derive(Clone)]
pub struct RedbSettings {
    db: Arc<Database>,
}

impl RedbSettings {
    /// Open or create the settings database at `path`.
    ///
    /// The table is created eagerly so first reads on a fresh file do not
    /// fail with a missing-table error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let db = Database::create(path.as_ref()).map_err(|e| SettingsError::Io(e.to_string()))?;

        let txn = db
            .begin_write()
            .map_err(|e| SettingsError::Io(e.to_string()))?;
        txn.open_table(SETTINGS)
            .map_err(|e| SettingsError::Io(e.to_string()))?;
        txn.commit().map_err(|e| SettingsError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl SettingsStore for RedbSettings {
    fn get(&self, name: &str) -> Result<Option<Value>, SettingsError> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| SettingsError::Io(e.to_string()))?;
        let table = txn
            .open_table(SETTINGS)
            .map_err(|e| SettingsError::Io(e.to_string()))?;
        let Some(guard) = table
            .get(name)
            .map_err(|e| SettingsError::Io(e.to_string()))?
        else {
            return Ok(None);
        };
        Ok(Some(Value::from_bytes(guard.value())?))
    }

    fn put(&self, name: &str, value: &Value) -> Result<(), SettingsError> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| SettingsError::Io(e.to_string()))?;
        {
            let mut table = txn
                .open_table(SETTINGS)
                .map_err(|e| SettingsError::Io(e.to_string()))?;
            table
                .insert(name, value.to_bytes().as_slice())
                .map_err(|e| SettingsError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| SettingsError::Io(e.to_string()))
    }
}
