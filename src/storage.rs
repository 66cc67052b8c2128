// SPDX-License-Identifier: AGPL-3.0-or-later

//! Key-value storage port for the persisted relayer key.
//!
//! The relayer key lives under a single fixed slot. The port is injected at
//! construction; there is no ambient lookup of a global store. Two
//! implementations ship: an in-memory map for environments without durable
//! storage, and an embedded redb database (pure Rust, ACID) for persistence.
//!
//! ## Table Layout
//!
//! - `relayer_keys`: slot name → stored value

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use redb::{Database, ReadableDatabase, TableDefinition};

const RELAYER_KEYS: TableDefinition<&str, &str> = TableDefinition::new("relayer_keys");

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
}

/// Minimal `getItem`/`setItem` port for persisting the relayer key.
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, KeyStoreError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), KeyStoreError>;
}

/// Volatile store; every process start yields a fresh relayer identity.
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, KeyStoreError> {
        let items = self
            .items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), KeyStoreError> {
        let mut items = self
            .items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Embedded persistent store backed by redb.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> Result<Self, KeyStoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create the table so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(RELAYER_KEYS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }
}

impl KeyValueStore for RedbStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, KeyStoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RELAYER_KEYS)?;
        Ok(table.get(key)?.map(|value| value.value().to_string()))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), KeyStoreError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RELAYER_KEYS)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryStore::new();
        assert_eq!(store.get_item("slot").unwrap(), None);

        store.set_item("slot", "value").unwrap();
        assert_eq!(store.get_item("slot").unwrap(), Some("value".to_string()));

        store.set_item("slot", "updated").unwrap();
        assert_eq!(store.get_item("slot").unwrap(), Some("updated".to_string()));
    }

    #[test]
    fn redb_store_round_trips_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.redb");

        {
            let store = RedbStore::open(&path).unwrap();
            assert_eq!(store.get_item("slot").unwrap(), None);
            store.set_item("slot", "0xabc123").unwrap();
            assert_eq!(
                store.get_item("slot").unwrap(),
                Some("0xabc123".to_string())
            );
        }

        // Reopen: the value survives the process boundary.
        let store = RedbStore::open(&path).unwrap();
        assert_eq!(
            store.get_item("slot").unwrap(),
            Some("0xabc123".to_string())
        );
    }
}
