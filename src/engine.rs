use std::path::Path;

use redb::{Durability, ReadableTable, TableDefinition, WriteTransaction};

use crate::constants::TxnFlags;
use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::transaction::{durability_for, Transaction};

/// Single table holding every record of a database file
pub(crate) const DATA_TABLE: TableDefinition<'static, &[u8], &[u8]> =
    TableDefinition::new("arkdb_records");

/// Outcome of a structural check on a database file.
pub(crate) enum FileCheck {
    /// The file passed the check untouched
    Clean,
    /// The engine repaired inconsistencies while checking
    Repaired,
    /// The file could not be opened or checked
    Failed(String),
}

/// One open database file inside the storage engine.
///
/// The handle wraps the engine's database object and exposes the small
/// key/value surface the rest of the crate is built on. Reads outside a
/// transaction run against a fresh snapshot; writes outside a transaction
/// commit immediately with eventual durability.
pub(crate) struct EngineHandle {
    db: redb::Database,
}

impl EngineHandle {
    /// Open or create the database file at `path`.
    pub(crate) fn open_file(path: &Path, cache_size: usize) -> Result<Self> {
        let mut builder = redb::Database::builder();
        builder.set_cache_size(cache_size);
        let db = builder
            .create(path)
            .map_err(|e| Error::HandleUnavailable(format!("cannot open {}: {e}", path.display())))?;
        Ok(EngineHandle { db })
    }

    /// Open a fresh in-memory database that never touches disk.
    pub(crate) fn open_mock() -> Result<Self> {
        let db = redb::Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(|e| Error::Environment(e.to_string()))?;
        Ok(EngineHandle { db })
    }

    /// Begin a write transaction with the durability selected by `flags`.
    pub(crate) fn begin(&self, flags: TxnFlags) -> Result<Transaction> {
        let mut txn = self
            .db
            .begin_write()
            .map_err(|e| Error::Engine(e.to_string()))?;
        txn.set_durability(durability_for(flags));
        Ok(Transaction::new(txn))
    }

    /// Fetch the value stored under `key`, inside `txn` if one is given.
    pub(crate) fn get(&self, txn: Option<&Transaction>, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match txn {
            Some(txn) => match txn.raw().open_table(DATA_TABLE) {
                Ok(table) => read_value(&table, key),
                Err(redb::TableError::TableDoesNotExist(_)) => Ok(None),
                Err(e) => Err(Error::Engine(e.to_string())),
            },
            None => {
                let snapshot = self
                    .db
                    .begin_read()
                    .map_err(|e| Error::Engine(e.to_string()))?;
                match snapshot.open_table(DATA_TABLE) {
                    Ok(table) => read_value(&table, key),
                    Err(redb::TableError::TableDoesNotExist(_)) => Ok(None),
                    Err(e) => Err(Error::Engine(e.to_string())),
                }
            }
        }
    }

    /// Check whether `key` is present without materializing its value.
    pub(crate) fn exists(&self, txn: Option<&Transaction>, key: &[u8]) -> Result<bool> {
        match txn {
            Some(txn) => match txn.raw().open_table(DATA_TABLE) {
                Ok(table) => has_key(&table, key),
                Err(redb::TableError::TableDoesNotExist(_)) => Ok(false),
                Err(e) => Err(Error::Engine(e.to_string())),
            },
            None => {
                let snapshot = self
                    .db
                    .begin_read()
                    .map_err(|e| Error::Engine(e.to_string()))?;
                match snapshot.open_table(DATA_TABLE) {
                    Ok(table) => has_key(&table, key),
                    Err(redb::TableError::TableDoesNotExist(_)) => Ok(false),
                    Err(e) => Err(Error::Engine(e.to_string())),
                }
            }
        }
    }

    /// Store `value` under `key`. With `no_overwrite` set, an existing key
    /// is left untouched and the call reports `Ok(false)`.
    pub(crate) fn put(
        &self,
        txn: Option<&Transaction>,
        key: &[u8],
        value: &[u8],
        no_overwrite: bool,
    ) -> Result<bool> {
        match txn {
            Some(txn) => write_value(txn.raw(), key, value, no_overwrite),
            None => {
                let mut wtxn = self
                    .db
                    .begin_write()
                    .map_err(|e| Error::Engine(e.to_string()))?;
                wtxn.set_durability(Durability::Eventual);
                let stored = write_value(&wtxn, key, value, no_overwrite)?;
                if stored {
                    wtxn.commit().map_err(|e| Error::Engine(e.to_string()))?;
                } else {
                    drop(wtxn.abort());
                }
                Ok(stored)
            }
        }
    }

    /// Remove `key`. Reports `Ok(false)` when the key was not present.
    pub(crate) fn del(&self, txn: Option<&Transaction>, key: &[u8]) -> Result<bool> {
        match txn {
            Some(txn) => remove_value(txn.raw(), key),
            None => {
                let mut wtxn = self
                    .db
                    .begin_write()
                    .map_err(|e| Error::Engine(e.to_string()))?;
                wtxn.set_durability(Durability::Eventual);
                let removed = remove_value(&wtxn, key)?;
                wtxn.commit().map_err(|e| Error::Engine(e.to_string()))?;
                Ok(removed)
            }
        }
    }

    /// Open a snapshot cursor over the whole file.
    pub(crate) fn cursor(&self) -> Result<Cursor> {
        let snapshot = self
            .db
            .begin_read()
            .map_err(|e| Error::Engine(e.to_string()))?;
        Ok(Cursor::new(snapshot))
    }

    /// Push every earlier eventual-durability commit onto stable storage.
    pub(crate) fn checkpoint(&self) -> Result<()> {
        let mut txn = self
            .db
            .begin_write()
            .map_err(|e| Error::Engine(e.to_string()))?;
        txn.set_durability(Durability::Immediate);
        // An empty durable commit persists everything committed before it
        txn.commit().map_err(|e| Error::Engine(e.to_string()))?;
        Ok(())
    }
}

/// Run the engine's structural integrity check on the file at `path`.
/// The file must not be open elsewhere in this process.
pub(crate) fn verify_file(path: &Path, cache_size: usize) -> FileCheck {
    let mut builder = redb::Database::builder();
    builder.set_cache_size(cache_size);
    let mut db = match builder.create(path) {
        Ok(db) => db,
        Err(e) => return FileCheck::Failed(e.to_string()),
    };
    match db.check_integrity() {
        Ok(true) => FileCheck::Clean,
        Ok(false) => FileCheck::Repaired,
        Err(e) => FileCheck::Failed(e.to_string()),
    }
}

fn read_value<T>(table: &T, key: &[u8]) -> Result<Option<Vec<u8>>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    match table.get(key) {
        Ok(Some(value)) => Ok(Some(value.value().to_vec())),
        Ok(None) => Ok(None),
        Err(e) => Err(Error::Engine(e.to_string())),
    }
}

fn has_key<T>(table: &T, key: &[u8]) -> Result<bool>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    match table.get(key) {
        Ok(value) => Ok(value.is_some()),
        Err(e) => Err(Error::Engine(e.to_string())),
    }
}

fn write_value(txn: &WriteTransaction, key: &[u8], value: &[u8], no_overwrite: bool) -> Result<bool> {
    let mut table = txn
        .open_table(DATA_TABLE)
        .map_err(|e| Error::Engine(e.to_string()))?;
    if no_overwrite {
        let present = table
            .get(key)
            .map_err(|e| Error::Engine(e.to_string()))?
            .is_some();
        if present {
            return Ok(false);
        }
    }
    table
        .insert(key, value)
        .map_err(|e| Error::Engine(e.to_string()))?;
    Ok(true)
}

fn remove_value(txn: &WriteTransaction, key: &[u8]) -> Result<bool> {
    match txn.open_table(DATA_TABLE) {
        Ok(mut table) => match table.remove(key) {
            Ok(removed) => Ok(removed.is_some()),
            Err(e) => Err(Error::Engine(e.to_string())),
        },
        Err(redb::TableError::TableDoesNotExist(_)) => Ok(false),
        Err(e) => Err(Error::Engine(e.to_string())),
    }
}
