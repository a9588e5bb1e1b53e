use std::fs;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{decode_value, encode_value, key_bytes, EncodeKey, KeyValue};
use crate::constants::{DbFlags, TxnFlags, BACKUP_SUFFIX, REWRITE_SUFFIX, VERSION_KEY};
use crate::cursor::Cursor;
use crate::engine::EngineHandle;
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::transaction::Transaction;

/// Typed handle bound to one named database file.
///
/// Opening a handle registers it with the environment, which opens the
/// engine handle on first use and counts references after that. Dropping
/// the handle always releases its registration, aborting any transaction
/// still active.
///
/// Read, write, erase, and exists collapse every failure into their
/// boolean or `Option` result; a missing key and a malformed record are
/// indistinguishable to callers. Only the verify and salvage paths on
/// [`Environment`] report distinct failure modes.
pub struct Database {
    /// Environment owning the cached engine handle
    env: Arc<Environment>,
    /// Name of the database file within the environment directory
    file: String,
    /// Borrowed engine handle; `None` once the handle is closed
    handle: Option<Arc<EngineHandle>>,
    /// The at-most-one active transaction
    txn: Option<Transaction>,
    /// Writes are rejected when set, fixed at construction
    read_only: bool,
}

impl Database {
    /// Open a handle on `file`, opening the environment and the engine
    /// handle as needed. `DbFlags::CREATE` allows creating a missing file;
    /// `DbFlags::RDONLY` makes every write on this handle fail fast.
    pub fn open(env: &Arc<Environment>, file: &str, flags: DbFlags) -> Result<Database> {
        if file.is_empty() {
            return Err(Error::HandleUnavailable("no file name given".into()));
        }
        env.open()?;
        let handle = env.acquire(file, flags.contains(DbFlags::CREATE))?;
        Ok(Database {
            env: Arc::clone(env),
            file: file.to_string(),
            handle: Some(handle),
            txn: None,
            read_only: flags.contains(DbFlags::RDONLY),
        })
    }

    /// Name of the file this handle is bound to.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Whether writes on this handle are rejected.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Fetch and decode the value stored under `key`. Returns `None` when
    /// the key is absent, the handle is closed, or the stored bytes do not
    /// decode as `V`.
    pub fn read<K, V>(&self, key: &K) -> Option<V>
    where
        K: EncodeKey + ?Sized,
        V: DeserializeOwned,
    {
        let handle = self.handle.as_ref()?;
        match handle.get(self.txn.as_ref(), &key_bytes(key)) {
            Ok(Some(bytes)) => decode_value(&bytes).ok(),
            Ok(None) => None,
            Err(e) => {
                debug!("read on {} failed: {e}", self.file);
                None
            }
        }
    }

    /// Encode and store `value` under `key`. With `overwrite` false, an
    /// existing key is left untouched and the call reports `false`.
    pub fn write<K, V>(&mut self, key: &K, value: &V, overwrite: bool) -> bool
    where
        K: EncodeKey + ?Sized,
        V: Serialize + ?Sized,
    {
        if self.reject_read_only() {
            return false;
        }
        let Some(handle) = self.handle.as_ref() else {
            return false;
        };
        let raw_value = match encode_value(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("write on {} could not encode value: {e}", self.file);
                return false;
            }
        };
        match handle.put(self.txn.as_ref(), &key_bytes(key), &raw_value, !overwrite) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("write on {} failed: {e}", self.file);
                false
            }
        }
    }

    /// Remove `key`. Erasing an absent key succeeds, so two erases in a
    /// row both report `true`.
    pub fn erase<K>(&mut self, key: &K) -> bool
    where
        K: EncodeKey + ?Sized,
    {
        if self.reject_read_only() {
            return false;
        }
        let Some(handle) = self.handle.as_ref() else {
            return false;
        };
        match handle.del(self.txn.as_ref(), &key_bytes(key)) {
            Ok(_) => true,
            Err(e) => {
                warn!("erase on {} failed: {e}", self.file);
                false
            }
        }
    }

    /// Check whether `key` is present without fetching or decoding its
    /// value.
    pub fn exists<K>(&self, key: &K) -> bool
    where
        K: EncodeKey + ?Sized,
    {
        let Some(handle) = self.handle.as_ref() else {
            return false;
        };
        match handle.exists(self.txn.as_ref(), &key_bytes(key)) {
            Ok(present) => present,
            Err(e) => {
                debug!("exists on {} failed: {e}", self.file);
                false
            }
        }
    }

    /// Open a cursor over a snapshot of the file. Records written inside
    /// the handle's active transaction are not visible until committed.
    pub fn cursor(&self) -> Option<Cursor> {
        let handle = self.handle.as_ref()?;
        match handle.cursor() {
            Ok(cursor) => Some(cursor),
            Err(e) => {
                warn!("cursor on {} failed: {e}", self.file);
                None
            }
        }
    }

    /// Begin a transaction on this handle. Fails if one is already active.
    pub fn txn_begin(&mut self) -> bool {
        let Some(handle) = self.handle.as_ref() else {
            return false;
        };
        if self.txn.is_some() {
            return false;
        }
        match handle.begin(TxnFlags::WRITE_NOSYNC) {
            Ok(txn) => {
                self.txn = Some(txn);
                true
            }
            Err(e) => {
                warn!("txn_begin on {} failed: {e}", self.file);
                false
            }
        }
    }

    /// Commit the active transaction. Fails if none is active.
    pub fn txn_commit(&mut self) -> bool {
        match self.txn.take() {
            Some(txn) => match txn.commit() {
                Ok(()) => true,
                Err(e) => {
                    warn!("txn_commit on {} failed: {e}", self.file);
                    false
                }
            },
            None => false,
        }
    }

    /// Abort the active transaction, discarding its writes. Fails if none
    /// is active.
    pub fn txn_abort(&mut self) -> bool {
        match self.txn.take() {
            Some(txn) => match txn.abort() {
                Ok(()) => true,
                Err(e) => {
                    warn!("txn_abort on {} failed: {e}", self.file);
                    false
                }
            },
            None => false,
        }
    }

    /// Read the schema version stored under the well-known version key.
    pub fn read_version(&self) -> Option<u32> {
        self.read(VERSION_KEY)
    }

    /// Store `version` under the well-known version key.
    pub fn write_version(&mut self, version: u32) -> bool {
        self.write(VERSION_KEY, &version, true)
    }

    /// Release the handle, aborting any active transaction. Dropping the
    /// handle does the same.
    pub fn close(&mut self) {
        if let Some(txn) = self.txn.take() {
            if let Err(e) = txn.abort() {
                warn!("abort on close of {} failed: {e}", self.file);
            }
        }
        if self.handle.take().is_some() {
            self.env.release(&self.file);
        }
    }

    /// Rebuild `file` from salvaged records, renaming the damaged file
    /// aside first. Matches the recovery strategy signature taken by
    /// [`Environment::verify`], so it can be passed as the stock strategy.
    pub fn recover(env: &Environment, file: &str) -> bool {
        let records = match env.salvage(file, true) {
            Ok(records) => records,
            Err(e) => {
                warn!("recover: salvage of {file} failed: {e}");
                return false;
            }
        };
        if records.is_empty() {
            warn!("recover: salvage of {file} found nothing");
            return false;
        }
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        let damaged = env.dir().join(format!("{file}.{stamp}.{BACKUP_SUFFIX}"));
        if let Err(e) = fs::rename(env.dir().join(file), &damaged) {
            warn!("recover: cannot move damaged {file} aside: {e}");
            return false;
        }
        info!(
            "recover: moved damaged {file} to {}, restoring {} records",
            damaged.display(),
            records.len()
        );
        match restore_records(env, file, &records) {
            Ok(()) => true,
            Err(e) => {
                warn!("recover: rebuild of {file} failed: {e}");
                false
            }
        }
    }

    /// Copy every record of `file` into a fresh file and swap it in,
    /// dropping records whose key starts with `skip_prefix`. The original
    /// file is left untouched unless the final swap succeeds. Fails while
    /// any handle holds the file open.
    pub fn rewrite(env: &Environment, file: &str, skip_prefix: Option<&[u8]>) -> bool {
        if env.is_mock() || !env.is_open() {
            return false;
        }
        env.checkpoint_lsn(file);
        if !env.evict_if_unused(file) {
            warn!("rewrite: {file} is still in use");
            return false;
        }
        let src = env.dir().join(file);
        if !src.exists() {
            return false;
        }
        let tmp_name = format!("{file}{REWRITE_SUFFIX}");
        let tmp = env.dir().join(&tmp_name);
        if tmp.exists() && fs::remove_file(&tmp).is_err() {
            return false;
        }
        match copy_filtered(env, file, &tmp_name, skip_prefix) {
            Ok(copied) => {
                if let Err(e) = fs::rename(&tmp, &src) {
                    warn!("rewrite: cannot swap {file}: {e}");
                    let _ = fs::remove_file(&tmp);
                    return false;
                }
                info!("rewrite: rebuilt {file} with {copied} records");
                true
            }
            Err(e) => {
                warn!("rewrite of {file} failed: {e}");
                let _ = fs::remove_file(&tmp);
                false
            }
        }
    }

    fn reject_read_only(&self) -> bool {
        if self.read_only {
            debug_assert!(false, "write attempted on read-only handle for {}", self.file);
            warn!("write attempted on read-only handle for {}", self.file);
            return true;
        }
        false
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.close();
    }
}

/// Write salvaged records into a freshly created `file` in one durable
/// transaction.
fn restore_records(env: &Environment, file: &str, records: &[KeyValue]) -> Result<()> {
    let fresh = env.open_offline(file)?;
    let txn = fresh.begin(TxnFlags::SYNC)?;
    for (key, value) in records {
        fresh.put(Some(&txn), key, value, false)?;
    }
    txn.commit()
}

/// Copy `file` into `tmp_name`, dropping keys that start with
/// `skip_prefix`, committing the copy as one durable transaction.
fn copy_filtered(
    env: &Environment,
    file: &str,
    tmp_name: &str,
    skip_prefix: Option<&[u8]>,
) -> Result<usize> {
    let source = env.open_offline(file)?;
    let target = env.open_offline(tmp_name)?;
    let txn = target.begin(TxnFlags::SYNC)?;
    let mut cursor = source.cursor()?;
    let mut copied = 0usize;
    while let Some((key, value)) = cursor.next()? {
        if skip_prefix.is_some_and(|prefix| key.starts_with(prefix)) {
            continue;
        }
        target.put(Some(&txn), &key, &value, false)?;
        copied += 1;
    }
    txn.commit()?;
    Ok(copied)
}
