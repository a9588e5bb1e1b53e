use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::codec::KeyValue;
use crate::constants::{DEFAULT_CACHE_SIZE, REWRITE_SUFFIX, TxnFlags};
use crate::engine::{self, EngineHandle, FileCheck};
use crate::error::{Error, Result};
use crate::transaction::Transaction;

/// Directories claimed by live environments in this process. Two
/// environments over the same directory would fight over the same files.
static OPEN_DIRECTORIES: Lazy<Mutex<HashSet<PathBuf>>> =
    Lazy::new(|| Mutex::new(HashSet::new()));

/// Outcome of validating a database file before its first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyResult {
    /// The file passed the structural check
    Ok,
    /// The check failed and the supplied recovery strategy rebuilt the file
    Recovered,
    /// The check failed and recovery could not rebuild the file
    RecoveryFailed,
}

/// One cached engine handle together with its open-reference count.
struct CacheEntry {
    handle: Arc<EngineHandle>,
    refs: usize,
}

/// Mutable environment state, all guarded by one lock.
struct EnvInner {
    /// Whether `open` has succeeded and `close` has not yet torn down
    open: bool,
    /// Canonical directory path held in the process-wide registry
    registered: Option<PathBuf>,
    /// File name to cached engine handle and reference count
    handles: HashMap<String, CacheEntry>,
}

/// Shared environment hosting the database files of one directory.
///
/// The environment caches one engine handle per file name and counts the
/// database handles holding it open. Files stay cached after their last
/// handle is released so later opens are cheap; [`flush`] checkpoints and
/// evicts the unused ones. A mock environment keeps everything in memory
/// and never touches disk.
///
/// [`flush`]: Environment::flush
pub struct Environment {
    /// Directory holding the database files; empty in mock mode
    dir: PathBuf,
    /// Engine cache budget per open file, in bytes
    cache_size: usize,
    /// Ephemeral in-memory mode, fixed at construction
    mock: bool,
    /// State guarded by the environment lock
    inner: Mutex<EnvInner>,
}

impl Environment {
    /// Create a closed environment over `dir`. Nothing is touched on disk
    /// until [`open`](Environment::open).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Environment {
            dir: dir.into(),
            cache_size: DEFAULT_CACHE_SIZE,
            mock: false,
            inner: Mutex::new(EnvInner {
                open: false,
                registered: None,
                handles: HashMap::new(),
            }),
        }
    }

    /// Create an ephemeral in-memory environment. Every file opened in it
    /// lives only as long as its handles and is never written to disk.
    pub fn make_mock() -> Self {
        Environment {
            dir: PathBuf::new(),
            cache_size: DEFAULT_CACHE_SIZE,
            mock: true,
            inner: Mutex::new(EnvInner {
                open: false,
                registered: None,
                handles: HashMap::new(),
            }),
        }
    }

    /// Whether this environment runs in ephemeral in-memory mode.
    pub fn is_mock(&self) -> bool {
        self.mock
    }

    /// Directory holding the database files. Empty in mock mode.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether `open` has succeeded and the environment has not been torn
    /// down since.
    pub fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    /// Open the environment, creating its directory if absent. Idempotent.
    /// Fails if the directory cannot be created or is already claimed by
    /// another environment in this process; the environment stays closed
    /// on failure.
    pub fn open(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.open {
            return Ok(());
        }
        if self.mock {
            inner.open = true;
            info!("opened mock environment");
            return Ok(());
        }
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Environment(format!("cannot create {}: {e}", self.dir.display()))
        })?;
        let canonical = self.dir.canonicalize().map_err(|e| {
            Error::Environment(format!("cannot resolve {}: {e}", self.dir.display()))
        })?;
        if !OPEN_DIRECTORIES.lock().insert(canonical.clone()) {
            return Err(Error::Environment(format!(
                "{} is already in use by another environment",
                canonical.display()
            )));
        }
        inner.registered = Some(canonical);
        inner.open = true;
        info!("opened environment at {}", self.dir.display());
        Ok(())
    }

    /// Flush all files and tear the environment down if no handles remain.
    /// Returns whether the environment is closed afterwards.
    pub fn close(&self) -> bool {
        self.flush(true);
        !self.inner.lock().open
    }

    /// Checkpoint and evict every cached file with no open handles. With
    /// `shutdown` set and the cache fully drained, also tears down the
    /// environment and removes leftover rewrite files.
    pub fn flush(&self, shutdown: bool) {
        let mock = self.mock;
        let mut inner = self.inner.lock();
        if !inner.open {
            return;
        }
        inner.handles.retain(|file, entry| {
            if entry.refs > 0 {
                debug!("flush: {file} still in use by {} handles", entry.refs);
                return true;
            }
            if !mock {
                if let Err(e) = entry.handle.checkpoint() {
                    warn!("flush: checkpoint of {file} failed: {e}");
                }
            }
            debug!("flush: closed {file}");
            false
        });
        if shutdown && inner.handles.is_empty() {
            inner.open = false;
            if let Some(dir) = inner.registered.take() {
                OPEN_DIRECTORIES.lock().remove(&dir);
            }
            if !mock {
                self.sweep_rewrite_leftovers();
            }
            info!("closed environment at {}", self.dir.display());
        }
    }

    /// Force a checkpoint for `file` so recovery logs older than it can be
    /// reclaimed. No-op if the environment is closed or the file is not
    /// cached.
    pub fn checkpoint_lsn(&self, file: &str) {
        let handle = {
            let inner = self.inner.lock();
            if !inner.open || self.mock {
                return;
            }
            match inner.handles.get(file) {
                Some(entry) => Arc::clone(&entry.handle),
                None => return,
            }
        };
        if let Err(e) = handle.checkpoint() {
            warn!("checkpoint of {file} failed: {e}");
        } else {
            debug!("checkpointed {file}");
        }
    }

    /// Evict `file` from the cache. Fails while any handle still holds it
    /// open; succeeds trivially when it is not cached.
    pub fn close_db(&self, file: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.handles.get(file) {
            if entry.refs > 0 {
                return Err(Error::HandleInUse {
                    file: file.to_string(),
                    refs: entry.refs,
                });
            }
            inner.handles.remove(file);
            debug!("closed {file}");
        }
        Ok(())
    }

    /// Evict `file` from the cache and delete it from disk. Fails while any
    /// handle still holds it open.
    pub fn remove_db(&self, file: &str) -> Result<()> {
        self.close_db(file)?;
        if self.mock {
            return Ok(());
        }
        match fs::remove_file(self.dir.join(file)) {
            Ok(()) => {
                info!("removed {file}");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Run the engine's structural check on `file` before its first use in
    /// this process. On check failure, `recover` is invoked to rebuild the
    /// file and the result reports whether it succeeded.
    ///
    /// Panics if `file` is already open; verification of live files is a
    /// caller bug.
    pub fn verify<F>(&self, file: &str, recover: F) -> VerifyResult
    where
        F: FnOnce(&Environment, &str) -> bool,
    {
        {
            let inner = self.inner.lock();
            assert!(
                !inner.handles.contains_key(file),
                "{file} must be verified before it is opened"
            );
        }
        if self.mock {
            return VerifyResult::Ok;
        }
        let path = self.dir.join(file);
        if !path.exists() {
            return VerifyResult::Ok;
        }
        match engine::verify_file(&path, self.cache_size) {
            FileCheck::Clean => VerifyResult::Ok,
            FileCheck::Repaired => {
                warn!("verify: engine repaired {file} while checking");
                VerifyResult::Ok
            }
            FileCheck::Failed(reason) => {
                warn!("verify: {file} failed structural check: {reason}");
                if recover(self, file) {
                    info!("verify: {file} recovered");
                    VerifyResult::Recovered
                } else {
                    warn!("verify: recovery of {file} failed");
                    VerifyResult::RecoveryFailed
                }
            }
        }
    }

    /// Read every extractable record of `file` into memory, best effort.
    /// With `aggressive` set, a scan error ends the extraction early and
    /// the records gathered so far are returned; otherwise it fails with
    /// [`Error::CorruptFile`]. The whole file is loaded into memory, so
    /// this is unsuitable for very large files.
    ///
    /// Panics if `file` is already open, like [`verify`](Environment::verify).
    pub fn salvage(&self, file: &str, aggressive: bool) -> Result<Vec<KeyValue>> {
        {
            let inner = self.inner.lock();
            assert!(
                !inner.handles.contains_key(file),
                "{file} must not be open during salvage"
            );
        }
        if self.mock {
            return Err(Error::SalvageUnavailable(
                "mock environment has no on-disk files".into(),
            ));
        }
        let path = self.dir.join(file);
        if !path.exists() {
            return Err(Error::SalvageUnavailable(format!("{file} does not exist")));
        }
        let handle = EngineHandle::open_file(&path, self.cache_size)
            .map_err(|e| Error::SalvageUnavailable(format!("cannot open {file}: {e}")))?;
        let mut cursor = handle
            .cursor()
            .map_err(|e| Error::SalvageUnavailable(format!("cannot scan {file}: {e}")))?;
        let mut records = Vec::new();
        loop {
            match cursor.next() {
                Ok(Some(pair)) => records.push(pair),
                Ok(None) => break,
                Err(e) if aggressive => {
                    warn!("salvage: stopping early on {file}: {e}");
                    break;
                }
                Err(e) => return Err(Error::CorruptFile(format!("{file}: {e}"))),
            }
        }
        info!("salvage: extracted {} records from {file}", records.len());
        Ok(records)
    }

    /// Begin an engine transaction on a cached file. Returns `None` if the
    /// environment is closed, the file is not cached, or the engine refuses.
    pub fn txn_begin(&self, file: &str, flags: TxnFlags) -> Option<Transaction> {
        let handle = {
            let inner = self.inner.lock();
            if !inner.open {
                return None;
            }
            Arc::clone(&inner.handles.get(file)?.handle)
        };
        match handle.begin(flags) {
            Ok(txn) => Some(txn),
            Err(e) => {
                warn!("txn_begin on {file} failed: {e}");
                None
            }
        }
    }

    /// Number of database handles currently holding `file` open.
    pub fn use_count(&self, file: &str) -> usize {
        self.inner.lock().handles.get(file).map_or(0, |e| e.refs)
    }

    /// Whether `file` has a cached engine handle, in use or not.
    pub fn is_cached(&self, file: &str) -> bool {
        self.inner.lock().handles.contains_key(file)
    }

    /// Open `file` if needed and take one reference on its engine handle.
    pub(crate) fn acquire(&self, file: &str, create: bool) -> Result<Arc<EngineHandle>> {
        let mut inner = self.inner.lock();
        if !inner.open {
            return Err(Error::Environment("environment is not open".into()));
        }
        if let Some(entry) = inner.handles.get_mut(file) {
            entry.refs += 1;
            return Ok(Arc::clone(&entry.handle));
        }
        let handle = if self.mock {
            EngineHandle::open_mock()?
        } else {
            let path = self.dir.join(file);
            if !create && !path.exists() {
                return Err(Error::HandleUnavailable(format!("{file} does not exist")));
            }
            EngineHandle::open_file(&path, self.cache_size)?
        };
        let handle = Arc::new(handle);
        inner.handles.insert(
            file.to_string(),
            CacheEntry {
                handle: Arc::clone(&handle),
                refs: 1,
            },
        );
        debug!("opened {file}");
        Ok(handle)
    }

    /// Drop one reference on `file`. In mock mode the last reference also
    /// evicts the handle, so nothing lingers between sessions.
    pub(crate) fn release(&self, file: &str) {
        let mut inner = self.inner.lock();
        let evict = match inner.handles.get_mut(file) {
            Some(entry) => {
                if entry.refs > 0 {
                    entry.refs -= 1;
                }
                entry.refs == 0 && self.mock
            }
            None => false,
        };
        if evict {
            inner.handles.remove(file);
            debug!("closed {file}");
        }
    }

    /// Open a file in this environment's directory outside the handle
    /// cache, for maintenance work on files with no open handles.
    pub(crate) fn open_offline(&self, name: &str) -> Result<EngineHandle> {
        EngineHandle::open_file(&self.dir.join(name), self.cache_size)
    }

    /// Evict an unused cached file without touching disk, keeping the
    /// environment open. Used by rewrite before swapping files.
    pub(crate) fn evict_if_unused(&self, file: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.handles.get(file) {
            Some(entry) if entry.refs > 0 => false,
            Some(_) => {
                inner.handles.remove(file);
                true
            }
            None => true,
        }
    }

    /// Delete rewrite leftovers from an interrupted swap.
    fn sweep_rewrite_leftovers(&self) {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().ends_with(REWRITE_SUFFIX) {
                let path = entry.path();
                if let Err(e) = fs::remove_file(&path) {
                    debug!("could not remove stale {}: {e}", path.display());
                } else {
                    info!("removed stale rewrite file {}", path.display());
                }
            }
        }
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.flush(true);
        let mut inner = self.inner.lock();
        if let Some(dir) = inner.registered.take() {
            OPEN_DIRECTORIES.lock().remove(&dir);
        }
    }
}
