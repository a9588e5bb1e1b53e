use std::io;
use std::result;

use thiserror::Error;

/// Custom result type for arkdb operations
pub type Result<T> = result::Result<T, Error>;

/// Errors surfaced by environment-level and cursor operations.
///
/// Handle-level read/write/erase/exists collapse every failure into a
/// boolean or `Option` result; the variants here are only returned where
/// the caller needs to pick a recovery strategy.
#[derive(Debug, Error)]
pub enum Error {
    /// Engine environment could not be opened or initialized
    #[error("environment error: {0}")]
    Environment(String),
    /// Operation on a file that is not open and could not be opened
    #[error("database handle unavailable: {0}")]
    HandleUnavailable(String),
    /// Close or removal attempted while handles still reference the file
    #[error("database {file} is still in use ({refs} open handles)")]
    HandleInUse { file: String, refs: usize },
    /// Bytes do not match the expected encoding
    #[error("codec error: {0}")]
    Decode(String),
    /// Structural verification failed
    #[error("corrupt database file: {0}")]
    CorruptFile(String),
    /// No salvage facility for the file, or nothing could be extracted
    #[error("salvage unavailable: {0}")]
    SalvageUnavailable(String),
    /// Error reported by the underlying storage engine
    #[error("storage engine error: {0}")]
    Engine(String),
    /// Filesystem error outside the engine
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}
