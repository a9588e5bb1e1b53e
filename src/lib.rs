//! Handle and transaction layer over an embedded key/value storage engine.
//!
//! One [`Environment`] hosts the database files of a directory, caching a
//! single engine handle per file and counting the [`Database`] handles
//! that hold it open. Handles expose typed reads and writes built on a
//! versioned binary codec, optional transactions, and cursor iteration.
//! Damaged files go through the verify, recover, and salvage pipeline on
//! the environment; [`FlushTimer`] checkpoints unused files in the
//! background.

mod codec;
mod constants;
mod cursor;
mod database;
mod engine;
mod env;
mod error;
mod flush;
mod transaction;

pub use codec::{decode_value, encode_value, key_bytes, DecodeKey, EncodeKey, KeyValue};
pub use constants::{
    DbFlags, TxnFlags, DEFAULT_CACHE_SIZE, DEFAULT_FLUSH_INTERVAL, VERSION_KEY,
};
pub use cursor::{Cursor, SeekOp};
pub use database::Database;
pub use env::{Environment, VerifyResult};
pub use error::{Error, Result};
pub use flush::FlushTimer;
pub use transaction::Transaction;
