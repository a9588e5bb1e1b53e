use redb::{Durability, WriteTransaction};

use crate::constants::TxnFlags;
use crate::error::{Error, Result};

/// An engine transaction bound to one database file.
///
/// A transaction is obtained from [`Environment::txn_begin`] or
/// [`Database::txn_begin`] and consumed by `commit` or `abort`. Dropping an
/// uncommitted transaction discards its changes.
///
/// [`Environment::txn_begin`]: crate::env::Environment::txn_begin
/// [`Database::txn_begin`]: crate::database::Database::txn_begin
pub struct Transaction {
    txn: WriteTransaction,
}

impl Transaction {
    pub(crate) fn new(txn: WriteTransaction) -> Self {
        Transaction { txn }
    }

    pub(crate) fn raw(&self) -> &WriteTransaction {
        &self.txn
    }

    /// Commit the transaction
    pub fn commit(self) -> Result<()> {
        self.txn.commit().map_err(|e| Error::Engine(e.to_string()))
    }

    /// Abort the transaction, discarding its writes
    pub fn abort(self) -> Result<()> {
        self.txn.abort().map_err(|e| Error::Engine(e.to_string()))
    }
}

/// Map durability flags onto the engine's commit modes
pub(crate) fn durability_for(flags: TxnFlags) -> Durability {
    if flags.contains(TxnFlags::SYNC) {
        Durability::Immediate
    } else {
        Durability::Eventual
    }
}
