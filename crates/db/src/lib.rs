//! Thin synchronous wrapper over `redb` with `bincode` encoded tables
//!
//! Consensus state is written from the manager's own thread, so transactions
//! are plain blocking calls. Commit hooks registered on a
//! [`ctx::WriteTransactionCtx`] run right after a successful commit, in
//! commit order.
pub mod ctx;
pub mod error;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use ctx::WriteTransactionCtx;
use dagbft_util_error::fmt::FmtCompact as _;
use error::{
    CommitSnafu, DatabaseSnafu, DbResult, DbTxResult, InvalidPathSnafu,
    TransactionSnafu,
};
use redb_bincode::ReadTransaction;
use snafu::{OptionExt as _, ResultExt as _};
use tracing::{debug, warn};

const LOG_TARGET: &str = "dagbft::consensus::db";

#[derive(Debug)]
pub struct Database {
    inner: redb_bincode::Database,
    commit_hook_order_lock: Arc<Mutex<()>>,
    ephemeral: bool,
}

impl Database {
    pub fn new_in_memory() -> DbResult<Database> {
        debug!(target: LOG_TARGET, "Opening in-memory database");
        let inner = redb::Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .context(DatabaseSnafu)?;
        Ok(Self::from_inner(inner, true))
    }

    pub fn open(path: impl Into<PathBuf>) -> DbResult<Database> {
        let path = path.into();
        std::fs::create_dir_all(path.parent().context(InvalidPathSnafu)?)?;
        debug!(target: LOG_TARGET, path = %path.display(), "Opening database…");

        let mut inner = redb::Database::create(path).context(DatabaseSnafu)?;
        let _ = inner.compact().inspect_err(|err| {
            warn!(target: LOG_TARGET, err = %err.fmt_compact(), "Failed to compact database");
        });

        Ok(Self::from_inner(inner, false))
    }

    fn from_inner(inner: redb::Database, ephemeral: bool) -> Database {
        Self {
            inner: redb_bincode::Database::from(inner),
            commit_hook_order_lock: Arc::new(Mutex::new(())),
            ephemeral,
        }
    }

    pub fn read_with<T>(&self, f: impl FnOnce(&'_ ReadTransaction) -> DbResult<T>) -> DbResult<T> {
        let dbtx = self.inner.begin_read().context(TransactionSnafu)?;

        f(&dbtx)
    }

    pub fn write_with<T>(
        &self,
        f: impl FnOnce(&'_ WriteTransactionCtx) -> DbResult<T>,
    ) -> DbResult<T> {
        let dbtx = WriteTransactionCtx::new(
            self.inner.begin_write().context(TransactionSnafu)?,
            self.commit_hook_order_lock.clone(),
        );
        let res = f(&dbtx)?;

        dbtx.commit().context(CommitSnafu)?;

        Ok(res)
    }

    /// Do a writeable transaction where the handler can fail for logical reasons
    ///
    /// Logical (`E`) failures roll the transaction back just like database
    /// errors do.
    pub fn write_with_falliable<T, E>(
        &self,
        f: impl FnOnce(&'_ WriteTransactionCtx) -> DbTxResult<T, E>,
    ) -> DbTxResult<T, E>
    where
        E: snafu::Error + 'static,
    {
        let dbtx = WriteTransactionCtx::new(
            self.inner.begin_write().context(TransactionSnafu)?,
            self.commit_hook_order_lock.clone(),
        );
        let res = f(&dbtx)?;
        dbtx.commit().context(CommitSnafu)?;

        Ok(res)
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }
}

#[cfg(test)]
mod tests;
