use std::sync::{Arc, Mutex};
use std::{ops, result};

use redb_bincode::WriteTransaction;

type CommitHook = Box<dyn FnOnce() + Send + 'static>;

pub struct WriteTransactionCtx {
    commit_hook_order_lock: Arc<Mutex<()>>,
    dbtx: WriteTransaction,
    on_commit: Mutex<Vec<CommitHook>>,
}

impl WriteTransactionCtx {
    pub fn new(dbtx: WriteTransaction, commit_hook_order_lock: Arc<Mutex<()>>) -> Self {
        Self {
            dbtx,
            on_commit: Mutex::new(vec![]),
            commit_hook_order_lock,
        }
    }
}

impl ops::Deref for WriteTransactionCtx {
    type Target = WriteTransaction;

    fn deref(&self) -> &Self::Target {
        &self.dbtx
    }
}

impl WriteTransactionCtx {
    /// Run `f` after the transaction commits, never if it rolls back
    pub fn on_commit(&self, f: impl FnOnce() + Send + 'static) {
        self.on_commit
            .lock()
            .expect("Locking failed")
            .push(Box::new(f));
    }

    pub(super) fn commit(self) -> result::Result<(), redb::CommitError> {
        let Self {
            dbtx,
            on_commit,
            commit_hook_order_lock,
        } = self;

        // Only one write tx exists at a time, but once `commit` returns another
        // one can commit and race its hooks with ours.
        let _guard = commit_hook_order_lock.lock().expect("Locking failed");

        dbtx.commit()?;

        for hook in on_commit.lock().expect("Locking failed").drain(..) {
            hook();
        }
        Ok(())
    }
}
