use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dagbft_util_db::def_table;
use snafu::{ResultExt as _, Snafu};

use crate::Database;
use crate::error::{DbTxError, TxSnafu};

def_table! {
    test_counters: u64 => u64
}

#[derive(Debug, Snafu)]
struct Refused;

#[test_log::test]
fn write_then_read_in_memory() {
    let db = Database::new_in_memory().expect("in-memory db");
    assert!(db.is_ephemeral());

    db.write_with(|tx| {
        let mut tbl = tx.open_table(&test_counters::TABLE)?;
        tbl.insert(&1, &10)?;
        tbl.insert(&2, &20)?;
        Ok(())
    })
    .expect("write");

    let values = db
        .read_with(|tx| {
            let tbl = tx.open_table(&test_counters::TABLE)?;
            let mut values = vec![];
            for kv in tbl.range(..)? {
                let (_, v) = kv?;
                values.push(v.value());
            }
            Ok(values)
        })
        .expect("read");

    assert_eq!(values, vec![10, 20]);
}

#[test_log::test]
fn commit_hooks_only_run_after_commit() {
    let db = Database::new_in_memory().expect("in-memory db");
    let hits = Arc::new(AtomicUsize::new(0));

    db.write_with(|tx| {
        tx.open_table(&test_counters::TABLE)?;
        let hits = hits.clone();
        tx.on_commit(move || {
            hits.fetch_add(1, Ordering::SeqCst);
        });
        Ok(())
    })
    .expect("write");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let res = db.write_with_falliable(|tx| {
        let mut tbl = tx.open_table(&test_counters::TABLE)?;
        tbl.insert(&3, &30)?;
        let hits = hits.clone();
        tx.on_commit(move || {
            hits.fetch_add(1, Ordering::SeqCst);
        });
        Err::<(), _>(Refused).context(TxSnafu)
    });
    assert!(res.is_err());
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let rolled_back = db
        .read_with(|tx| {
            let tbl = tx.open_table(&test_counters::TABLE)?;
            Ok(tbl.get(&3)?.is_none())
        })
        .expect("read");
    assert!(rolled_back);
}

#[test_log::test]
fn file_backed_database_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("consensus.redb");

    {
        let db = Database::open(&path).expect("open");
        assert!(!db.is_ephemeral());
        db.write_with(|tx| {
            tx.open_table(&test_counters::TABLE)?.insert(&7, &70)?;
            Ok(())
        })
        .expect("write");
    }

    let db = Database::open(&path).expect("reopen");
    let value = db
        .read_with(|tx| {
            let tbl = tx.open_table(&test_counters::TABLE)?;
            Ok(tbl.get(&7)?.map(|v| v.value()))
        })
        .expect("read");
    assert_eq!(value, Some(70));
}

#[test]
fn tx_error_maps_logical_error() {
    let err: DbTxError<Refused> = DbTxError::TxError {
        source: Refused,
        location: snafu::location!(),
    };
    assert!(matches!(
        err.map(|_| Refused),
        DbTxError::TxError { .. }
    ));
}
