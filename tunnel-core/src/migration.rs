use log::{info, warn};
use thiserror::Error;

use crate::payments::{ChannelDb, DbError};

/// One schema step of the local store.
///
/// `D` is the concrete store when a step needs more than the [`ChannelDb`] surface.
pub struct Migration<D: ?Sized> {
    pub version: u64,
    pub description: &'static str,
    pub run: fn(&D) -> Result<(), DbError>,
}

impl<D: ?Sized> Clone for Migration<D> {
    fn clone(&self) -> Self {
        Migration { version: self.version, description: self.description, run: self.run }
    }
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration list out of order at index {index}: found version {found}")]
    OutOfOrder { index: usize, found: u64 },
    #[error("store version {stored} is newer than the latest known migration {current}")]
    Ahead { stored: u64, current: u64 },
    #[error("migration {version} failed: {source}")]
    Failed { version: u64, source: DbError },
    #[error("store: {0}")]
    Db(#[from] DbError),
}

/// The version of a store with every migration in `list` applied
pub fn current_version<D: ?Sized>(list: &[Migration<D>]) -> u64 {
    list.len() as u64
}

fn check_order<D: ?Sized>(list: &[Migration<D>]) -> Result<(), MigrationError> {
    for (index, m) in list.iter().enumerate() {
        if m.version != index as u64 + 1 {
            return Err(MigrationError::OutOfOrder { index, found: m.version });
        }
    }
    Ok(())
}

/// Run every migration newer than the stored version, in ascending order.
///
/// The stored version is advanced after each step, so an interrupted run resumes at the
/// failed step. Returns the version the store was at before.
pub fn run_migrations<D: ChannelDb + ?Sized>(
    db: &D,
    list: &[Migration<D>],
) -> Result<u64, MigrationError> {
    check_order(list)?;
    let current = current_version(list);
    let stored = db.get_migration_version()?;
    if stored > current {
        return Err(MigrationError::Ahead { stored, current });
    }
    if stored == current {
        info!("store schema is up to date at version {}", stored);
        return Ok(stored);
    }
    for m in list.iter().filter(|m| m.version > stored) {
        info!("running migration {}: {}", m.version, m.description);
        (m.run)(db).map_err(|source| {
            warn!("migration {} failed: {}", m.version, source);
            MigrationError::Failed { version: m.version, source }
        })?;
        db.set_migration_version(m.version)?;
    }
    info!("store schema migrated from version {} to {}", stored, current);
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_utils::TestChannelDb;
    use std::sync::atomic::{AtomicU64, Ordering};
    use test_log::test;

    // records the order steps ran in, as a base-10 digit string
    static TRACE: AtomicU64 = AtomicU64::new(0);

    fn record(step: u64) -> Result<(), DbError> {
        let prev = TRACE.load(Ordering::SeqCst);
        TRACE.store(prev * 10 + step, Ordering::SeqCst);
        Ok(())
    }

    fn list() -> Vec<Migration<TestChannelDb>> {
        vec![
            Migration { version: 1, description: "one", run: |_| record(1) },
            Migration { version: 2, description: "two", run: |_| record(2) },
            Migration { version: 3, description: "three", run: |_| record(3) },
        ]
    }

    fn fail(_db: &TestChannelDb) -> Result<(), DbError> {
        Err(DbError::Storage("boom".into()))
    }

    // a single test body, the static trace is shared
    #[test]
    fn run_migrations_test() {
        let db = TestChannelDb::new();
        db.set_migration_version(1).unwrap();
        TRACE.store(0, Ordering::SeqCst);
        assert_eq!(run_migrations(&db, &list()).unwrap(), 1);
        assert_eq!(TRACE.load(Ordering::SeqCst), 23);
        assert_eq!(db.get_migration_version().unwrap(), 3);

        // up to date, nothing runs
        TRACE.store(0, Ordering::SeqCst);
        assert_eq!(run_migrations(&db, &list()).unwrap(), 3);
        assert_eq!(TRACE.load(Ordering::SeqCst), 0);

        // failure stops at the failed step, keeping earlier progress
        let db = TestChannelDb::new();
        let mut failing = list();
        failing[1].run = fail;
        let err = run_migrations(&db, &failing).unwrap_err();
        assert!(matches!(err, MigrationError::Failed { version: 2, .. }));
        assert_eq!(db.get_migration_version().unwrap(), 1);
    }

    #[test]
    fn out_of_order_test() {
        let db = TestChannelDb::new();
        let mut bad = list();
        bad.swap(0, 1);
        assert!(matches!(
            run_migrations(&db, &bad),
            Err(MigrationError::OutOfOrder { index: 0, found: 2 })
        ));
        assert_eq!(db.get_migration_version().unwrap(), 0);
    }

    #[test]
    fn ahead_test() {
        let db = TestChannelDb::new();
        db.set_migration_version(7).unwrap();
        assert!(matches!(
            run_migrations(&db, &list()),
            Err(MigrationError::Ahead { stored: 7, current: 3 })
        ));
        assert_eq!(current_version(&list()), 3);
    }
}
