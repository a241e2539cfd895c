use log::info;

use tunnel_core::migration::Migration;
use tunnel_core::payments::DbError;

use crate::redb::{decode, encode, RedbChannelDb, SCAN_CURSOR_KEY};

/// Meta key the scan cursor was stored under before version 1
const LEGACY_BLOCK_OFFSET_KEY: &str = "block_offset";

/// Schema migrations of [`RedbChannelDb`], in order
pub const MIGRATIONS: &[Migration<RedbChannelDb>] = &[
    Migration { version: 1, description: "rename block_offset to scan_cursor", run: rename_cursor },
    Migration { version: 2, description: "re-encode channel records", run: reencode_channels },
];

fn rename_cursor(db: &RedbChannelDb) -> Result<(), DbError> {
    if let Some(offset) = db.get_meta(LEGACY_BLOCK_OFFSET_KEY)? {
        // keep whichever is further along if both exist
        let cursor = db.get_meta(SCAN_CURSOR_KEY)?.map_or(offset, |c| c.max(offset));
        db.set_meta(SCAN_CURSOR_KEY, cursor)?;
        db.remove_meta(LEGACY_BLOCK_OFFSET_KEY)?;
        info!("moved scan cursor {} to its new key", cursor);
    }
    Ok(())
}

fn reencode_channels(db: &RedbChannelDb) -> Result<(), DbError> {
    let mut records = Vec::new();
    for (key, bytes) in db.raw_channels()? {
        let channel = decode(&bytes)?;
        let encoded = encode(&channel)?;
        if encoded != bytes {
            records.push((key, encoded));
        }
    }
    db.put_raw(&records)?;
    info!("re-encoded {} channel records", records.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;
    use tunnel_core::migration::{current_version, run_migrations, MigrationError};
    use tunnel_core::model::{ChannelAddress, ChannelStatus};
    use tunnel_core::payments::ChannelDb;

    #[test]
    fn migrate_legacy_store_test() {
        let dir = tempfile::tempdir().unwrap();
        let (db, _) = RedbChannelDb::open(dir.path()).unwrap();
        db.set_meta(LEGACY_BLOCK_OFFSET_KEY, 4242).unwrap();
        let legacy = format!(
            concat!(
                "{{\"address\":\"0:aa\",\"counterparty\":\"{}\",",
                "\"deposited\":7,\"status\":\"active\"}}"
            ),
            "11".repeat(32)
        );
        db.put_raw(&[("0:aa".to_string(), legacy.into_bytes())]).unwrap();

        assert_eq!(run_migrations(&db, MIGRATIONS).unwrap(), 0);
        assert_eq!(db.get_migration_version().unwrap(), current_version(MIGRATIONS));
        assert_eq!(db.get_scan_cursor().unwrap(), 4242);
        assert_eq!(db.get_meta(LEGACY_BLOCK_OFFSET_KEY).unwrap(), None);

        let channel = db.get_channel(&ChannelAddress::new("0:aa")).unwrap();
        assert_eq!(channel.status, ChannelStatus::Active);
        assert!(!channel.our_ready && !channel.their_ready);
        let (_, raw) = db.raw_channels().unwrap().pop().unwrap();
        assert!(String::from_utf8(raw).unwrap().contains("our_ready"));
    }

    #[test]
    fn rename_keeps_newer_cursor_test() {
        let dir = tempfile::tempdir().unwrap();
        let (db, _) = RedbChannelDb::open(dir.path()).unwrap();
        db.set_meta(LEGACY_BLOCK_OFFSET_KEY, 10).unwrap();
        db.set_scan_cursor(20).unwrap();
        rename_cursor(&db).unwrap();
        assert_eq!(db.get_scan_cursor().unwrap(), 20);
    }

    #[test]
    fn corrupt_record_fails_test() {
        let dir = tempfile::tempdir().unwrap();
        let (db, _) = RedbChannelDb::open(dir.path()).unwrap();
        db.set_migration_version(1).unwrap();
        db.put_raw(&[("0:bad".to_string(), b"not json".to_vec())]).unwrap();
        let err = run_migrations(&db, MIGRATIONS).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::Failed { version: 2, source: DbError::Encoding(_) }
        ));
        assert_eq!(db.get_migration_version().unwrap(), 1);
    }
}
