use std::fmt::Display;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use redb::{Database, ReadableTable, TableDefinition};
use tracing::*;

use tunnel_core::model::{Channel, ChannelAddress, ChannelStatus};
use tunnel_core::payments::{ChannelDb, ChannelObserver, DbError};

const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");
const CHANNELS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("channels");

pub(crate) const MIGRATION_VERSION_KEY: &str = "migration_version";
pub(crate) const SCAN_CURSOR_KEY: &str = "scan_cursor";

const DB_FILENAME: &str = "channels.redb";

pub(crate) fn storage<E: Display>(e: E) -> DbError {
    DbError::Storage(e.to_string())
}

pub(crate) fn encode(channel: &Channel) -> Result<Vec<u8>, DbError> {
    serde_json::to_vec(channel).map_err(|e| DbError::Encoding(e.to_string()))
}

pub(crate) fn decode(bytes: &[u8]) -> Result<Channel, DbError> {
    serde_json::from_slice(bytes).map_err(|e| DbError::Encoding(e.to_string()))
}

/// A [`ChannelDb`] backed by redb.
///
/// Meta values (migration version, scan cursor) live in one table, channel records as JSON in
/// another, keyed by channel address.
pub struct RedbChannelDb {
    db: Database,
    observer: RwLock<Option<Arc<dyn ChannelObserver>>>,
}

impl RedbChannelDb {
    /// Open or create the store in `dir`.
    ///
    /// Also returns whether the database file was created by this call.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<(Self, bool), DbError> {
        let dir = dir.as_ref();
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(storage)?;
        }
        if !dir.is_dir() {
            return Err(DbError::Storage(format!("{} is not a directory", dir.display())));
        }
        let path = dir.join(DB_FILENAME);
        let fresh = !path.exists();
        let db = Database::create(&path).map_err(storage)?;
        {
            // create the tables if they don't exist
            let tx = db.begin_write().map_err(storage)?;
            tx.open_table(META_TABLE).map_err(storage)?;
            tx.open_table(CHANNELS_TABLE).map_err(storage)?;
            tx.commit().map_err(storage)?;
        }
        info!("opened channel store at {} fresh={}", path.display(), fresh);
        Ok((RedbChannelDb { db, observer: RwLock::new(None) }, fresh))
    }

    pub(crate) fn get_meta(&self, key: &str) -> Result<Option<u64>, DbError> {
        let tx = self.db.begin_read().map_err(storage)?;
        let table = tx.open_table(META_TABLE).map_err(storage)?;
        let value = table.get(key).map_err(storage)?.map(|v| v.value());
        Ok(value)
    }

    pub(crate) fn set_meta(&self, key: &str, value: u64) -> Result<(), DbError> {
        let tx = self.db.begin_write().map_err(storage)?;
        {
            let mut table = tx.open_table(META_TABLE).map_err(storage)?;
            table.insert(key, value).map_err(storage)?;
        }
        tx.commit().map_err(storage)
    }

    pub(crate) fn remove_meta(&self, key: &str) -> Result<(), DbError> {
        let tx = self.db.begin_write().map_err(storage)?;
        {
            let mut table = tx.open_table(META_TABLE).map_err(storage)?;
            table.remove(key).map_err(storage)?;
        }
        tx.commit().map_err(storage)
    }

    /// Channel records as stored, without decoding
    pub(crate) fn raw_channels(&self) -> Result<Vec<(String, Vec<u8>)>, DbError> {
        let tx = self.db.begin_read().map_err(storage)?;
        let table = tx.open_table(CHANNELS_TABLE).map_err(storage)?;
        let mut records = Vec::new();
        for item in table.iter().map_err(storage)? {
            let (key, value) = item.map_err(storage)?;
            records.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(records)
    }

    /// Write records without notifying the observer
    pub(crate) fn put_raw(&self, records: &[(String, Vec<u8>)]) -> Result<(), DbError> {
        let tx = self.db.begin_write().map_err(storage)?;
        {
            let mut table = tx.open_table(CHANNELS_TABLE).map_err(storage)?;
            for (key, value) in records {
                table.insert(key.as_str(), value.as_slice()).map_err(storage)?;
            }
        }
        tx.commit().map_err(storage)
    }
}

impl ChannelDb for RedbChannelDb {
    fn get_migration_version(&self) -> Result<u64, DbError> {
        Ok(self.get_meta(MIGRATION_VERSION_KEY)?.unwrap_or(0))
    }

    fn set_migration_version(&self, version: u64) -> Result<(), DbError> {
        self.set_meta(MIGRATION_VERSION_KEY, version)
    }

    fn get_scan_cursor(&self) -> Result<u32, DbError> {
        let value = self.get_meta(SCAN_CURSOR_KEY)?.ok_or(DbError::NotFound)?;
        u32::try_from(value).map_err(|_| DbError::Encoding(format!("scan cursor {}", value)))
    }

    fn set_scan_cursor(&self, seqno: u32) -> Result<(), DbError> {
        let tx = self.db.begin_write().map_err(storage)?;
        {
            let mut table = tx.open_table(META_TABLE).map_err(storage)?;
            let stored = table.get(SCAN_CURSOR_KEY).map_err(storage)?.map(|v| v.value());
            if let Some(stored) = stored {
                if u64::from(seqno) < stored {
                    error!("scan cursor regression: {} < {}", seqno, stored);
                    return Err(DbError::CursorRegression {
                        stored: stored as u32,
                        requested: seqno,
                    });
                }
            }
            table.insert(SCAN_CURSOR_KEY, u64::from(seqno)).map_err(storage)?;
        }
        tx.commit().map_err(storage)
    }

    fn get_channels(&self, status: Option<ChannelStatus>) -> Result<Vec<Channel>, DbError> {
        let mut channels = Vec::new();
        for (_, bytes) in self.raw_channels()? {
            let channel = decode(&bytes)?;
            if status.map_or(true, |s| channel.status == s) {
                channels.push(channel);
            }
        }
        Ok(channels)
    }

    fn get_channel(&self, address: &ChannelAddress) -> Result<Channel, DbError> {
        let tx = self.db.begin_read().map_err(storage)?;
        let table = tx.open_table(CHANNELS_TABLE).map_err(storage)?;
        let record = table.get(address.as_str()).map_err(storage)?.ok_or(DbError::NotFound)?;
        let channel = decode(record.value())?;
        Ok(channel)
    }

    #[instrument(skip(self, channel), fields(address = %channel.address))]
    fn put_channel(&self, channel: &Channel) -> Result<(), DbError> {
        let bytes = encode(channel)?;
        self.put_raw(&[(channel.address.as_str().to_string(), bytes)])?;
        debug!("stored channel status={}", channel.status);
        let observer = self.observer.read().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(observer) = observer {
            observer.on_channel_update(channel, false);
        }
        Ok(())
    }

    fn set_channel_observer(&self, observer: Arc<dyn ChannelObserver>) {
        *self.observer.write().unwrap_or_else(|e| e.into_inner()) = Some(observer);
    }
}
