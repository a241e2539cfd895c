use std::sync::Arc;

use log::{debug, info, warn};
use thiserror::Error;
use tracing::instrument;

use crate::migration::{current_version, run_migrations, Migration, MigrationError};
use crate::model::ChannelStatus;
use crate::payments::{ChannelDb, DbError};
use crate::scanner::{ChainScanner, ScanError};
use crate::wallet::{WalletError, WalletHandle, WalletProvider};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("set migration version: {0}")]
    MarkFresh(DbError),
    #[error("migrate: {0}")]
    Migrate(#[from] MigrationError),
    #[error("read scan cursor: {0}")]
    Cursor(DbError),
    #[error("start scanner: {0}")]
    ScannerStart(#[from] ScanError),
    #[error("load channels: {0}")]
    LoadChannels(DbError),
    #[error("init wallet: {0}")]
    Wallet(#[from] WalletError),
}

/// What a successful resume did
pub struct ResumeReport {
    /// the seqno the scanner was started from
    pub cursor: u32,
    /// number of channels replayed to the scanner
    pub replayed: usize,
    /// the schema version before migrations, `None` for a fresh store
    pub migrated_from: Option<u64>,
    pub wallet: WalletHandle,
}

/// Brings the local store up to date and resumes the chain scanner from its cursor.
pub struct Bootstrapper<D: ChannelDb + 'static, S: ChainScanner + 'static> {
    db: Arc<D>,
    scanner: Arc<S>,
    wallet_provider: Arc<dyn WalletProvider>,
    migrations: Vec<Migration<D>>,
}

impl<D: ChannelDb + 'static, S: ChainScanner + 'static> Bootstrapper<D, S> {
    pub fn new(db: Arc<D>, scanner: Arc<S>, wallet_provider: Arc<dyn WalletProvider>) -> Self {
        Bootstrapper { db, scanner, wallet_provider, migrations: Vec::new() }
    }

    /// The store's migration list, versions contiguous from 1
    pub fn migrations(mut self, migrations: &[Migration<D>]) -> Self {
        self.migrations = migrations.to_vec();
        self
    }

    /// Prepare the store and start the scanner.
    ///
    /// `fresh` tells whether the store was created by this process. On error nothing is left
    /// running.
    #[instrument(skip(self))]
    pub async fn resume(&self, fresh: bool) -> Result<ResumeReport, BootstrapError> {
        let migrated_from = if fresh {
            let version = current_version(&self.migrations);
            self.db.set_migration_version(version).map_err(BootstrapError::MarkFresh)?;
            info!("fresh store, schema version set to {}", version);
            None
        } else {
            Some(run_migrations(self.db.as_ref(), &self.migrations)?)
        };

        let cursor = match self.db.get_scan_cursor() {
            Ok(seqno) => seqno,
            Err(DbError::NotFound) => {
                debug!("no scan cursor stored, scanning from the start");
                0
            }
            Err(e) => return Err(BootstrapError::Cursor(e)),
        };

        self.scanner.start(cursor)?;
        info!("scanner started from seqno {}", cursor);

        match self.after_start(cursor, migrated_from).await {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!("bootstrap failed after scanner start, stopping scanner: {}", e);
                self.scanner.stop();
                Err(e)
            }
        }
    }

    async fn after_start(
        &self,
        cursor: u32,
        migrated_from: Option<u64>,
    ) -> Result<ResumeReport, BootstrapError> {
        // must be registered before the replay, or updates between the two are lost
        self.db.set_channel_observer(self.scanner.clone());

        let mut channels = self.db.get_channels(None).map_err(BootstrapError::LoadChannels)?;
        channels.retain(|c| c.status != ChannelStatus::Inactive);
        channels.sort_by(|a, b| a.address.cmp(&b.address));
        for channel in &channels {
            debug!("replaying channel {} ({})", channel.address, channel.status);
            self.scanner.on_channel_update(channel, true);
        }
        info!("replayed {} channels to the scanner", channels.len());

        let wallet = self.wallet_provider.init_wallet().await?;
        info!("wallet initialized: {}", wallet.wallet.address());

        Ok(ResumeReport { cursor, replayed: channels.len(), migrated_from, wallet })
    }
}
