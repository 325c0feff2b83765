//! PostgreSQL-backed ledger store.
//!
//! [`PgDatabase`] runs each primitive on the pool in auto-commit mode;
//! [`PgTx`] runs them on one open transaction. Both go through the same SQL
//! in [`queries`].

mod error;
mod queries;

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};

use simplebank_common::{AccountId, EntryId, LedgerError, Result, TransferId};

use crate::account::{Account, NewAccount};
use crate::config::DatabaseConfig;
use crate::entry::Entry;
use crate::store::{Database, LedgerStore, LedgerTx, Page, StoreOp};
use crate::transfer::Transfer;

use error::map_sqlx_error;

/// Postgres datastore over a connection pool.
#[derive(Debug, Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool as configured, applying migrations when enabled.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| map_sqlx_error(StoreOp::Begin, e))?;
        info!(
            max_connections = config.max_connections,
            "Connected to database"
        );

        let db = Self::from_pool(pool);
        if config.run_migrations {
            db.migrate().await?;
        }
        Ok(db)
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::persistence("migrate", e.to_string()))?;
        debug!("Migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Database for PgDatabase {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(StoreOp::Begin, e))?;
        Ok(PgTx { tx })
    }
}

#[async_trait]
impl LedgerStore for PgDatabase {
    async fn create_account(&mut self, params: NewAccount) -> Result<Account> {
        queries::create_account(&self.pool, params).await
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account> {
        queries::get_account(&self.pool, id).await
    }

    async fn list_accounts(&mut self, page: Page) -> Result<Vec<Account>> {
        queries::list_accounts(&self.pool, page).await
    }

    async fn delete_account(&mut self, id: AccountId) -> Result<()> {
        queries::delete_account(&self.pool, id).await
    }

    async fn create_transfer(
        &mut self,
        from: AccountId,
        to: AccountId,
        amount: i64,
    ) -> Result<Transfer> {
        queries::create_transfer(&self.pool, from, to, amount).await
    }

    async fn get_transfer(&mut self, id: TransferId) -> Result<Transfer> {
        queries::get_transfer(&self.pool, id).await
    }

    async fn list_transfers(&mut self, account: AccountId, page: Page) -> Result<Vec<Transfer>> {
        queries::list_transfers(&self.pool, account, page).await
    }

    async fn create_entry(&mut self, account: AccountId, amount: i64) -> Result<Entry> {
        queries::create_entry(&self.pool, account, amount).await
    }

    async fn get_entry(&mut self, id: EntryId) -> Result<Entry> {
        queries::get_entry(&self.pool, id).await
    }

    async fn list_entries(&mut self, account: AccountId, page: Page) -> Result<Vec<Entry>> {
        queries::list_entries(&self.pool, account, page).await
    }

    async fn add_account_balance(&mut self, id: AccountId, delta: i64) -> Result<Account> {
        queries::add_account_balance(&self.pool, id, delta).await
    }
}

/// An open Postgres transaction.
///
/// Dropping it without committing rolls it back when the connection returns
/// to the pool.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerStore for PgTx {
    async fn create_account(&mut self, params: NewAccount) -> Result<Account> {
        queries::create_account(&mut *self.tx, params).await
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account> {
        queries::get_account(&mut *self.tx, id).await
    }

    async fn list_accounts(&mut self, page: Page) -> Result<Vec<Account>> {
        queries::list_accounts(&mut *self.tx, page).await
    }

    async fn delete_account(&mut self, id: AccountId) -> Result<()> {
        queries::delete_account(&mut *self.tx, id).await
    }

    async fn create_transfer(
        &mut self,
        from: AccountId,
        to: AccountId,
        amount: i64,
    ) -> Result<Transfer> {
        queries::create_transfer(&mut *self.tx, from, to, amount).await
    }

    async fn get_transfer(&mut self, id: TransferId) -> Result<Transfer> {
        queries::get_transfer(&mut *self.tx, id).await
    }

    async fn list_transfers(&mut self, account: AccountId, page: Page) -> Result<Vec<Transfer>> {
        queries::list_transfers(&mut *self.tx, account, page).await
    }

    async fn create_entry(&mut self, account: AccountId, amount: i64) -> Result<Entry> {
        queries::create_entry(&mut *self.tx, account, amount).await
    }

    async fn get_entry(&mut self, id: EntryId) -> Result<Entry> {
        queries::get_entry(&mut *self.tx, id).await
    }

    async fn list_entries(&mut self, account: AccountId, page: Page) -> Result<Vec<Entry>> {
        queries::list_entries(&mut *self.tx, account, page).await
    }

    async fn add_account_balance(&mut self, id: AccountId, delta: i64) -> Result<Account> {
        queries::add_account_balance(&mut *self.tx, id, delta).await
    }
}

#[async_trait]
impl LedgerTx for PgTx {
    async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error(StoreOp::Commit, e))
    }

    async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error(StoreOp::Rollback, e))
    }

    /// Sets `lock_timeout` and `statement_timeout` for the rest of the
    /// transaction, so a statement blocked on a row lock is cancelled by the
    /// server and the connection is free for the rollback.
    async fn limit_waits(&mut self, remaining: Duration) -> Result<()> {
        queries::limit_waits(&mut *self.tx, remaining).await
    }
}
