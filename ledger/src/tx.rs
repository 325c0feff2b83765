//! Transaction runner: one unit of work, one datastore transaction.

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, error, instrument, warn};

use simplebank_common::{AccountId, EntryId, LedgerError, Result, TransferId};

use crate::account::{Account, NewAccount};
use crate::context::TxContext;
use crate::entry::Entry;
use crate::store::{Database, LedgerStore, LedgerTx, Page, StoreOp};
use crate::transfer::Transfer;

/// A store bound to one open transaction and its context.
///
/// Every primitive is checked against the context before and after it runs.
/// The runner only lends this out by `&mut`, so it cannot outlive the unit of
/// work it was created for.
pub struct TxScope<T> {
    tx: T,
    ctx: TxContext,
}

impl<T: LedgerTx> TxScope<T> {
    fn new(tx: T, ctx: TxContext) -> Self {
        Self { tx, ctx }
    }

    /// Context of the enclosing unit of work.
    pub fn context(&self) -> &TxContext {
        &self.ctx
    }

    async fn run<R, F>(&mut self, work: F) -> Result<R>
    where
        F: for<'t> FnOnce(&'t mut TxScope<T>) -> BoxFuture<'t, Result<R>>,
    {
        if let Some(remaining) = self.ctx.remaining() {
            self.ctx
                .guard(StoreOp::Begin, self.tx.limit_waits(remaining))
                .await?;
        }
        let value = work(&mut *self).await?;
        self.ctx.check(StoreOp::Commit)?;
        Ok(value)
    }
}

#[async_trait]
impl<T: LedgerTx> LedgerStore for TxScope<T> {
    async fn create_account(&mut self, params: NewAccount) -> Result<Account> {
        self.ctx
            .guard(StoreOp::CreateAccount, self.tx.create_account(params))
            .await
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account> {
        self.ctx
            .guard(StoreOp::GetAccount, self.tx.get_account(id))
            .await
    }

    async fn list_accounts(&mut self, page: Page) -> Result<Vec<Account>> {
        self.ctx
            .guard(StoreOp::ListAccounts, self.tx.list_accounts(page))
            .await
    }

    async fn delete_account(&mut self, id: AccountId) -> Result<()> {
        self.ctx
            .guard(StoreOp::DeleteAccount, self.tx.delete_account(id))
            .await
    }

    async fn create_transfer(
        &mut self,
        from: AccountId,
        to: AccountId,
        amount: i64,
    ) -> Result<Transfer> {
        self.ctx
            .guard(
                StoreOp::CreateTransfer,
                self.tx.create_transfer(from, to, amount),
            )
            .await
    }

    async fn get_transfer(&mut self, id: TransferId) -> Result<Transfer> {
        self.ctx
            .guard(StoreOp::GetTransfer, self.tx.get_transfer(id))
            .await
    }

    async fn list_transfers(&mut self, account: AccountId, page: Page) -> Result<Vec<Transfer>> {
        self.ctx
            .guard(StoreOp::ListTransfers, self.tx.list_transfers(account, page))
            .await
    }

    async fn create_entry(&mut self, account: AccountId, amount: i64) -> Result<Entry> {
        self.ctx
            .guard(StoreOp::CreateEntry, self.tx.create_entry(account, amount))
            .await
    }

    async fn get_entry(&mut self, id: EntryId) -> Result<Entry> {
        self.ctx
            .guard(StoreOp::GetEntry, self.tx.get_entry(id))
            .await
    }

    async fn list_entries(&mut self, account: AccountId, page: Page) -> Result<Vec<Entry>> {
        self.ctx
            .guard(StoreOp::ListEntries, self.tx.list_entries(account, page))
            .await
    }

    async fn add_account_balance(&mut self, id: AccountId, delta: i64) -> Result<Account> {
        self.ctx
            .guard(
                StoreOp::AddAccountBalance,
                self.tx.add_account_balance(id, delta),
            )
            .await
    }
}

/// Runs units of work inside datastore transactions.
#[derive(Debug, Clone)]
pub struct TransactionRunner<D> {
    db: D,
}

impl<D: Database> TransactionRunner<D> {
    /// Create a runner over `db`.
    pub fn new(db: D) -> Self {
        Self { db }
    }

    /// The underlying datastore, for standalone (auto-commit) use.
    pub fn database(&self) -> &D {
        &self.db
    }

    /// Run `work` in a fresh transaction.
    ///
    /// Commits when `work` succeeds. When it fails, rolls back and returns the
    /// original error; if the rollback fails too, both are returned together.
    /// Never retries.
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id()))]
    pub async fn run_in_transaction<T, F>(&self, ctx: TxContext, work: F) -> Result<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut TxScope<D::Tx>) -> BoxFuture<'t, Result<T>> + Send,
    {
        let tx = ctx.guard(StoreOp::Begin, self.db.begin()).await?;
        debug!("Transaction started");

        let mut scope = TxScope::new(tx, ctx);
        let outcome = scope.run(work).await;
        let TxScope { tx, ctx } = scope;

        match outcome {
            Ok(value) => {
                tx.commit().await?;
                debug!(correlation_id = %ctx.correlation_id(), "Transaction committed");
                Ok(value)
            }
            Err(err) => match tx.rollback().await {
                Ok(()) => {
                    warn!(
                        correlation_id = %ctx.correlation_id(),
                        error = %err,
                        "Transaction rolled back"
                    );
                    Err(err)
                }
                Err(rollback_err) => {
                    error!(
                        correlation_id = %ctx.correlation_id(),
                        error = %err,
                        rollback_error = %rollback_err,
                        "Rollback failed"
                    );
                    Err(LedgerError::RollbackFailed {
                        source: Box::new(err),
                        rollback: Box::new(rollback_err),
                    })
                }
            },
        }
    }
}
