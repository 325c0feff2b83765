//! Ledger store primitives and the transaction seams behind them.
//!
//! A [`LedgerStore`] exposes one datastore round trip per method. The same
//! trait is implemented by pool-backed stores (each call auto-commits) and by
//! transaction handles ([`LedgerTx`]), so a unit of work is written once and
//! runs in either mode.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;

use simplebank_common::{AccountId, EntryId, LedgerError, Result, TransferId};

use crate::account::{Account, NewAccount};
use crate::entry::Entry;
use crate::transfer::Transfer;

/// Store operations, used for logging, error context and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Begin,
    Commit,
    Rollback,
    CreateAccount,
    GetAccount,
    ListAccounts,
    DeleteAccount,
    CreateTransfer,
    GetTransfer,
    ListTransfers,
    CreateEntry,
    GetEntry,
    ListEntries,
    AddAccountBalance,
}

impl StoreOp {
    pub const ALL: [StoreOp; 14] = [
        StoreOp::Begin,
        StoreOp::Commit,
        StoreOp::Rollback,
        StoreOp::CreateAccount,
        StoreOp::GetAccount,
        StoreOp::ListAccounts,
        StoreOp::DeleteAccount,
        StoreOp::CreateTransfer,
        StoreOp::GetTransfer,
        StoreOp::ListTransfers,
        StoreOp::CreateEntry,
        StoreOp::GetEntry,
        StoreOp::ListEntries,
        StoreOp::AddAccountBalance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreOp::Begin => "begin",
            StoreOp::Commit => "commit",
            StoreOp::Rollback => "rollback",
            StoreOp::CreateAccount => "create_account",
            StoreOp::GetAccount => "get_account",
            StoreOp::ListAccounts => "list_accounts",
            StoreOp::DeleteAccount => "delete_account",
            StoreOp::CreateTransfer => "create_transfer",
            StoreOp::GetTransfer => "get_transfer",
            StoreOp::ListTransfers => "list_transfers",
            StoreOp::CreateEntry => "create_entry",
            StoreOp::GetEntry => "get_entry",
            StoreOp::ListEntries => "list_entries",
            StoreOp::AddAccountBalance => "add_account_balance",
        }
    }
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreOp {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        StoreOp::ALL
            .into_iter()
            .find(|op| op.as_str() == s.trim())
            .ok_or_else(|| LedgerError::invalid("operation", format!("unknown store operation: {s}")))
    }
}

/// Limit/offset window for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    /// Build a page from a 1-based page number and a page size.
    pub fn new(page_id: i64, page_size: i64) -> Result<Self> {
        if page_id < 1 {
            return Err(LedgerError::invalid("page_id", "page_id must be at least 1"));
        }
        if page_size < 1 {
            return Err(LedgerError::invalid(
                "page_size",
                "page_size must be at least 1",
            ));
        }
        Ok(Self {
            limit: page_size,
            offset: (page_id - 1) * page_size,
        })
    }

    /// A page large enough for tests and reconciliation jobs.
    pub fn all() -> Self {
        Self {
            limit: i64::MAX,
            offset: 0,
        }
    }
}

/// Data-access primitives over accounts, entries and transfers.
#[async_trait]
pub trait LedgerStore: Send {
    /// Insert an account row.
    async fn create_account(&mut self, params: NewAccount) -> Result<Account>;

    /// Point lookup; `NotFound` when absent.
    async fn get_account(&mut self, id: AccountId) -> Result<Account>;

    /// Accounts ordered by id.
    async fn list_accounts(&mut self, page: Page) -> Result<Vec<Account>>;

    /// Delete an account that nothing references.
    async fn delete_account(&mut self, id: AccountId) -> Result<()>;

    /// Insert a transfer row. An unknown account is `NotFound`.
    async fn create_transfer(
        &mut self,
        from: AccountId,
        to: AccountId,
        amount: i64,
    ) -> Result<Transfer>;

    /// Point lookup; `NotFound` when absent.
    async fn get_transfer(&mut self, id: TransferId) -> Result<Transfer>;

    /// Transfers where `account` is either side, ordered by id.
    async fn list_transfers(&mut self, account: AccountId, page: Page) -> Result<Vec<Transfer>>;

    /// Insert an entry row. An unknown account is `NotFound`.
    async fn create_entry(&mut self, account: AccountId, amount: i64) -> Result<Entry>;

    /// Point lookup; `NotFound` when absent.
    async fn get_entry(&mut self, id: EntryId) -> Result<Entry>;

    /// Entries posted against `account`, ordered by id.
    async fn list_entries(&mut self, account: AccountId, page: Page) -> Result<Vec<Entry>>;

    /// Add `delta` to the stored balance and return the updated row.
    ///
    /// This is a single statement. Inside a transaction it takes the row lock,
    /// which is held until commit or rollback.
    async fn add_account_balance(&mut self, id: AccountId, delta: i64) -> Result<Account>;
}

/// An open datastore transaction.
#[async_trait]
pub trait LedgerTx: LedgerStore + Sized {
    /// Make every statement issued through this handle durable.
    async fn commit(self) -> Result<()>;

    /// Discard every statement issued through this handle.
    async fn rollback(self) -> Result<()>;

    /// Stop any later statement from waiting longer than `remaining`.
    ///
    /// Backends whose waits end when the caller stops polling can ignore this.
    async fn limit_waits(&mut self, remaining: Duration) -> Result<()> {
        let _ = remaining;
        Ok(())
    }
}

/// A datastore that can open transactions.
#[async_trait]
pub trait Database: Send + Sync {
    type Tx: LedgerTx;

    /// Open a new transaction.
    async fn begin(&self) -> Result<Self::Tx>;
}
