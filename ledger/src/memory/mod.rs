//! In-memory datastore.
//!
//! Mirrors the relational behavior the transfer engine depends on, so the
//! engine can be exercised without a database server:
//!
//! - Writes made inside a transaction are private to it until commit
//!   (read-committed visibility).
//! - `add_account_balance` and `delete_account` take a per-account row lock
//!   that is held until commit or rollback. A second transaction touching the
//!   same row waits, for at most the limit set by `limit_waits`.
//! - Inserts check that referenced accounts exist.
//! - Id sequences are not rolled back.
//!
//! There is no deadlock detector: transactions that lock rows in opposite
//! orders wait forever.

mod faults;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tracing::trace;

use simplebank_common::{
    AccountId, Entity, EntryId, LedgerError, Result, TransferId,
};

use crate::account::{Account, NewAccount};
use crate::entry::Entry;
use crate::store::{Database, LedgerStore, LedgerTx, Page, StoreOp};
use crate::transfer::Transfer;

pub use faults::Fault;
use faults::Faults;

const FOREIGN_KEY_VIOLATION: &str = "23503";
const CHECK_VIOLATION: &str = "23514";
const NUMERIC_OUT_OF_RANGE: &str = "22003";

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<EntryId, Entry>,
    transfers: BTreeMap<TransferId, Transfer>,
}

impl Tables {
    fn is_referenced(&self, id: AccountId) -> bool {
        self.entries.values().any(|e| e.account_id == id)
            || self
                .transfers
                .values()
                .any(|t| t.from_account_id == id || t.to_account_id == id)
    }
}

#[derive(Debug, Default)]
struct Inner {
    tables: Mutex<Tables>,
    row_locks: DashMap<AccountId, Arc<tokio::sync::Mutex<()>>>,
    account_seq: AtomicI64,
    entry_seq: AtomicI64,
    transfer_seq: AtomicI64,
    faults: Mutex<Faults>,
}

impl Inner {
    fn next_id(seq: &AtomicI64) -> i64 {
        seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Apply configured faults for `op`.
    async fn before(&self, op: StoreOp) -> Result<()> {
        let (delay, fail) = {
            let faults = self.faults.lock();
            (faults.delay_on.get(&op).copied(), faults.fail_on.contains(&op))
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(LedgerError::persistence(op.as_str(), "injected fault"));
        }
        Ok(())
    }
}

/// Shared in-memory datastore. Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Inner>,
}

impl MemoryDatabase {
    /// Create an empty datastore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Activate a fault until [`clear_faults`](Self::clear_faults) is called.
    pub fn inject_fault(&self, fault: Fault) {
        self.inner.faults.lock().apply(fault);
    }

    /// Deactivate every fault.
    pub fn clear_faults(&self) {
        self.inner.faults.lock().clear();
    }

    /// Number of committed rows per table: (accounts, entries, transfers).
    pub fn row_counts(&self) -> (usize, usize, usize) {
        let tables = self.inner.tables.lock();
        (
            tables.accounts.len(),
            tables.entries.len(),
            tables.transfers.len(),
        )
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        self.inner.before(StoreOp::Begin).await?;
        Ok(MemoryTx::new(self.inner.clone()))
    }
}

/// Commit or roll back a single-statement transaction.
async fn autocommit<T>(tx: MemoryTx, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => match tx.rollback().await {
            Ok(()) => Err(err),
            Err(rollback_err) => Err(LedgerError::RollbackFailed {
                source: Box::new(err),
                rollback: Box::new(rollback_err),
            }),
        },
    }
}

#[async_trait]
impl LedgerStore for MemoryDatabase {
    async fn create_account(&mut self, params: NewAccount) -> Result<Account> {
        let mut tx = self.begin().await?;
        let result = tx.create_account(params).await;
        autocommit(tx, result).await
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account> {
        let mut tx = self.begin().await?;
        let result = tx.get_account(id).await;
        autocommit(tx, result).await
    }

    async fn list_accounts(&mut self, page: Page) -> Result<Vec<Account>> {
        let mut tx = self.begin().await?;
        let result = tx.list_accounts(page).await;
        autocommit(tx, result).await
    }

    async fn delete_account(&mut self, id: AccountId) -> Result<()> {
        let mut tx = self.begin().await?;
        let result = tx.delete_account(id).await;
        autocommit(tx, result).await
    }

    async fn create_transfer(
        &mut self,
        from: AccountId,
        to: AccountId,
        amount: i64,
    ) -> Result<Transfer> {
        let mut tx = self.begin().await?;
        let result = tx.create_transfer(from, to, amount).await;
        autocommit(tx, result).await
    }

    async fn get_transfer(&mut self, id: TransferId) -> Result<Transfer> {
        let mut tx = self.begin().await?;
        let result = tx.get_transfer(id).await;
        autocommit(tx, result).await
    }

    async fn list_transfers(&mut self, account: AccountId, page: Page) -> Result<Vec<Transfer>> {
        let mut tx = self.begin().await?;
        let result = tx.list_transfers(account, page).await;
        autocommit(tx, result).await
    }

    async fn create_entry(&mut self, account: AccountId, amount: i64) -> Result<Entry> {
        let mut tx = self.begin().await?;
        let result = tx.create_entry(account, amount).await;
        autocommit(tx, result).await
    }

    async fn get_entry(&mut self, id: EntryId) -> Result<Entry> {
        let mut tx = self.begin().await?;
        let result = tx.get_entry(id).await;
        autocommit(tx, result).await
    }

    async fn list_entries(&mut self, account: AccountId, page: Page) -> Result<Vec<Entry>> {
        let mut tx = self.begin().await?;
        let result = tx.list_entries(account, page).await;
        autocommit(tx, result).await
    }

    async fn add_account_balance(&mut self, id: AccountId, delta: i64) -> Result<Account> {
        let mut tx = self.begin().await?;
        let result = tx.add_account_balance(id, delta).await;
        autocommit(tx, result).await
    }
}

/// An open in-memory transaction.
///
/// Dropping it without committing discards its writes and releases its row
/// locks.
pub struct MemoryTx {
    db: Arc<Inner>,
    locks: HashMap<AccountId, OwnedMutexGuard<()>>,
    created_accounts: BTreeMap<AccountId, Account>,
    deleted_accounts: BTreeSet<AccountId>,
    deltas: HashMap<AccountId, i64>,
    entries: BTreeMap<EntryId, Entry>,
    transfers: BTreeMap<TransferId, Transfer>,
    /// Longest a single row lock wait may take.
    wait_limit: Option<Duration>,
}

impl MemoryTx {
    fn new(db: Arc<Inner>) -> Self {
        Self {
            db,
            locks: HashMap::new(),
            created_accounts: BTreeMap::new(),
            deleted_accounts: BTreeSet::new(),
            deltas: HashMap::new(),
            entries: BTreeMap::new(),
            transfers: BTreeMap::new(),
            wait_limit: None,
        }
    }

    /// Wait for the row lock on `id` unless this transaction already holds it.
    ///
    /// An account this transaction cannot see is `NotFound` without a lock
    /// being created for it.
    async fn lock_row(&mut self, op: StoreOp, id: AccountId) -> Result<()> {
        if self.locks.contains_key(&id) {
            return Ok(());
        }
        {
            let tables = self.db.tables.lock();
            self.require_account(&tables, id)?;
        }

        let lock = self.db.row_locks.entry(id).or_default().clone();
        let guard = match self.wait_limit {
            Some(limit) => tokio::time::timeout(limit, lock.lock_owned())
                .await
                .map_err(|_| LedgerError::DeadlineExceeded {
                    operation: op.to_string(),
                })?,
            None => lock.lock_owned().await,
        };
        trace!(account_id = %id, "Row lock acquired");
        self.locks.insert(id, guard);
        Ok(())
    }

    /// The account as this transaction sees it.
    fn visible_account(&self, tables: &Tables, id: AccountId) -> Option<Account> {
        if self.deleted_accounts.contains(&id) {
            return None;
        }
        let mut account = self
            .created_accounts
            .get(&id)
            .or_else(|| tables.accounts.get(&id))
            .cloned()?;
        account.balance += self.deltas.get(&id).copied().unwrap_or(0);
        Some(account)
    }

    fn require_account(&self, tables: &Tables, id: AccountId) -> Result<Account> {
        self.visible_account(tables, id)
            .ok_or_else(|| LedgerError::not_found(Entity::Account, id))
    }

    fn visible_accounts(&self, tables: &Tables) -> Vec<Account> {
        let ids: BTreeSet<AccountId> = tables
            .accounts
            .keys()
            .chain(self.created_accounts.keys())
            .copied()
            .collect();
        ids.into_iter()
            .filter_map(|id| self.visible_account(tables, id))
            .collect()
    }
}

fn paginate<T>(rows: impl Iterator<Item = T>, page: Page) -> Vec<T> {
    rows.skip(page.offset.max(0) as usize)
        .take(page.limit.max(0) as usize)
        .collect()
}

fn constraint_error(op: StoreOp, code: &str, message: impl Into<String>) -> LedgerError {
    LedgerError::Persistence {
        operation: op.to_string(),
        message: message.into(),
        code: Some(code.to_string()),
    }
}

#[async_trait]
impl LedgerStore for MemoryTx {
    async fn create_account(&mut self, params: NewAccount) -> Result<Account> {
        self.db.before(StoreOp::CreateAccount).await?;
        params.validate()?;

        let account = Account {
            id: AccountId::new(Inner::next_id(&self.db.account_seq)),
            owner: params.owner,
            balance: params.balance,
            currency: params.currency,
            created_at: Utc::now(),
        };
        self.created_accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account> {
        self.db.before(StoreOp::GetAccount).await?;
        let tables = self.db.tables.lock();
        self.require_account(&tables, id)
    }

    async fn list_accounts(&mut self, page: Page) -> Result<Vec<Account>> {
        self.db.before(StoreOp::ListAccounts).await?;
        let tables = self.db.tables.lock();
        Ok(paginate(self.visible_accounts(&tables).into_iter(), page))
    }

    async fn delete_account(&mut self, id: AccountId) -> Result<()> {
        self.db.before(StoreOp::DeleteAccount).await?;
        self.lock_row(StoreOp::DeleteAccount, id).await?;

        let tables = self.db.tables.lock();
        self.require_account(&tables, id)?;

        let staged_reference = self.entries.values().any(|e| e.account_id == id)
            || self
                .transfers
                .values()
                .any(|t| t.from_account_id == id || t.to_account_id == id);
        if staged_reference || tables.is_referenced(id) {
            return Err(constraint_error(
                StoreOp::DeleteAccount,
                FOREIGN_KEY_VIOLATION,
                format!("account {id} is still referenced by entries or transfers"),
            ));
        }
        drop(tables);

        if self.created_accounts.remove(&id).is_none() {
            self.deleted_accounts.insert(id);
        }
        self.deltas.remove(&id);
        Ok(())
    }

    async fn create_transfer(
        &mut self,
        from: AccountId,
        to: AccountId,
        amount: i64,
    ) -> Result<Transfer> {
        self.db.before(StoreOp::CreateTransfer).await?;
        if amount <= 0 || from == to {
            return Err(constraint_error(
                StoreOp::CreateTransfer,
                CHECK_VIOLATION,
                "transfer violates check constraint",
            ));
        }
        {
            let tables = self.db.tables.lock();
            self.require_account(&tables, from)?;
            self.require_account(&tables, to)?;
        }

        let transfer = Transfer {
            id: TransferId::new(Inner::next_id(&self.db.transfer_seq)),
            from_account_id: from,
            to_account_id: to,
            amount,
            created_at: Utc::now(),
        };
        self.transfers.insert(transfer.id, transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: TransferId) -> Result<Transfer> {
        self.db.before(StoreOp::GetTransfer).await?;
        if let Some(transfer) = self.transfers.get(&id) {
            return Ok(transfer.clone());
        }
        self.db
            .tables
            .lock()
            .transfers
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found(Entity::Transfer, id))
    }

    async fn list_transfers(&mut self, account: AccountId, page: Page) -> Result<Vec<Transfer>> {
        self.db.before(StoreOp::ListTransfers).await?;
        let tables = self.db.tables.lock();
        let rows: BTreeMap<TransferId, &Transfer> = tables
            .transfers
            .iter()
            .chain(self.transfers.iter())
            .filter(|(_, t)| t.from_account_id == account || t.to_account_id == account)
            .map(|(id, t)| (*id, t))
            .collect();
        Ok(paginate(rows.into_values().cloned(), page))
    }

    async fn create_entry(&mut self, account: AccountId, amount: i64) -> Result<Entry> {
        self.db.before(StoreOp::CreateEntry).await?;
        {
            let tables = self.db.tables.lock();
            self.require_account(&tables, account)?;
        }

        let entry = Entry {
            id: EntryId::new(Inner::next_id(&self.db.entry_seq)),
            account_id: account,
            amount,
            created_at: Utc::now(),
        };
        self.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn get_entry(&mut self, id: EntryId) -> Result<Entry> {
        self.db.before(StoreOp::GetEntry).await?;
        if let Some(entry) = self.entries.get(&id) {
            return Ok(entry.clone());
        }
        self.db
            .tables
            .lock()
            .entries
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found(Entity::Entry, id))
    }

    async fn list_entries(&mut self, account: AccountId, page: Page) -> Result<Vec<Entry>> {
        self.db.before(StoreOp::ListEntries).await?;
        let tables = self.db.tables.lock();
        let rows: BTreeMap<EntryId, &Entry> = tables
            .entries
            .iter()
            .chain(self.entries.iter())
            .filter(|(_, e)| e.account_id == account)
            .map(|(id, e)| (*id, e))
            .collect();
        Ok(paginate(rows.into_values().cloned(), page))
    }

    async fn add_account_balance(&mut self, id: AccountId, delta: i64) -> Result<Account> {
        self.db.before(StoreOp::AddAccountBalance).await?;
        self.lock_row(StoreOp::AddAccountBalance, id).await?;

        let tables = self.db.tables.lock();
        let mut account = self.require_account(&tables, id)?;
        drop(tables);

        account.balance = account.balance.checked_add(delta).ok_or_else(|| {
            constraint_error(
                StoreOp::AddAccountBalance,
                NUMERIC_OUT_OF_RANGE,
                "bigint out of range",
            )
        })?;
        *self.deltas.entry(id).or_insert(0) += delta;
        Ok(account)
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn commit(self) -> Result<()> {
        if self.db.faults.lock().fail_commit {
            return Err(LedgerError::persistence(
                StoreOp::Commit.as_str(),
                "injected commit failure",
            ));
        }

        let MemoryTx {
            db,
            locks,
            created_accounts,
            deleted_accounts,
            deltas,
            entries,
            transfers,
            wait_limit: _,
        } = self;

        {
            let mut tables = db.tables.lock();

            let exists = |id: &AccountId| {
                !deleted_accounts.contains(id)
                    && (created_accounts.contains_key(id) || tables.accounts.contains_key(id))
            };
            let dangling = entries.values().any(|e| !exists(&e.account_id))
                || transfers
                    .values()
                    .any(|t| !exists(&t.from_account_id) || !exists(&t.to_account_id));
            if dangling {
                return Err(constraint_error(
                    StoreOp::Commit,
                    FOREIGN_KEY_VIOLATION,
                    "referenced account no longer exists",
                ));
            }

            tables.accounts.extend(created_accounts);
            for (id, delta) in deltas {
                if let Some(account) = tables.accounts.get_mut(&id) {
                    account.balance += delta;
                }
            }
            for id in &deleted_accounts {
                tables.accounts.remove(id);
            }
            tables.entries.extend(entries);
            tables.transfers.extend(transfers);
        }

        // Row locks are released only after the writes are visible.
        drop(locks);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        let fail = self.db.faults.lock().fail_rollback;
        drop(self);
        if fail {
            return Err(LedgerError::persistence(
                StoreOp::Rollback.as_str(),
                "injected rollback failure",
            ));
        }
        Ok(())
    }

    async fn limit_waits(&mut self, remaining: Duration) -> Result<()> {
        self.wait_limit = Some(remaining);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simplebank_common::{Currency, ErrorKind};

    async fn open(db: &mut MemoryDatabase, owner: &str, balance: i64) -> Account {
        db.create_account(NewAccount::new(owner, balance, Currency::Usd))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_account_crud() {
        let mut db = MemoryDatabase::new();
        let alice = open(&mut db, "alice", 100).await;
        let bob = open(&mut db, "bob", 50).await;

        assert_eq!(db.get_account(alice.id).await.unwrap(), alice);
        let page = db.list_accounts(Page::new(1, 5).unwrap()).await.unwrap();
        assert_eq!(page, vec![alice.clone(), bob.clone()]);

        db.delete_account(bob.id).await.unwrap();
        let err = db.get_account(bob.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_private() {
        let mut db = MemoryDatabase::new();
        let alice = open(&mut db, "alice", 100).await;

        let mut tx = db.begin().await.unwrap();
        let entry = tx.create_entry(alice.id, -10).await.unwrap();
        let updated = tx.add_account_balance(alice.id, -10).await.unwrap();
        assert_eq!(updated.balance, 90);
        assert_eq!(tx.get_account(alice.id).await.unwrap().balance, 90);

        assert_eq!(db.get_account(alice.id).await.unwrap().balance, 100);
        assert_eq!(
            db.get_entry(entry.id).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );

        tx.commit().await.unwrap();
        assert_eq!(db.get_account(alice.id).await.unwrap().balance, 90);
        assert_eq!(db.get_entry(entry.id).await.unwrap(), entry);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes_but_not_sequences() {
        let mut db = MemoryDatabase::new();
        let alice = open(&mut db, "alice", 100).await;

        let mut tx = db.begin().await.unwrap();
        let discarded = tx.create_entry(alice.id, 5).await.unwrap();
        tx.add_account_balance(alice.id, 5).await.unwrap();
        tx.rollback().await.unwrap();

        let kept = db.create_entry(alice.id, 7).await.unwrap();
        assert!(kept.id > discarded.id);
        assert_eq!(db.get_account(alice.id).await.unwrap().balance, 100);
        assert_eq!(db.row_counts(), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_row_lock_blocks_until_commit() {
        let mut db = MemoryDatabase::new();
        let alice = open(&mut db, "alice", 100).await;

        let mut first = db.begin().await.unwrap();
        first.add_account_balance(alice.id, -10).await.unwrap();

        let contender = {
            let db = db.clone();
            tokio::spawn(async move {
                let mut second = db.begin().await.unwrap();
                let account = second.add_account_balance(alice.id, -10).await.unwrap();
                second.commit().await.unwrap();
                account
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        first.commit().await.unwrap();
        let account = contender.await.unwrap();
        assert_eq!(account.balance, 80);
        assert_eq!(db.get_account(alice.id).await.unwrap().balance, 80);
    }

    #[tokio::test]
    async fn test_unknown_account_is_not_found() {
        let mut db = MemoryDatabase::new();
        let alice = open(&mut db, "alice", 100).await;
        let ghost = AccountId::new(404);

        let err = db.create_transfer(alice.id, ghost, 10).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::NotFound {
                entity: Entity::Account,
                id: 404
            }
        ));
        assert_eq!(
            db.create_entry(ghost, 10).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            db.add_account_balance(ghost, 10).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_unknown_account_takes_no_row_lock() {
        let mut db = MemoryDatabase::new();
        open(&mut db, "alice", 100).await;

        let mut tx = db.begin().await.unwrap();
        for id in [404, 405, 406] {
            let err = tx.add_account_balance(AccountId::new(id), 1).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound);
        }
        let err = tx.delete_account(AccountId::new(407)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        tx.rollback().await.unwrap();

        assert!(db.inner.row_locks.is_empty());
    }

    #[tokio::test]
    async fn test_wait_limit_bounds_row_lock_wait() {
        let mut db = MemoryDatabase::new();
        let alice = open(&mut db, "alice", 100).await;

        let mut holder = db.begin().await.unwrap();
        holder.add_account_balance(alice.id, -10).await.unwrap();

        let mut waiter = db.begin().await.unwrap();
        waiter.limit_waits(Duration::from_millis(30)).await.unwrap();
        let err = waiter.add_account_balance(alice.id, 5).await.unwrap_err();
        assert!(matches!(
            &err,
            LedgerError::DeadlineExceeded { operation } if operation == "add_account_balance"
        ));
        waiter.rollback().await.unwrap();

        holder.commit().await.unwrap();
        assert_eq!(db.get_account(alice.id).await.unwrap().balance, 90);
    }

    #[tokio::test]
    async fn test_check_constraints() {
        let mut db = MemoryDatabase::new();
        let alice = open(&mut db, "alice", 100).await;
        let bob = open(&mut db, "bob", 100).await;

        let err = db.create_transfer(alice.id, alice.id, 10).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
        let err = db.create_transfer(alice.id, bob.id, 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
    }

    #[tokio::test]
    async fn test_delete_referenced_account_fails() {
        let mut db = MemoryDatabase::new();
        let alice = open(&mut db, "alice", 100).await;
        db.create_entry(alice.id, 10).await.unwrap();

        let err = db.delete_account(alice.id).await.unwrap_err();
        match err {
            LedgerError::Persistence { code, .. } => {
                assert_eq!(code.as_deref(), Some(FOREIGN_KEY_VIOLATION))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_list_transfers_either_side() {
        let mut db = MemoryDatabase::new();
        let a = open(&mut db, "a", 100).await;
        let b = open(&mut db, "b", 100).await;
        let c = open(&mut db, "c", 100).await;

        let t1 = db.create_transfer(a.id, b.id, 10).await.unwrap();
        let t2 = db.create_transfer(c.id, a.id, 20).await.unwrap();
        db.create_transfer(b.id, c.id, 30).await.unwrap();

        let listed = db.list_transfers(a.id, Page::all()).await.unwrap();
        assert_eq!(listed, vec![t1, t2.clone()]);

        let second_page = db.list_transfers(a.id, Page::new(2, 1).unwrap()).await.unwrap();
        assert_eq!(second_page, vec![t2]);
    }

    #[tokio::test]
    async fn test_injected_operation_fault() {
        let mut db = MemoryDatabase::new();
        let alice = open(&mut db, "alice", 100).await;
        db.inject_fault(Fault::FailOn(StoreOp::CreateEntry));

        let err = db.create_entry(alice.id, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);

        db.clear_faults();
        assert!(db.create_entry(alice.id, 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_balance_overflow_is_rejected() {
        let mut db = MemoryDatabase::new();
        let alice = open(&mut db, "alice", i64::MAX - 1).await;

        let err = db.add_account_balance(alice.id, 2).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert_eq!(db.get_account(alice.id).await.unwrap().balance, i64::MAX - 1);
    }
}
