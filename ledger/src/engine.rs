//! Transfer engine: moves funds between two accounts in one transaction.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use simplebank_common::{AccountId, ErrorKind, LedgerError, Result};

use crate::config::TransferConfig;
use crate::context::TxContext;
use crate::metrics::{EngineMetrics, SharedMetrics};
use crate::policy::OverdraftPolicy;
use crate::store::{Database, LedgerStore};
use crate::transfer::{TransferRequest, TransferResult};
use crate::tx::TransactionRunner;

/// Balance adjustments for `request`, in the order they must be applied.
///
/// Rows are always locked in ascending account id order, whichever side is
/// debited, so two transfers over the same pair cannot deadlock.
pub fn adjustment_order(request: &TransferRequest) -> [(AccountId, i64); 2] {
    let debit = (request.from_account_id, -request.amount);
    let credit = (request.to_account_id, request.amount);
    if request.from_account_id < request.to_account_id {
        [debit, credit]
    } else {
        [credit, debit]
    }
}

/// Executes transfers against a [`Database`].
pub struct TransferEngine<D> {
    runner: TransactionRunner<D>,
    config: TransferConfig,
    metrics: SharedMetrics,
}

impl<D: Database> TransferEngine<D> {
    /// Create an engine over `db`.
    pub fn new(db: D, config: TransferConfig) -> Self {
        Self {
            runner: TransactionRunner::new(db),
            config,
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    /// Report into an existing metrics instance.
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    pub fn runner(&self) -> &TransactionRunner<D> {
        &self.runner
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Move `amount` from one account to another with a fresh context.
    pub async fn transfer(
        &self,
        from: impl Into<AccountId>,
        to: impl Into<AccountId>,
        amount: i64,
    ) -> Result<TransferResult> {
        self.execute(TxContext::default(), TransferRequest::new(from, to, amount))
            .await
    }

    /// Execute one transfer.
    ///
    /// Writes the transfer, a debit entry and a credit entry, then adjusts
    /// both balances. Either everything commits or nothing does. The
    /// configured timeout applies when `ctx` carries no deadline.
    #[instrument(
        skip_all,
        fields(
            correlation_id = %ctx.correlation_id(),
            from_account_id = %request.from_account_id,
            to_account_id = %request.to_account_id,
            amount = request.amount
        )
    )]
    pub async fn execute(&self, ctx: TxContext, request: TransferRequest) -> Result<TransferResult> {
        let _active = self.metrics.transfer_started();

        let result = self.run(ctx, request).await;
        match &result {
            Ok(result) => {
                self.metrics.transfer_succeeded(request.amount);
                info!(
                    transfer_id = %result.transfer.id,
                    from_balance = result.from_account.balance,
                    to_balance = result.to_account.balance,
                    "Transfer committed"
                );
            }
            Err(err) => {
                if matches!(err, LedgerError::RollbackFailed { .. }) {
                    self.metrics.rollback_failed();
                }
                match err.kind() {
                    ErrorKind::InvalidArgument | ErrorKind::NotFound => {
                        self.metrics.transfer_rejected();
                        info!(error = %err, "Transfer rejected");
                    }
                    ErrorKind::Persistence | ErrorKind::Aborted => {
                        self.metrics.transfer_failed();
                        warn!(error = %err, retryable = err.is_retryable(), "Transfer failed");
                    }
                }
            }
        }
        result
    }

    async fn run(&self, ctx: TxContext, request: TransferRequest) -> Result<TransferResult> {
        request.validate()?;

        let ctx = ctx.or_timeout(self.config.timeout);
        let overdraft = self.config.overdraft;
        self.runner
            .run_in_transaction(ctx, move |tx| {
                Box::pin(apply_transfer(tx, request, overdraft))
            })
            .await
    }
}

/// The statements of one transfer, issued through `store`.
async fn apply_transfer<S>(
    store: &mut S,
    request: TransferRequest,
    overdraft: OverdraftPolicy,
) -> Result<TransferResult>
where
    S: LedgerStore + ?Sized,
{
    let TransferRequest {
        from_account_id,
        to_account_id,
        amount,
    } = request;

    let transfer = store
        .create_transfer(from_account_id, to_account_id, amount)
        .await?;
    debug!(transfer_id = %transfer.id, "Transfer row created");

    let from_entry = store.create_entry(from_account_id, -amount).await?;
    let to_entry = store.create_entry(to_account_id, amount).await?;
    debug!(
        from_entry_id = %from_entry.id,
        to_entry_id = %to_entry.id,
        "Entries created"
    );

    let [first, second] = adjustment_order(&request);
    let first_account = store.add_account_balance(first.0, first.1).await?;
    let second_account = store.add_account_balance(second.0, second.1).await?;
    let (from_account, to_account) = if first.0 == from_account_id {
        (first_account, second_account)
    } else {
        (second_account, first_account)
    };
    debug!(
        from_balance = from_account.balance,
        to_balance = to_account.balance,
        "Balances adjusted"
    );

    if !overdraft.permits(from_account.balance) {
        warn!(
            account_id = %from_account_id,
            balance = from_account.balance,
            policy = %overdraft,
            "Overdraft refused"
        );
        return Err(LedgerError::InsufficientFunds {
            account_id: from_account_id,
            balance: from_account.balance + amount,
            amount,
        });
    }

    Ok(TransferResult {
        transfer,
        from_account,
        to_account,
        from_entry,
        to_entry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use proptest::prelude::*;
    use simplebank_common::{Currency, Entity};

    use crate::account::{Account, NewAccount};
    use crate::entry::net_amount;
    use crate::memory::{Fault, MemoryDatabase};
    use crate::store::{LedgerTx, Page, StoreOp};

    fn no_timeout() -> TransferConfig {
        TransferConfig {
            overdraft: OverdraftPolicy::Allow,
            timeout: None,
        }
    }

    async fn open_accounts(db: &MemoryDatabase, balances: &[i64]) -> Vec<Account> {
        let mut db = db.clone();
        let mut accounts = Vec::new();
        for (i, balance) in balances.iter().enumerate() {
            let owner = format!("owner-{i}");
            accounts.push(
                db.create_account(NewAccount::new(owner, *balance, Currency::Usd))
                    .await
                    .unwrap(),
            );
        }
        accounts
    }

    async fn balance(db: &MemoryDatabase, id: AccountId) -> i64 {
        db.clone().get_account(id).await.unwrap().balance
    }

    #[test]
    fn test_adjustment_order_is_ascending() {
        let forward = TransferRequest::new(1, 2, 10);
        assert_eq!(
            adjustment_order(&forward),
            [(AccountId::new(1), -10), (AccountId::new(2), 10)]
        );

        let backward = TransferRequest::new(9, 3, 10);
        assert_eq!(
            adjustment_order(&backward),
            [(AccountId::new(3), 10), (AccountId::new(9), -10)]
        );
    }

    #[tokio::test]
    async fn test_transfer_moves_funds() {
        let db = MemoryDatabase::new();
        let accounts = open_accounts(&db, &[100, 50]).await;
        let (a, b) = (accounts[0].id, accounts[1].id);
        let engine = TransferEngine::new(db.clone(), TransferConfig::default());

        let result = engine.transfer(a, b, 30).await.unwrap();

        assert_eq!(result.transfer.amount, 30);
        assert_eq!(result.transfer.from_account_id, a);
        assert_eq!(result.transfer.to_account_id, b);
        assert_eq!(result.from_entry.account_id, a);
        assert_eq!(result.from_entry.amount, -30);
        assert_eq!(result.to_entry.account_id, b);
        assert_eq!(result.to_entry.amount, 30);
        assert_eq!(result.from_account.balance, 70);
        assert_eq!(result.to_account.balance, 80);

        assert_eq!(balance(&db, a).await, 70);
        assert_eq!(balance(&db, b).await, 80);
        let mut store = db.clone();
        assert_eq!(store.get_transfer(result.transfer.id).await.unwrap(), result.transfer);
    }

    #[tokio::test]
    async fn test_reverse_direction_returns_accounts_by_role() {
        let db = MemoryDatabase::new();
        let accounts = open_accounts(&db, &[100, 50]).await;
        let (a, b) = (accounts[0].id, accounts[1].id);
        let engine = TransferEngine::new(db.clone(), TransferConfig::default());

        let result = engine.transfer(b, a, 20).await.unwrap();
        assert_eq!(result.from_account.id, b);
        assert_eq!(result.from_account.balance, 30);
        assert_eq!(result.to_account.id, a);
        assert_eq!(result.to_account.balance, 120);
    }

    #[tokio::test]
    async fn test_self_transfer_rejected_without_writes() {
        let db = MemoryDatabase::new();
        let accounts = open_accounts(&db, &[100]).await;
        let engine = TransferEngine::new(db.clone(), TransferConfig::default());

        let err = engine
            .transfer(accounts[0].id, accounts[0].id, 10)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(db.row_counts(), (1, 0, 0));
        assert_eq!(balance(&db, accounts[0].id).await, 100);
    }

    #[tokio::test]
    async fn test_invalid_amount_rejected() {
        let db = MemoryDatabase::new();
        let accounts = open_accounts(&db, &[100, 50]).await;
        let engine = TransferEngine::new(db.clone(), TransferConfig::default());

        for amount in [0, -5] {
            let err = engine
                .transfer(accounts[0].id, accounts[1].id, amount)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
        assert_eq!(db.row_counts(), (2, 0, 0));
        assert_eq!(engine.metrics().snapshot().transfers_rejected, 2);
    }

    #[tokio::test]
    async fn test_unknown_account_leaves_counterpart_unchanged() {
        let db = MemoryDatabase::new();
        let accounts = open_accounts(&db, &[100]).await;
        let b = accounts[0].id;
        let missing = AccountId::new(b.as_i64() + 100);
        let engine = TransferEngine::new(db.clone(), TransferConfig::default());

        let err = engine.transfer(missing, b, 10).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::NotFound {
                entity: Entity::Account,
                ..
            }
        ));

        let err = engine.transfer(b, missing, 10).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        assert_eq!(balance(&db, b).await, 100);
        assert_eq!(db.row_counts(), (1, 0, 0));
    }

    #[tokio::test]
    async fn test_overdraft_denied_rolls_back() {
        let db = MemoryDatabase::new();
        let accounts = open_accounts(&db, &[20, 0]).await;
        let (a, b) = (accounts[0].id, accounts[1].id);
        let engine = TransferEngine::new(
            db.clone(),
            TransferConfig {
                overdraft: OverdraftPolicy::Deny,
                timeout: None,
            },
        );

        let err = engine.transfer(a, b, 30).await.unwrap_err();
        match err {
            LedgerError::InsufficientFunds {
                account_id,
                balance: before,
                amount,
            } => {
                assert_eq!(account_id, a);
                assert_eq!(before, 20);
                assert_eq!(amount, 30);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(balance(&db, a).await, 20);
        assert_eq!(balance(&db, b).await, 0);
        assert_eq!(db.row_counts(), (2, 0, 0));

        assert!(engine.transfer(a, b, 20).await.is_ok());
    }

    #[tokio::test]
    async fn test_overdraft_allowed_by_default() {
        let db = MemoryDatabase::new();
        let accounts = open_accounts(&db, &[10, 0]).await;
        let engine = TransferEngine::new(db.clone(), TransferConfig::default());

        let result = engine
            .transfer(accounts[0].id, accounts[1].id, 25)
            .await
            .unwrap();
        assert_eq!(result.from_account.balance, -15);
    }

    #[tokio::test]
    async fn test_failure_mid_transfer_leaves_nothing() {
        let db = MemoryDatabase::new();
        let accounts = open_accounts(&db, &[100, 50]).await;
        let (a, b) = (accounts[0].id, accounts[1].id);
        let engine = TransferEngine::new(db.clone(), no_timeout());

        db.inject_fault(Fault::FailOn(StoreOp::AddAccountBalance));
        let err = engine.transfer(a, b, 30).await.unwrap_err();
        db.clear_faults();

        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert_eq!(balance(&db, a).await, 100);
        assert_eq!(balance(&db, b).await, 50);
        assert_eq!(db.row_counts(), (2, 0, 0));
        assert_eq!(engine.metrics().snapshot().transfers_failed, 1);
    }

    #[tokio::test]
    async fn test_deadline_aborts_and_rolls_back() {
        let db = MemoryDatabase::new();
        let accounts = open_accounts(&db, &[100, 50]).await;
        let (a, b) = (accounts[0].id, accounts[1].id);
        let engine = TransferEngine::new(db.clone(), no_timeout());

        db.inject_fault(Fault::DelayOn(
            StoreOp::AddAccountBalance,
            Duration::from_millis(500),
        ));
        let ctx = TxContext::new("slow transfer").with_timeout(Duration::from_millis(20));
        let err = engine
            .execute(ctx, TransferRequest::new(a, b, 30))
            .await
            .unwrap_err();
        db.clear_faults();

        assert!(matches!(err, LedgerError::DeadlineExceeded { .. }));
        assert_eq!(balance(&db, a).await, 100);
        assert_eq!(db.row_counts(), (2, 0, 0));
    }

    #[tokio::test]
    async fn test_deadline_while_waiting_on_row_lock() {
        let db = MemoryDatabase::new();
        let accounts = open_accounts(&db, &[100, 50]).await;
        let (a, b) = (accounts[0].id, accounts[1].id);
        let engine = TransferEngine::new(db.clone(), no_timeout());

        let mut holder = db.begin().await.unwrap();
        holder.add_account_balance(a, 1).await.unwrap();

        let ctx = TxContext::new("blocked transfer").with_timeout(Duration::from_millis(50));
        let err = engine
            .execute(ctx, TransferRequest::new(a, b, 30))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DeadlineExceeded { .. }));

        holder.rollback().await.unwrap();
        assert_eq!(balance(&db, a).await, 100);
        assert_eq!(balance(&db, b).await, 50);
        assert_eq!(db.row_counts(), (2, 0, 0));
    }

    #[tokio::test]
    async fn test_abandoned_transfer_is_no_longer_active() {
        let db = MemoryDatabase::new();
        let accounts = open_accounts(&db, &[100, 50]).await;
        let (a, b) = (accounts[0].id, accounts[1].id);
        let engine = TransferEngine::new(db.clone(), no_timeout());

        db.inject_fault(Fault::DelayOn(
            StoreOp::CreateTransfer,
            Duration::from_millis(500),
        ));
        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), engine.transfer(a, b, 30)).await;
        db.clear_faults();

        assert!(abandoned.is_err());
        let snapshot = engine.metrics().snapshot();
        assert_eq!(snapshot.transfers_total, 1);
        assert_eq!(snapshot.transfers_active, 0);
        assert_eq!(db.row_counts(), (2, 0, 0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transfers_serialize() {
        const N: i64 = 5;
        const AMOUNT: i64 = 10;

        let db = MemoryDatabase::new();
        let accounts = open_accounts(&db, &[100, 100]).await;
        let (a, b) = (accounts[0].id, accounts[1].id);
        let engine = Arc::new(TransferEngine::new(db.clone(), TransferConfig::default()));

        let handles: Vec<_> = (0..N)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.transfer(a, b, AMOUNT).await })
            })
            .collect();

        let mut steps = Vec::new();
        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result.from_entry.amount, -AMOUNT);
            assert_eq!(result.to_entry.amount, AMOUNT);

            let debited = 100 - result.from_account.balance;
            let credited = result.to_account.balance - 100;
            assert_eq!(debited % AMOUNT, 0);
            steps.push((debited / AMOUNT, credited / AMOUNT));
        }

        let mut debit_steps: Vec<i64> = steps.iter().map(|s| s.0).collect();
        let mut credit_steps: Vec<i64> = steps.iter().map(|s| s.1).collect();
        debit_steps.sort_unstable();
        credit_steps.sort_unstable();
        assert_eq!(debit_steps, (1..=N).collect::<Vec<_>>());
        assert_eq!(credit_steps, (1..=N).collect::<Vec<_>>());

        assert_eq!(balance(&db, a).await, 100 - N * AMOUNT);
        assert_eq!(balance(&db, b).await, 100 + N * AMOUNT);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_opposite_directions_do_not_deadlock() {
        let db = MemoryDatabase::new();
        let accounts = open_accounts(&db, &[1_000, 1_000]).await;
        let (a, b) = (accounts[0].id, accounts[1].id);
        let engine = Arc::new(TransferEngine::new(db.clone(), no_timeout()));

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let engine = engine.clone();
                let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
                tokio::spawn(async move { engine.transfer(from, to, 10).await })
            })
            .collect();

        let all = futures::future::join_all(handles);
        let results = tokio::time::timeout(Duration::from_secs(5), all)
            .await
            .expect("transfers deadlocked");
        for result in results {
            result.unwrap().unwrap();
        }

        assert_eq!(balance(&db, a).await, 1_000);
        assert_eq!(balance(&db, b).await, 1_000);
        assert_eq!(engine.metrics().snapshot().transfers_succeeded, 10);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_transfers_conserve_total(
            transfers in prop::collection::vec((0usize..3, 0usize..3, 1i64..500), 1..20)
        ) {
            tokio_test::block_on(async {
                let db = MemoryDatabase::new();
                let accounts = open_accounts(&db, &[1_000, 2_000, 3_000]).await;
                let engine = TransferEngine::new(db.clone(), no_timeout());

                for (from, to, amount) in transfers {
                    let result = engine
                        .transfer(accounts[from].id, accounts[to].id, amount)
                        .await;
                    if from == to {
                        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidArgument);
                    } else {
                        let result = result.unwrap();
                        assert_eq!(result.from_entry.amount + result.to_entry.amount, 0);
                    }
                }

                let mut store = db.clone();
                let mut total = 0;
                for account in &accounts {
                    let current = store.get_account(account.id).await.unwrap();
                    let entries = store.list_entries(account.id, Page::all()).await.unwrap();
                    assert_eq!(current.balance, account.balance + net_amount(&entries));
                    total += current.balance;
                }
                assert_eq!(total, 6_000);
            });
        }
    }
}
