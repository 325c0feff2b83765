//! Simulation controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, ensure};
use futures::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use simplebank_common::{AccountId, Currency};
use simplebank_ledger::entry::net_amount;
use simplebank_ledger::{Page, TransferConfig, TransferEngine, TransferRequest, TxContext};

use crate::accounts::AccountBook;
use crate::backend::Backend;
use crate::metrics::{SimulationMetrics, SimulationReport};
use crate::scenario::{AssertCondition, Outcome, Scenario, ScenarioStep};

/// Drives scenarios against one backend.
pub struct SimulationController<B: Backend> {
    db: B,
    engine: Arc<TransferEngine<B>>,
    book: AccountBook,
    rng: StdRng,
    /// Upper bound on in-flight transfers for random load.
    concurrency: usize,
    metrics: SimulationMetrics,
}

impl<B: Backend> SimulationController<B> {
    /// Create a new simulation controller.
    pub fn new(db: B, config: TransferConfig, seed: Option<u64>, concurrency: usize) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Self {
            engine: Arc::new(TransferEngine::new(db.clone(), config)),
            db,
            book: AccountBook::default(),
            rng,
            concurrency: concurrency.max(1),
            metrics: SimulationMetrics::new(),
        }
    }

    /// Open the simulated accounts.
    pub async fn initialize(&mut self, accounts: usize, initial_balance: i64) -> anyhow::Result<()> {
        info!(
            backend = self.db.name(),
            accounts,
            initial_balance,
            "Initializing simulation"
        );
        let mut store = self.db.clone();
        self.book = AccountBook::seed(&mut store, accounts, initial_balance, Currency::Usd).await?;
        Ok(())
    }

    /// Run a scenario to completion, stopping at the first failed expectation.
    pub async fn run_scenario(&mut self, scenario: &Scenario) -> anyhow::Result<SimulationReport> {
        info!(scenario = %scenario.name, description = %scenario.description, "Running scenario");
        let needed = scenario.accounts_needed()?;
        ensure!(
            self.book.len() >= needed,
            "scenario {} needs {needed} accounts, only {} opened",
            scenario.name,
            self.book.len()
        );

        let started = Instant::now();
        for (index, step) in scenario.steps.iter().enumerate() {
            debug!(step = index, ?step, "Executing step");
            self.execute_step(step)
                .await
                .map_err(|e| e.context(format!("step {index} of {}", scenario.name)))?;
        }

        let report = self.metrics.report(&scenario.name, started.elapsed());
        info!(
            total = report.total,
            succeeded = report.succeeded,
            rejected = report.rejected,
            failed = report.failed,
            "Scenario complete"
        );
        debug!("{}", self.engine.metrics().to_prometheus());
        Ok(report)
    }

    async fn execute_step(&mut self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Transfer {
                from,
                to,
                amount,
                expect,
                timeout_millis,
            } => {
                let request =
                    TransferRequest::new(self.book.resolve(from)?, self.book.resolve(to)?, *amount);
                let mut ctx = TxContext::default();
                if let Some(ms) = timeout_millis {
                    ctx = ctx.with_timeout(Duration::from_millis(*ms));
                }

                let started = Instant::now();
                let result = self.engine.execute(ctx, request).await;
                let outcome = Outcome::of(&result);
                self.metrics.record(outcome, started.elapsed());

                match (&result, expect) {
                    (_, Some(expected)) if *expected != outcome => {
                        let detail = match &result {
                            Ok(r) => format!("transfer {}", r.transfer.id),
                            Err(e) => e.to_string(),
                        };
                        bail!("{from} -> {to}: expected {expected:?}, got {outcome:?} ({detail})");
                    }
                    (Ok(r), _) => info!(
                        transfer_id = %r.transfer.id,
                        from_balance = r.from_account.balance,
                        to_balance = r.to_account.balance,
                        "Transfer {from} -> {to} committed"
                    ),
                    (Err(e), _) => info!(error = %e, "Transfer {from} -> {to} ended with {outcome:?}"),
                }
            }
            ScenarioStep::Burst {
                from,
                to,
                amount,
                count,
            } => {
                let (from, to) = (self.book.resolve(from)?, self.book.resolve(to)?);
                let batch = vec![(from, to, *amount); *count];
                self.run_batch(batch, *count).await?;
            }
            ScenarioStep::Crossfire { a, b, amount, count } => {
                let (a, b) = (self.book.resolve(a)?, self.book.resolve(b)?);
                let batch = (0..*count)
                    .map(|i| if i % 2 == 0 { (a, b, *amount) } else { (b, a, *amount) })
                    .collect();
                self.run_batch(batch, *count).await?;
            }
            ScenarioStep::Random { count, max_amount } => {
                ensure!(self.book.len() >= 2, "random transfers need at least two accounts");
                ensure!(*max_amount >= 1, "max_amount must be positive");
                let batch = (0..*count).map(|_| self.random_transfer(*max_amount)).collect();
                self.run_batch(batch, self.concurrency).await?;
            }
            ScenarioStep::Wait { millis } => {
                tokio::time::sleep(Duration::from_millis(*millis)).await;
            }
            ScenarioStep::InjectFault { fault } => {
                let fault = fault.to_fault()?;
                info!(?fault, "Injecting fault");
                self.db.inject_fault(fault)?;
            }
            ScenarioStep::ClearFaults => {
                info!("Clearing faults");
                self.db.clear_faults()?;
            }
            ScenarioStep::Assert { condition } => {
                self.check(condition).await?;
                info!(?condition, "Assertion held");
            }
        }

        Ok(())
    }

    fn random_transfer(&mut self, max_amount: i64) -> (AccountId, AccountId, i64) {
        let len = self.book.len();
        let from = self.rng.gen_range(0..len);
        let mut to = self.rng.gen_range(0..len);
        while to == from {
            to = self.rng.gen_range(0..len);
        }
        let amount = self.rng.gen_range(1..=max_amount);
        (self.book.id_at(from), self.book.id_at(to), amount)
    }

    /// Run transfers concurrently, at most `limit` in flight.
    async fn run_batch(
        &mut self,
        batch: Vec<(AccountId, AccountId, i64)>,
        limit: usize,
    ) -> anyhow::Result<()> {
        let engine = self.engine.clone();
        let mut results = futures::stream::iter(batch.into_iter().map(|(from, to, amount)| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                let result = engine.transfer(from, to, amount).await;
                if let Err(err) = &result {
                    warn!(%from, %to, amount, error = %err, "Transfer did not commit");
                }
                (Outcome::of(&result), started.elapsed())
            })
        }))
        .buffer_unordered(limit.max(1));

        while let Some(joined) = results.next().await {
            let (outcome, latency) = joined?;
            self.metrics.record(outcome, latency);
        }
        Ok(())
    }

    async fn check(&self, condition: &AssertCondition) -> anyhow::Result<()> {
        let mut store = self.db.clone();
        match condition {
            AssertCondition::BalanceEquals { account, amount } => {
                let id = self.book.resolve(account)?;
                let balance = store.get_account(id).await?.balance;
                ensure!(
                    balance == *amount,
                    "balance of {account} is {balance}, expected {amount}"
                );
            }
            AssertCondition::TotalConserved => {
                let mut total = 0;
                for (_, opened) in self.book.opened() {
                    total += store.get_account(opened.id).await?.balance;
                }
                let expected = self.book.opening_total();
                ensure!(total == expected, "total is {total}, expected {expected}");
            }
            AssertCondition::EntriesMatchBalances => {
                for (label, opened) in self.book.opened() {
                    let current = store.get_account(opened.id).await?;
                    let entries = store.list_entries(opened.id, Page::all()).await?;
                    let expected = opened.balance + net_amount(&entries);
                    if current.balance != expected {
                        return Err(anyhow!(
                            "{label}: balance {} does not match opening {} plus {} entries ({expected})",
                            current.balance,
                            opened.balance,
                            entries.len()
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::ScenarioParams;
    use simplebank_ledger::{MemoryDatabase, OverdraftPolicy};

    fn params() -> ScenarioParams {
        ScenarioParams {
            initial_balance: 1_000,
            transfers: 20,
            max_amount: 50,
        }
    }

    async fn controller(accounts: usize) -> SimulationController<MemoryDatabase> {
        let config = TransferConfig {
            overdraft: OverdraftPolicy::Allow,
            timeout: None,
        };
        let mut controller = SimulationController::new(MemoryDatabase::new(), config, Some(7), 4);
        controller.initialize(accounts, 1_000).await.unwrap();
        controller
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_builtin_scenarios_pass() {
        for name in Scenario::BUILTIN {
            let mut controller = controller(4).await;
            let scenario = Scenario::builtin(name, params()).unwrap();
            let report = controller
                .run_scenario(&scenario)
                .await
                .unwrap_or_else(|e| panic!("{name}: {e:#}"));
            assert!(report.total > 0, "{name} ran no transfers");
        }
    }

    #[tokio::test]
    async fn test_failed_expectation_stops_scenario() {
        let mut controller = controller(2).await;
        let scenario = Scenario::from_json(
            r#"{"name": "wrong", "steps": [
                {"transfer": {"from": "A", "to": "B", "amount": 10, "expect": "not_found"}}
            ]}"#,
        )
        .unwrap();

        let err = controller.run_scenario(&scenario).await.unwrap_err();
        assert!(format!("{err:#}").contains("expected NotFound"));
    }

    #[tokio::test]
    async fn test_balance_assertion_fails_on_mismatch() {
        let mut controller = controller(2).await;
        let scenario = Scenario::from_json(
            r#"{"name": "mismatch", "steps": [
                {"assert": {"condition": {"balance_equals": {"account": "A", "amount": 5}}}}
            ]}"#,
        )
        .unwrap();

        assert!(controller.run_scenario(&scenario).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_label_fails_before_running() {
        let mut controller = controller(2).await;
        let scenario = Scenario::from_json(
            r#"{"name": "named", "steps": [
                {"transfer": {"from": "alice", "to": "bob", "amount": 10}}
            ]}"#,
        )
        .unwrap();

        let err = controller.run_scenario(&scenario).await.unwrap_err();
        assert!(err.to_string().contains("unknown account label"));
        assert_eq!(controller.metrics.total_transfers, 0);
    }

    #[tokio::test]
    async fn test_too_few_accounts() {
        let mut controller = controller(2).await;
        let scenario = Scenario::from_json(
            r#"{"name": "wide", "steps": [
                {"transfer": {"from": "A", "to": "D", "amount": 10}}
            ]}"#,
        )
        .unwrap();

        let err = controller.run_scenario(&scenario).await.unwrap_err();
        assert!(err.to_string().contains("needs 4 accounts"));
    }
}
