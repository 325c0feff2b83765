//! Simulated account holders.

use anyhow::{anyhow, Context};
use tracing::info;

use simplebank_common::{AccountId, Currency};
use simplebank_ledger::{Account, LedgerStore, NewAccount};

/// Spreadsheet-style label for the `index`-th account: A..Z, AA, AB, ...
pub fn label(index: usize) -> String {
    let mut n = index + 1;
    let mut chars = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        chars.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    chars.iter().rev().collect()
}

/// The accounts a simulation runs against, as they were opened.
#[derive(Debug, Clone, Default)]
pub struct AccountBook {
    accounts: Vec<(String, Account)>,
}

impl AccountBook {
    /// Open `count` accounts with the same starting balance.
    pub async fn seed<S: LedgerStore>(
        store: &mut S,
        count: usize,
        initial_balance: i64,
        currency: Currency,
    ) -> anyhow::Result<Self> {
        let mut accounts = Vec::with_capacity(count);
        for i in 0..count {
            let label = label(i);
            let account = store
                .create_account(NewAccount::new(
                    format!("holder-{label}"),
                    initial_balance,
                    currency,
                ))
                .await
                .with_context(|| format!("failed to open account {label}"))?;
            info!(label = %label, account_id = %account.id, "Opened account");
            accounts.push((label, account));
        }
        Ok(Self { accounts })
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Resolve a label, or `#<id>` for a raw account id.
    pub fn resolve(&self, reference: &str) -> anyhow::Result<AccountId> {
        if let Some(raw) = reference.strip_prefix('#') {
            let id: i64 = raw
                .parse()
                .with_context(|| format!("invalid account id: {reference}"))?;
            return Ok(AccountId::new(id));
        }
        self.accounts
            .iter()
            .find(|(label, _)| label == reference)
            .map(|(_, account)| account.id)
            .ok_or_else(|| anyhow!("unknown account label: {reference}"))
    }

    /// Id of the `index`-th account.
    pub fn id_at(&self, index: usize) -> AccountId {
        self.accounts[index].1.id
    }

    /// Opening rows, in label order.
    pub fn opened(&self) -> impl Iterator<Item = &(String, Account)> {
        self.accounts.iter()
    }

    /// Sum of opening balances.
    pub fn opening_total(&self) -> i64 {
        self.accounts.iter().map(|(_, a)| a.balance).sum()
    }
}
