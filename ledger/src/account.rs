//! Account definitions for the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use simplebank_common::{AccountId, Currency, LedgerError, Result};

/// A ledger account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier.
    pub id: AccountId,
    /// Account holder.
    pub owner: String,
    /// Current balance in minor units.
    pub balance: i64,
    /// Account currency.
    pub currency: Currency,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Render the balance with its currency, e.g. `70.00 USD`.
    pub fn display_balance(&self) -> String {
        self.currency.format(self.balance)
    }
}

/// Parameters for opening an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    /// Account holder.
    pub owner: String,
    /// Opening balance in minor units.
    pub balance: i64,
    /// Account currency.
    pub currency: Currency,
}

impl NewAccount {
    /// Create account parameters.
    pub fn new(owner: impl Into<String>, balance: i64, currency: Currency) -> Self {
        Self {
            owner: owner.into(),
            balance,
            currency,
        }
    }

    /// Validate the parameters.
    pub fn validate(&self) -> Result<()> {
        if self.owner.trim().is_empty() {
            return Err(LedgerError::invalid("owner", "owner must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_account_validation() {
        assert!(NewAccount::new("alice", 100, Currency::Usd).validate().is_ok());
        assert!(NewAccount::new("  ", 100, Currency::Usd).validate().is_err());
    }

    #[test]
    fn test_display_balance() {
        let account = Account {
            id: AccountId::new(1),
            owner: "alice".to_string(),
            balance: 7000,
            currency: Currency::Usd,
            created_at: Utc::now(),
        };
        assert_eq!(account.display_balance(), "70.00 USD");
    }
}
