//! Transfer records, requests and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use simplebank_common::{AccountId, LedgerError, Result, TransferId};

use crate::account::Account;
use crate::entry::Entry;

/// The intent record linking a debit entry and a credit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Unique transfer ID.
    pub id: TransferId,
    /// Debited account.
    pub from_account_id: AccountId,
    /// Credited account.
    pub to_account_id: AccountId,
    /// Positive amount in minor units.
    pub amount: i64,
    /// When the transfer was created.
    pub created_at: DateTime<Utc>,
}

/// Request to move `amount` from one account to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
}

impl TransferRequest {
    /// Create a transfer request.
    pub fn new(from: impl Into<AccountId>, to: impl Into<AccountId>, amount: i64) -> Self {
        Self {
            from_account_id: from.into(),
            to_account_id: to.into(),
            amount,
        }
    }

    /// Reject requests that must never reach the datastore.
    ///
    /// Ids of zero or below can never name a row, so they are
    /// `InvalidArgument` here. A positive id with no account behind it passes
    /// and becomes `NotFound` once the datastore is asked for it. A
    /// self-transfer would apply both deltas to one row.
    pub fn validate(&self) -> Result<()> {
        if !self.from_account_id.is_valid() {
            return Err(LedgerError::invalid(
                "from_account_id",
                format!("account id must be positive, got {}", self.from_account_id),
            ));
        }
        if !self.to_account_id.is_valid() {
            return Err(LedgerError::invalid(
                "to_account_id",
                format!("account id must be positive, got {}", self.to_account_id),
            ));
        }
        if self.from_account_id == self.to_account_id {
            return Err(LedgerError::invalid(
                "to_account_id",
                "cannot transfer to the same account",
            ));
        }
        if self.amount <= 0 {
            return Err(LedgerError::invalid(
                "amount",
                format!("amount must be positive, got {}", self.amount),
            ));
        }
        Ok(())
    }
}

/// Everything a successful transfer created or changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    pub from_account: Account,
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry,
}
