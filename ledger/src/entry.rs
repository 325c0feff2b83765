//! Entry types: one signed line item per account per transfer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use simplebank_common::{AccountId, EntryId};

/// Direction of an entry, derived from the sign of its amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    /// Money leaving the account (negative amount).
    Debit,
    /// Money arriving in the account (positive amount).
    Credit,
}

/// A single entry posted against an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Unique entry ID.
    pub id: EntryId,
    /// Account affected.
    pub account_id: AccountId,
    /// Signed amount in minor units.
    pub amount: i64,
    /// When this entry was created.
    pub created_at: DateTime<Utc>,
}

impl Entry {
    /// Get the entry direction.
    pub fn entry_type(&self) -> EntryType {
        if self.amount < 0 {
            EntryType::Debit
        } else {
            EntryType::Credit
        }
    }

    /// Unsigned size of the movement.
    pub fn magnitude(&self) -> i64 {
        self.amount.abs()
    }
}

/// Sum the signed amounts of a set of entries.
pub fn net_amount<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> i64 {
    entries.into_iter().map(|e| e.amount).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(amount: i64) -> Entry {
        Entry {
            id: EntryId::new(1),
            account_id: AccountId::new(1),
            amount,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_entry_type_from_sign() {
        assert_eq!(entry(-30).entry_type(), EntryType::Debit);
        assert_eq!(entry(30).entry_type(), EntryType::Credit);
        assert_eq!(entry(-30).magnitude(), 30);
    }

    #[test]
    fn test_net_amount() {
        let entries = vec![entry(-30), entry(30), entry(-5)];
        assert_eq!(net_amount(&entries), -5);
        assert_eq!(net_amount(&Vec::new()), 0);
    }
}
