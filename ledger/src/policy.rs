//! Overdraft policy applied to the debited account after a transfer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use simplebank_common::LedgerError;

/// How far below zero a debited balance may go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverdraftPolicy {
    /// No check; balances may go arbitrarily negative.
    #[default]
    Allow,
    /// The balance must stay at or above zero.
    Deny,
    /// The balance may go down to `-limit`.
    Limit(i64),
}

impl OverdraftPolicy {
    /// Whether `balance` is acceptable after a debit.
    pub fn permits(&self, balance: i64) -> bool {
        match self {
            OverdraftPolicy::Allow => true,
            OverdraftPolicy::Deny => balance >= 0,
            OverdraftPolicy::Limit(limit) => balance >= limit.saturating_neg(),
        }
    }
}

impl fmt::Display for OverdraftPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverdraftPolicy::Allow => f.write_str("allow"),
            OverdraftPolicy::Deny => f.write_str("deny"),
            OverdraftPolicy::Limit(limit) => write!(f, "limit:{limit}"),
        }
    }
}

impl FromStr for OverdraftPolicy {
    type Err = LedgerError;

    /// Parses `allow`, `deny` or `limit:<minor units>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().to_ascii_lowercase();
        match value.as_str() {
            "allow" => Ok(OverdraftPolicy::Allow),
            "deny" => Ok(OverdraftPolicy::Deny),
            _ => {
                let limit = value
                    .strip_prefix("limit:")
                    .and_then(|n| n.trim().parse::<i64>().ok())
                    .ok_or_else(|| {
                        LedgerError::Configuration(format!("unknown overdraft policy: {s}"))
                    })?;
                Ok(OverdraftPolicy::Limit(limit))
            }
        }
    }
}
