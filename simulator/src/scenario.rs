//! Simulation scenarios.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use simplebank_common::ErrorKind;
use simplebank_ledger::memory::Fault;
use simplebank_ledger::StoreOp;

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario. Accounts are referenced by label (`A`, `B`, ...)
/// or by raw id (`#17`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStep {
    /// One transfer, optionally checked against an expected outcome.
    Transfer {
        from: String,
        to: String,
        amount: i64,
        #[serde(default)]
        expect: Option<Outcome>,
        /// Deadline for this transfer only.
        #[serde(default)]
        timeout_millis: Option<u64>,
    },
    /// `count` concurrent transfers in the same direction.
    Burst {
        from: String,
        to: String,
        amount: i64,
        count: usize,
    },
    /// `count` concurrent transfers alternating between both directions.
    Crossfire {
        a: String,
        b: String,
        amount: i64,
        count: usize,
    },
    /// `count` transfers between random distinct accounts.
    Random { count: usize, max_amount: i64 },
    /// Pause.
    Wait { millis: u64 },
    /// Inject a datastore fault.
    InjectFault { fault: InjectedFault },
    /// Clear every injected fault.
    ClearFaults,
    /// Assert a condition.
    Assert { condition: AssertCondition },
}

/// Outcome class a transfer is expected to end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    InvalidArgument,
    NotFound,
    Persistence,
    Aborted,
}

impl Outcome {
    pub fn of<T>(result: &simplebank_common::Result<T>) -> Self {
        match result {
            Ok(_) => Outcome::Success,
            Err(err) => match err.kind() {
                ErrorKind::InvalidArgument => Outcome::InvalidArgument,
                ErrorKind::NotFound => Outcome::NotFound,
                ErrorKind::Persistence => Outcome::Persistence,
                ErrorKind::Aborted => Outcome::Aborted,
            },
        }
    }
}

/// Serializable form of a datastore fault.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectedFault {
    FailCommit,
    FailRollback,
    FailOn { operation: String },
    DelayOn { operation: String, millis: u64 },
}

impl InjectedFault {
    pub fn to_fault(&self) -> anyhow::Result<Fault> {
        let fault = match self {
            InjectedFault::FailCommit => Fault::FailCommit,
            InjectedFault::FailRollback => Fault::FailRollback,
            InjectedFault::FailOn { operation } => Fault::FailOn(operation.parse::<StoreOp>()?),
            InjectedFault::DelayOn { operation, millis } => Fault::DelayOn(
                operation.parse::<StoreOp>()?,
                Duration::from_millis(*millis),
            ),
        };
        Ok(fault)
    }
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertCondition {
    /// The account's current balance.
    BalanceEquals { account: String, amount: i64 },
    /// The sum of all balances equals the sum of opening balances.
    TotalConserved,
    /// Every balance equals its opening balance plus its entries.
    EntriesMatchBalances,
}

/// Knobs the built-in scenarios are parameterized with.
#[derive(Debug, Clone, Copy)]
pub struct ScenarioParams {
    pub initial_balance: i64,
    pub transfers: usize,
    pub max_amount: i64,
}

/// 1-based position of a spreadsheet-style label: A = 1, Z = 26, AA = 27.
///
/// `None` unless the label is non-empty uppercase `A..Z` and its position fits
/// in a `usize`.
fn label_position(label: &str) -> Option<usize> {
    if label.is_empty() {
        return None;
    }
    label.bytes().try_fold(0usize, |acc, b| {
        if !b.is_ascii_uppercase() {
            return None;
        }
        acc.checked_mul(26)?.checked_add(usize::from(b - b'A') + 1)
    })
}

fn account(label: &str) -> String {
    label.to_string()
}

fn transfer(from: &str, to: &str, amount: i64, expect: Outcome) -> ScenarioStep {
    ScenarioStep::Transfer {
        from: account(from),
        to: account(to),
        amount,
        expect: Some(expect),
        timeout_millis: None,
    }
}

fn balance_equals(label: &str, amount: i64) -> ScenarioStep {
    ScenarioStep::Assert {
        condition: AssertCondition::BalanceEquals {
            account: account(label),
            amount,
        },
    }
}

impl Scenario {
    /// Names accepted by [`Scenario::builtin`].
    pub const BUILTIN: [&'static str; 5] = [
        "same-direction",
        "opposite-direction",
        "random-load",
        "rejections",
        "rollback",
    ];

    /// Load a built-in scenario by name.
    pub fn builtin(name: &str, params: ScenarioParams) -> anyhow::Result<Self> {
        match name {
            "same-direction" => Ok(Self::same_direction(params)),
            "opposite-direction" => Ok(Self::opposite_direction(params)),
            "random-load" => Ok(Self::random_load(params)),
            "rejections" => Ok(Self::rejections(params)),
            "rollback" => Ok(Self::rollback(params)),
            _ => Err(anyhow!(
                "Unknown scenario: {name} (expected one of {})",
                Self::BUILTIN.join(", ")
            )),
        }
    }

    /// Load a scenario from a JSON file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid scenario file {}", path.display()))
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Minimum number of accounts the scenario refers to by label.
    ///
    /// Fails on a reference that is neither an uppercase label nor `#<id>`.
    pub fn accounts_needed(&self) -> anyhow::Result<usize> {
        let mut labels: Vec<&str> = Vec::new();
        let mut needed = 0;
        for step in &self.steps {
            match step {
                ScenarioStep::Transfer { from, to, .. } | ScenarioStep::Burst { from, to, .. } => {
                    labels.extend([from.as_str(), to.as_str()]);
                }
                ScenarioStep::Crossfire { a, b, .. } => labels.extend([a.as_str(), b.as_str()]),
                ScenarioStep::Assert {
                    condition: AssertCondition::BalanceEquals { account, .. },
                } => labels.push(account),
                ScenarioStep::Random { .. } => needed = needed.max(2),
                _ => {}
            }
        }
        labels
            .into_iter()
            .filter(|label| !label.starts_with('#'))
            .try_fold(needed, |needed, label| {
                let position = label_position(label)
                    .ok_or_else(|| anyhow!("unknown account label {label:?}"))?;
                Ok(needed.max(position))
            })
    }

    /// Same-direction transfers on one pair must serialize without lost updates.
    fn same_direction(params: ScenarioParams) -> Self {
        let amount = 10;
        let count = params.transfers.max(1);
        let moved = amount * count as i64;
        Self {
            name: "same-direction".to_string(),
            description: "Concurrent A -> B transfers".to_string(),
            steps: vec![
                ScenarioStep::Burst {
                    from: account("A"),
                    to: account("B"),
                    amount,
                    count,
                },
                balance_equals("A", params.initial_balance - moved),
                balance_equals("B", params.initial_balance + moved),
                ScenarioStep::Assert {
                    condition: AssertCondition::EntriesMatchBalances,
                },
            ],
        }
    }

    /// Opposite-direction transfers must not deadlock.
    fn opposite_direction(params: ScenarioParams) -> Self {
        let count = params.transfers.max(2) / 2 * 2;
        Self {
            name: "opposite-direction".to_string(),
            description: "Concurrent A <-> B transfers".to_string(),
            steps: vec![
                ScenarioStep::Crossfire {
                    a: account("A"),
                    b: account("B"),
                    amount: 10,
                    count,
                },
                balance_equals("A", params.initial_balance),
                balance_equals("B", params.initial_balance),
                ScenarioStep::Assert {
                    condition: AssertCondition::TotalConserved,
                },
            ],
        }
    }

    /// Random transfers across all accounts.
    fn random_load(params: ScenarioParams) -> Self {
        Self {
            name: "random-load".to_string(),
            description: "Random transfers between all accounts".to_string(),
            steps: vec![
                ScenarioStep::Random {
                    count: params.transfers,
                    max_amount: params.max_amount,
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::TotalConserved,
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::EntriesMatchBalances,
                },
            ],
        }
    }

    /// Invalid requests are refused and change nothing.
    fn rejections(params: ScenarioParams) -> Self {
        Self {
            name: "rejections".to_string(),
            description: "Self-transfers, bad amounts and unknown accounts".to_string(),
            steps: vec![
                transfer("A", "A", 10, Outcome::InvalidArgument),
                transfer("A", "B", 0, Outcome::InvalidArgument),
                transfer("A", "B", -5, Outcome::InvalidArgument),
                transfer("A", "#999999999", 10, Outcome::NotFound),
                transfer("#999999999", "B", 10, Outcome::NotFound),
                balance_equals("A", params.initial_balance),
                balance_equals("B", params.initial_balance),
                transfer("A", "B", 30, Outcome::Success),
                balance_equals("A", params.initial_balance - 30),
                balance_equals("B", params.initial_balance + 30),
            ],
        }
    }

    /// Failures part-way through a transfer leave nothing behind.
    fn rollback(params: ScenarioParams) -> Self {
        Self {
            name: "rollback".to_string(),
            description: "Injected datastore faults roll transfers back".to_string(),
            steps: vec![
                ScenarioStep::InjectFault {
                    fault: InjectedFault::FailOn {
                        operation: StoreOp::AddAccountBalance.to_string(),
                    },
                },
                transfer("A", "B", 25, Outcome::Persistence),
                ScenarioStep::ClearFaults,
                ScenarioStep::InjectFault {
                    fault: InjectedFault::FailCommit,
                },
                transfer("A", "B", 25, Outcome::Persistence),
                ScenarioStep::ClearFaults,
                balance_equals("A", params.initial_balance),
                balance_equals("B", params.initial_balance),
                ScenarioStep::InjectFault {
                    fault: InjectedFault::DelayOn {
                        operation: StoreOp::AddAccountBalance.to_string(),
                        millis: 200,
                    },
                },
                ScenarioStep::Transfer {
                    from: account("A"),
                    to: account("B"),
                    amount: 25,
                    expect: Some(Outcome::Aborted),
                    timeout_millis: Some(20),
                },
                ScenarioStep::ClearFaults,
                transfer("A", "B", 25, Outcome::Success),
                balance_equals("A", params.initial_balance - 25),
                ScenarioStep::Assert {
                    condition: AssertCondition::EntriesMatchBalances,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ScenarioParams {
        ScenarioParams {
            initial_balance: 1_000,
            transfers: 6,
            max_amount: 50,
        }
    }

    #[test]
    fn test_builtins_load() {
        for name in Scenario::BUILTIN {
            let scenario = Scenario::builtin(name, params()).unwrap();
            assert_eq!(scenario.name, name);
            assert!(scenario.accounts_needed().unwrap() >= 2);
        }
        assert!(Scenario::builtin("nope", params()).is_err());
    }

    #[test]
    fn test_from_json() {
        let scenario = Scenario::from_json(
            r#"{
                "name": "custom",
                "steps": [
                    {"transfer": {"from": "A", "to": "C", "amount": 30, "expect": "success"}},
                    {"inject_fault": {"fault": {"fail_on": {"operation": "create_entry"}}}},
                    "clear_faults",
                    {"assert": {"condition": "total_conserved"}}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(scenario.steps.len(), 4);
        assert_eq!(scenario.accounts_needed().unwrap(), 3);
        match &scenario.steps[1] {
            ScenarioStep::InjectFault { fault } => {
                assert_eq!(fault.to_fault().unwrap(), Fault::FailOn(StoreOp::CreateEntry));
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn test_label_position() {
        assert_eq!(label_position("A"), Some(1));
        assert_eq!(label_position("Z"), Some(26));
        assert_eq!(label_position("AA"), Some(27));
        assert_eq!(label_position(""), None);
        assert_eq!(label_position("alice"), None);
        assert_eq!(label_position("ZZZZZZZZZZZZZZ"), None);
    }

    #[test]
    fn test_accounts_needed_rejects_unknown_labels() {
        let lowercase = Scenario::from_json(
            r#"{"name": "named", "steps": [
                {"transfer": {"from": "alice", "to": "bob", "amount": 10}}
            ]}"#,
        )
        .unwrap();
        let err = lowercase.accounts_needed().unwrap_err();
        assert!(err.to_string().contains("unknown account label"));

        let long = Scenario::from_json(
            r#"{"name": "long", "steps": [
                {"crossfire": {"a": "A", "b": "ZZZZZZZZZZZZZZ", "amount": 1, "count": 2}}
            ]}"#,
        )
        .unwrap();
        assert!(long.accounts_needed().is_err());

        let raw = Scenario::from_json(
            r##"{"name": "raw", "steps": [
                {"transfer": {"from": "B", "to": "#42", "amount": 10}}
            ]}"##,
        )
        .unwrap();
        assert_eq!(raw.accounts_needed().unwrap(), 2);
    }

    #[test]
    fn test_unknown_fault_operation() {
        let fault = InjectedFault::FailOn {
            operation: "truncate".to_string(),
        };
        assert!(fault.to_fault().is_err());
    }
}
