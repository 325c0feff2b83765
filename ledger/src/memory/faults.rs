//! Fault injection for the in-memory datastore.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::store::StoreOp;

/// A fault the in-memory datastore can be told to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Every commit fails; the transaction's writes are discarded.
    FailCommit,
    /// Every rollback reports a failure.
    FailRollback,
    /// The given operation fails with a persistence error.
    FailOn(StoreOp),
    /// The given operation stalls before running.
    DelayOn(StoreOp, Duration),
}

/// Currently active faults.
#[derive(Debug, Default)]
pub(crate) struct Faults {
    pub fail_commit: bool,
    pub fail_rollback: bool,
    pub fail_on: HashSet<StoreOp>,
    pub delay_on: HashMap<StoreOp, Duration>,
}

impl Faults {
    pub fn apply(&mut self, fault: Fault) {
        match fault {
            Fault::FailCommit => self.fail_commit = true,
            Fault::FailRollback => self.fail_rollback = true,
            Fault::FailOn(op) => {
                self.fail_on.insert(op);
            }
            Fault::DelayOn(op, delay) => {
                self.delay_on.insert(op, delay);
            }
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    #[cfg(test)]
    fn is_active(&self) -> bool {
        self.fail_commit
            || self.fail_rollback
            || !self.fail_on.is_empty()
            || !self.delay_on.is_empty()
    }
}
