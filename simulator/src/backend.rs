//! Datastores the simulator can drive.

use anyhow::bail;

use simplebank_ledger::memory::Fault;
use simplebank_ledger::{Database, LedgerStore, MemoryDatabase, PgDatabase};

/// A datastore usable both by the engine and for direct store access.
pub trait Backend: Database + LedgerStore + Clone + 'static {
    fn name(&self) -> &'static str;

    fn inject_fault(&self, fault: Fault) -> anyhow::Result<()>;

    fn clear_faults(&self) -> anyhow::Result<()>;
}

impl Backend for MemoryDatabase {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn inject_fault(&self, fault: Fault) -> anyhow::Result<()> {
        MemoryDatabase::inject_fault(self, fault);
        Ok(())
    }

    fn clear_faults(&self) -> anyhow::Result<()> {
        MemoryDatabase::clear_faults(self);
        Ok(())
    }
}

impl Backend for PgDatabase {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn inject_fault(&self, fault: Fault) -> anyhow::Result<()> {
        bail!("fault {fault:?} needs the memory backend")
    }

    fn clear_faults(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
