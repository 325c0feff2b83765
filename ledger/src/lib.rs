//! SimpleBank Ledger
//!
//! Ledger store primitives, a transaction runner and the transfer engine that
//! moves funds between accounts as one atomic unit.

pub mod account;
pub mod config;
pub mod context;
pub mod engine;
pub mod entry;
pub mod memory;
pub mod metrics;
pub mod policy;
pub mod postgres;
pub mod store;
pub mod transfer;
pub mod tx;

pub use account::{Account, NewAccount};
pub use config::{DatabaseConfig, LedgerConfig, TransferConfig};
pub use context::{CancelHandle, TxContext};
pub use engine::TransferEngine;
pub use entry::{Entry, EntryType};
pub use memory::MemoryDatabase;
pub use metrics::{ActiveTransfer, EngineMetrics, MetricsSnapshot, SharedMetrics};
pub use policy::OverdraftPolicy;
pub use postgres::PgDatabase;
pub use store::{Database, LedgerStore, LedgerTx, Page, StoreOp};
pub use transfer::{Transfer, TransferRequest, TransferResult};
pub use tx::{TransactionRunner, TxScope};
