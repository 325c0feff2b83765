//! SimpleBank Common Types
//!
//! Shared identifiers, currencies and the error taxonomy used by the ledger
//! store, the transfer engine and their callers.

pub mod identifiers;
pub mod monetary;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use error::*;
pub use time::*;
