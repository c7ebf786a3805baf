//! Share ledger: the only owner of pool totals and user positions
//!
//! The orchestrator reads and writes these records exclusively through
//! `ShareLedger` operations.

mod shares;

pub use shares::{LedgerCheckpoint, PoolTotals, ShareLedger};
