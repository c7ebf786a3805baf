//! Cross-ledger staking vault
//!
//! Users deposit wrapped tokens on the host ledger; the vault converts them to
//! native tokens on a counterparty ledger, provides liquidity to a pool there
//! and tracks each user's claim as proportional shares.

pub mod api;
pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod metrics;
pub mod pool;
pub mod sim;
pub mod types;
pub mod vault;
