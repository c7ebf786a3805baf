//! Counterparty liquidity pool access
//!
//! `instruction` encodes pool program calls, `executor` dispatches them and
//! reports what actually changed in the vault's custodial accounts.

pub mod executor;
pub mod instruction;

pub use executor::{CrossLedgerExecutor, ExecutionResult, TokenDelta};
pub use instruction::{AccountMeta, Instruction, PoolCall, PoolInstructionBuilder};

use crate::error::ForeignError;
use crate::types::{AccountKey, PoolId};

use async_trait::async_trait;
use serde::Serialize;

/// Addresses that identify one pool on the counterparty ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolKeys {
    pub id: PoolId,
    pub authority: AccountKey,
    pub token_mint: AccountKey,
    pub token_vault: AccountKey,
    pub lp_mint: AccountKey,
}

/// Pool state as read from the counterparty ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolState {
    pub keys: PoolKeys,
    /// Native tokens held in the pool vault
    pub reserve: u64,
    /// Outstanding LP tokens
    pub lp_supply: u64,
}

impl PoolState {
    /// LP tokens expected for depositing `amount` at the current price
    pub fn quote_add_liquidity(&self, amount: u64) -> u64 {
        if self.lp_supply == 0 || self.reserve == 0 {
            return amount;
        }
        let lp = amount as u128 * self.lp_supply as u128 / self.reserve as u128;
        lp.min(u64::MAX as u128) as u64
    }

    /// Native tokens expected for burning `lp_amount` at the current price
    pub fn quote_remove_liquidity(&self, lp_amount: u64) -> u64 {
        if self.lp_supply == 0 {
            return 0;
        }
        let out = lp_amount as u128 * self.reserve as u128 / self.lp_supply as u128;
        out.min(u64::MAX as u128) as u64
    }
}

/// Counterparty ledger hosting the pool program and token accounts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CounterpartyLedger: Send + Sync {
    /// Current pool state, `None` if no pool lives at `pool_id`
    async fn pool_state(&self, pool_id: &PoolId) -> Result<Option<PoolState>, ForeignError>;

    /// Token balance of an account; zero for an account that does not exist
    async fn token_balance(&self, account: &AccountKey) -> Result<u64, ForeignError>;

    /// Dispatch `instruction`, signing for `signer`. Either every effect of
    /// the instruction lands or none does.
    async fn invoke(&self, instruction: &Instruction, signer: &AccountKey) -> Result<(), ForeignError>;
}
