//! Per-pool share accounting
//!
//! Conversions floor toward zero in both directions so rounding dust always
//! stays with the pool.

use crate::error::{VaultError, VaultResult};
use crate::types::PoolId;

use alloy_primitives::{Address, U256};
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

/// Mirrored counters for one pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolTotals {
    pub total_shares: U256,
    pub total_liquidity: U256,
}

/// Snapshot of the records a single call may touch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerCheckpoint {
    pool_id: PoolId,
    user: Address,
    totals: Option<PoolTotals>,
    shares: U256,
}

/// Share ledger: per-pool totals and per-(user, pool) balances
pub struct ShareLedger {
    /// Pool totals, created lazily on first deposit
    pools: DashMap<PoolId, PoolTotals>,
    /// User positions; zero balances are pruned
    positions: DashMap<(Address, PoolId), U256>,
}

impl ShareLedger {
    pub fn new() -> Self {
        Self {
            pools: DashMap::new(),
            positions: DashMap::new(),
        }
    }

    /// Current totals for a pool (zero for a pool never deposited into)
    pub fn totals(&self, pool_id: &PoolId) -> PoolTotals {
        self.pools.get(pool_id).map(|t| *t).unwrap_or_default()
    }

    /// Share balance of a user in a pool
    pub fn shares_of(&self, user: &Address, pool_id: &PoolId) -> U256 {
        self.positions
            .get(&(*user, *pool_id))
            .map(|s| *s)
            .unwrap_or(U256::ZERO)
    }

    /// Sum of all user balances in a pool
    pub fn sum_of_positions(&self, pool_id: &PoolId) -> U256 {
        self.positions
            .iter()
            .filter(|entry| entry.key().1 == *pool_id)
            .fold(U256::ZERO, |acc, entry| acc + *entry.value())
    }

    /// Number of users holding a non-zero balance in a pool
    #[cfg(test)]
    pub fn holder_count(&self, pool_id: &PoolId) -> usize {
        self.positions
            .iter()
            .filter(|entry| entry.key().1 == *pool_id)
            .count()
    }

    /// Shares to mint for `liquidity_added` LP units at the current rate
    pub fn shares_for_deposit(&self, pool_id: &PoolId, liquidity_added: U256) -> VaultResult<U256> {
        self.convert_deposit(pool_id, liquidity_added, self.totals(pool_id))
    }

    /// Same as `shares_for_deposit`, but priced against an observed custodial
    /// LP balance instead of the mirrored one. Nothing is written.
    pub fn preview_shares(
        &self,
        pool_id: &PoolId,
        liquidity_added: U256,
        observed_liquidity: U256,
    ) -> VaultResult<U256> {
        let mut totals = self.totals(pool_id);
        if !totals.total_shares.is_zero() {
            totals.total_liquidity = observed_liquidity;
        }
        self.convert_deposit(pool_id, liquidity_added, totals)
    }

    fn convert_deposit(
        &self,
        pool_id: &PoolId,
        liquidity_added: U256,
        totals: PoolTotals,
    ) -> VaultResult<U256> {
        if liquidity_added.is_zero() {
            return Err(VaultError::ZeroLiquidity);
        }

        if totals.total_shares.is_zero() {
            // First depositor sets the 1:1 rate
            return Ok(liquidity_added);
        }
        if totals.total_liquidity.is_zero() {
            return Err(VaultError::LiquidityDesync {
                pool_id: pool_id.to_string(),
                shares: totals.total_shares.to_string(),
            });
        }

        let shares = liquidity_added
            .checked_mul(totals.total_shares)
            .ok_or(VaultError::MathOverflow {
                operation: "shares_for_deposit",
            })?
            / totals.total_liquidity;

        debug!(
            "Pool {}: {} liquidity -> {} shares (rate {}/{})",
            pool_id, liquidity_added, shares, totals.total_shares, totals.total_liquidity
        );
        Ok(shares)
    }

    /// LP units released by burning `shares_burned` at the current rate
    pub fn liquidity_for_withdraw(&self, pool_id: &PoolId, shares_burned: U256) -> VaultResult<U256> {
        let totals = self.totals(pool_id);
        if totals.total_shares.is_zero() || shares_burned > totals.total_shares {
            return Err(VaultError::InsufficientShares {
                requested: shares_burned.to_string(),
                available: totals.total_shares.to_string(),
            });
        }

        let liquidity = shares_burned
            .checked_mul(totals.total_liquidity)
            .ok_or(VaultError::MathOverflow {
                operation: "liquidity_for_withdraw",
            })?
            / totals.total_shares;

        debug!(
            "Pool {}: {} shares -> {} liquidity",
            pool_id, shares_burned, liquidity
        );
        Ok(liquidity)
    }

    /// Re-synchronize the mirrored liquidity with the authoritative custodial
    /// LP balance read from the counterparty ledger.
    ///
    /// While no shares are outstanding the counter stays at zero: anything
    /// already sitting in custody is picked up by the first sync after shares
    /// exist, and then belongs to all shareholders pro rata.
    pub fn sync_liquidity(&self, pool_id: &PoolId, observed: U256) -> VaultResult<()> {
        let Some(mut totals) = self.pools.get_mut(pool_id) else {
            return Ok(());
        };
        if totals.total_shares.is_zero() {
            return Ok(());
        }
        if observed.is_zero() {
            return Err(VaultError::LiquidityDesync {
                pool_id: pool_id.to_string(),
                shares: totals.total_shares.to_string(),
            });
        }
        if totals.total_liquidity != observed {
            debug!(
                "Pool {}: liquidity resync {} -> {}",
                pool_id, totals.total_liquidity, observed
            );
            totals.total_liquidity = observed;
        }
        Ok(())
    }

    /// Credit a confirmed liquidity add
    pub fn apply_deposit(
        &self,
        pool_id: &PoolId,
        user: &Address,
        liquidity_added: U256,
        shares: U256,
    ) -> VaultResult<()> {
        if liquidity_added.is_zero() {
            return Err(VaultError::ZeroLiquidity);
        }
        if shares.is_zero() {
            return Err(VaultError::ZeroShares);
        }

        let mut totals = self.pools.entry(*pool_id).or_default();
        let key = (*user, *pool_id);
        let balance = self.positions.get(&key).map(|s| *s).unwrap_or(U256::ZERO);

        let overflow = VaultError::MathOverflow {
            operation: "apply_deposit",
        };
        let new_shares = totals.total_shares.checked_add(shares);
        let new_liquidity = totals.total_liquidity.checked_add(liquidity_added);
        let new_balance = balance.checked_add(shares);
        let (Some(new_shares), Some(new_liquidity), Some(new_balance)) =
            (new_shares, new_liquidity, new_balance)
        else {
            return Err(overflow);
        };

        totals.total_shares = new_shares;
        totals.total_liquidity = new_liquidity;
        self.positions.insert(key, new_balance);
        Ok(())
    }

    /// Debit a confirmed liquidity removal
    pub fn apply_withdraw(
        &self,
        pool_id: &PoolId,
        user: &Address,
        liquidity_removed: U256,
        shares: U256,
    ) -> VaultResult<()> {
        let key = (*user, *pool_id);
        let balance = self.shares_of(user, pool_id);
        if balance < shares {
            return Err(VaultError::InsufficientShares {
                requested: shares.to_string(),
                available: balance.to_string(),
            });
        }

        let Some(mut totals) = self.pools.get_mut(pool_id) else {
            return Err(VaultError::InsufficientShares {
                requested: shares.to_string(),
                available: U256::ZERO.to_string(),
            });
        };

        let new_shares = totals.total_shares.checked_sub(shares).ok_or(VaultError::MathOverflow {
            operation: "apply_withdraw",
        })?;
        let new_liquidity = totals
            .total_liquidity
            .checked_sub(liquidity_removed)
            .ok_or(VaultError::MathOverflow {
                operation: "apply_withdraw",
            })?;
        if new_shares.is_zero() != new_liquidity.is_zero() {
            return Err(VaultError::Internal(format!(
                "Withdraw from pool {} would leave {} shares backed by {} liquidity",
                pool_id, new_shares, new_liquidity
            )));
        }

        totals.total_shares = new_shares;
        totals.total_liquidity = new_liquidity;
        let new_balance = balance - shares;
        if new_balance.is_zero() {
            self.positions.remove(&key);
        } else {
            self.positions.insert(key, new_balance);
        }
        Ok(())
    }

    /// Capture the records touched by a call on (pool, user)
    pub fn checkpoint(&self, pool_id: &PoolId, user: &Address) -> LedgerCheckpoint {
        LedgerCheckpoint {
            pool_id: *pool_id,
            user: *user,
            totals: self.pools.get(pool_id).map(|t| *t),
            shares: self.shares_of(user, pool_id),
        }
    }

    /// Put back the records captured by `checkpoint`
    pub fn restore(&self, checkpoint: &LedgerCheckpoint) {
        match checkpoint.totals {
            Some(totals) => {
                self.pools.insert(checkpoint.pool_id, totals);
            }
            None => {
                self.pools.remove(&checkpoint.pool_id);
            }
        }

        let key = (checkpoint.user, checkpoint.pool_id);
        if checkpoint.shares.is_zero() {
            self.positions.remove(&key);
        } else {
            self.positions.insert(key, checkpoint.shares);
        }
    }
}

impl Default for ShareLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> PoolId {
        PoolId::new([7u8; 32])
    }

    fn u(v: u64) -> U256 {
        U256::from(v)
    }

    fn assert_invariants(ledger: &ShareLedger, pool_id: &PoolId) {
        let totals = ledger.totals(pool_id);
        assert_eq!(totals.total_shares.is_zero(), totals.total_liquidity.is_zero());
        assert_eq!(ledger.sum_of_positions(pool_id), totals.total_shares);
    }

    #[test]
    fn test_first_deposit_is_one_to_one() {
        let ledger = ShareLedger::new();
        assert_eq!(ledger.shares_for_deposit(&pool(), u(1000)).unwrap(), u(1000));
    }

    #[test]
    fn test_zero_liquidity_rejected() {
        let ledger = ShareLedger::new();
        assert!(matches!(
            ledger.shares_for_deposit(&pool(), U256::ZERO),
            Err(VaultError::ZeroLiquidity)
        ));
    }

    #[test]
    fn test_worked_example() {
        let ledger = ShareLedger::new();
        let a = Address::repeat_byte(0xa);
        let b = Address::repeat_byte(0xb);

        let shares_a = ledger.shares_for_deposit(&pool(), u(1000)).unwrap();
        ledger.apply_deposit(&pool(), &a, u(1000), shares_a).unwrap();
        assert_eq!(shares_a, u(1000));
        assert_eq!(ledger.totals(&pool()).total_liquidity, u(1000));

        let shares_b = ledger.shares_for_deposit(&pool(), u(500)).unwrap();
        assert_eq!(shares_b, u(500));
        ledger.apply_deposit(&pool(), &b, u(500), shares_b).unwrap();
        assert_invariants(&ledger, &pool());

        let liquidity = ledger.liquidity_for_withdraw(&pool(), u(1000)).unwrap();
        assert_eq!(liquidity, u(1000));
        ledger.apply_withdraw(&pool(), &a, liquidity, u(1000)).unwrap();

        assert_eq!(ledger.shares_of(&a, &pool()), U256::ZERO);
        assert_eq!(ledger.holder_count(&pool()), 1);
        assert_invariants(&ledger, &pool());
    }

    #[test]
    fn test_conversions_floor_toward_pool() {
        let ledger = ShareLedger::new();
        let a = Address::repeat_byte(1);
        ledger.apply_deposit(&pool(), &a, u(3), u(2)).unwrap();

        // 2 * 2 / 3 = 1.33 -> 1
        assert_eq!(ledger.shares_for_deposit(&pool(), u(2)).unwrap(), u(1));
        // 1 * 3 / 2 = 1.5 -> 1
        assert_eq!(ledger.liquidity_for_withdraw(&pool(), u(1)).unwrap(), u(1));
    }

    #[test]
    fn test_withdraw_more_than_total_fails() {
        let ledger = ShareLedger::new();
        assert!(matches!(
            ledger.liquidity_for_withdraw(&pool(), u(1)),
            Err(VaultError::InsufficientShares { .. })
        ));

        let a = Address::repeat_byte(1);
        ledger.apply_deposit(&pool(), &a, u(10), u(10)).unwrap();
        assert!(matches!(
            ledger.liquidity_for_withdraw(&pool(), u(11)),
            Err(VaultError::InsufficientShares { .. })
        ));
    }

    #[test]
    fn test_apply_withdraw_over_balance_mutates_nothing() {
        let ledger = ShareLedger::new();
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        ledger.apply_deposit(&pool(), &a, u(10), u(10)).unwrap();
        ledger.apply_deposit(&pool(), &b, u(10), u(10)).unwrap();
        let before = ledger.totals(&pool());

        let result = ledger.apply_withdraw(&pool(), &a, u(11), u(11));
        assert!(matches!(result, Err(VaultError::InsufficientShares { .. })));
        assert_eq!(ledger.totals(&pool()), before);
        assert_eq!(ledger.shares_of(&a, &pool()), u(10));
    }

    #[test]
    fn test_sync_liquidity_spreads_donation() {
        let ledger = ShareLedger::new();
        let a = Address::repeat_byte(1);
        ledger.apply_deposit(&pool(), &a, u(100), u(100)).unwrap();

        ledger.sync_liquidity(&pool(), u(200)).unwrap();
        assert_eq!(ledger.totals(&pool()).total_liquidity, u(200));
        // Newcomer pays the donated rate
        assert_eq!(ledger.shares_for_deposit(&pool(), u(100)).unwrap(), u(50));
        // Existing holder owns the donation
        assert_eq!(ledger.liquidity_for_withdraw(&pool(), u(100)).unwrap(), u(200));
    }

    #[test]
    fn test_preview_uses_observed_liquidity_without_writing() {
        let ledger = ShareLedger::new();
        let a = Address::repeat_byte(1);
        assert_eq!(ledger.preview_shares(&pool(), u(10), u(999)).unwrap(), u(10));

        ledger.apply_deposit(&pool(), &a, u(100), u(100)).unwrap();
        assert_eq!(ledger.preview_shares(&pool(), u(100), u(400)).unwrap(), u(25));
        assert_eq!(ledger.totals(&pool()).total_liquidity, u(100));
    }

    #[test]
    fn test_sync_liquidity_ignored_without_shares() {
        let ledger = ShareLedger::new();
        ledger.sync_liquidity(&pool(), u(500)).unwrap();
        assert_eq!(ledger.totals(&pool()), PoolTotals::default());
        assert_eq!(ledger.shares_for_deposit(&pool(), u(10)).unwrap(), u(10));
    }

    #[test]
    fn test_sync_to_zero_with_shares_is_desync() {
        let ledger = ShareLedger::new();
        ledger
            .apply_deposit(&pool(), &Address::repeat_byte(1), u(5), u(5))
            .unwrap();
        assert!(matches!(
            ledger.sync_liquidity(&pool(), U256::ZERO),
            Err(VaultError::LiquidityDesync { .. })
        ));
    }

    #[test]
    fn test_checkpoint_restore_roundtrip() {
        let ledger = ShareLedger::new();
        let a = Address::repeat_byte(1);

        let empty = ledger.checkpoint(&pool(), &a);
        ledger.apply_deposit(&pool(), &a, u(40), u(40)).unwrap();
        ledger.restore(&empty);
        assert_eq!(ledger.totals(&pool()), PoolTotals::default());
        assert_eq!(ledger.shares_of(&a, &pool()), U256::ZERO);

        ledger.apply_deposit(&pool(), &a, u(40), u(40)).unwrap();
        let funded = ledger.checkpoint(&pool(), &a);
        ledger.apply_withdraw(&pool(), &a, u(40), u(40)).unwrap();
        ledger.restore(&funded);
        assert_eq!(ledger.shares_of(&a, &pool()), u(40));
        assert_invariants(&ledger, &pool());
    }

    #[test]
    fn test_stranded_liquidity_rejected() {
        let ledger = ShareLedger::new();
        let a = Address::repeat_byte(1);
        ledger.apply_deposit(&pool(), &a, u(10), u(10)).unwrap();

        let result = ledger.apply_withdraw(&pool(), &a, u(9), u(10));
        assert!(matches!(result, Err(VaultError::Internal(_))));
        assert_eq!(ledger.shares_of(&a, &pool()), u(10));
    }
}
