//! Compensation journal for a single call
//!
//! Every externally visible step that lands records how to undo itself. On
//! abort the journal is replayed newest first; on success it is dropped.

use crate::ledger::LedgerCheckpoint;
use crate::pool::PoolKeys;
use crate::types::AccountKey;

use alloy_primitives::Address;
use tracing::debug;
use uuid::Uuid;

/// Undo action for one completed step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// Custody holds `amount` native tokens pulled from `user`; wrap them back.
    /// When an `ExitLiquidity` ran first, whatever it recovered is returned
    /// instead and any gap is a shortfall.
    ReturnPulled {
        mint: AccountKey,
        user: Address,
        amount: u64,
    },
    /// Custody received `lp_amount` LP tokens from an add; burn them
    ExitLiquidity { pool: PoolKeys, lp_amount: u64 },
    /// Custody received `amount` native tokens for burning `lp_amount` LP;
    /// put them back and expect at least `lp_amount` LP in return
    ReenterLiquidity {
        pool: PoolKeys,
        amount: u64,
        lp_amount: u64,
    },
    /// Share ledger records changed; restore the snapshot
    RestoreShares(LedgerCheckpoint),
}

impl Compensation {
    pub fn name(&self) -> &'static str {
        match self {
            Compensation::ReturnPulled { .. } => "return_pulled",
            Compensation::ExitLiquidity { .. } => "exit_liquidity",
            Compensation::ReenterLiquidity { .. } => "reenter_liquidity",
            Compensation::RestoreShares(_) => "restore_shares",
        }
    }

    /// Pool whose liquidity this step moves, if any
    pub fn pool(&self) -> Option<&PoolKeys> {
        match self {
            Compensation::ExitLiquidity { pool, .. } | Compensation::ReenterLiquidity { pool, .. } => {
                Some(pool)
            }
            Compensation::ReturnPulled { .. } | Compensation::RestoreShares(_) => None,
        }
    }
}

/// Journal of compensations for one call
#[derive(Debug)]
pub struct AtomicScope {
    call_id: Uuid,
    journal: Vec<Compensation>,
}

impl AtomicScope {
    pub fn new(call_id: Uuid) -> Self {
        Self {
            call_id,
            journal: Vec::new(),
        }
    }

    pub fn record(&mut self, compensation: Compensation) {
        self.journal.push(compensation);
    }

    pub fn len(&self) -> usize {
        self.journal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.journal.is_empty()
    }

    /// Discard the journal; the call is final
    pub fn commit(self) {
        debug!(
            "Call {} committed, dropping {} compensation(s)",
            self.call_id,
            self.journal.len()
        );
    }

    /// Compensations in undo order (newest first)
    pub fn into_unwind(self) -> impl Iterator<Item = Compensation> {
        self.journal.into_iter().rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwind_order_is_reversed() {
        let mut scope = AtomicScope::new(Uuid::new_v4());
        assert!(scope.is_empty());

        scope.record(Compensation::ReturnPulled {
            mint: AccountKey([1u8; 32]),
            user: Address::repeat_byte(1),
            amount: 10,
        });
        scope.record(Compensation::ReenterLiquidity {
            pool: crate::pool::PoolKeys {
                id: crate::types::PoolId::new([2u8; 32]),
                authority: AccountKey::default(),
                token_mint: AccountKey([1u8; 32]),
                token_vault: AccountKey([3u8; 32]),
                lp_mint: AccountKey([4u8; 32]),
            },
            amount: 5,
            lp_amount: 4,
        });
        assert_eq!(scope.len(), 2);

        let unwound: Vec<_> = scope.into_unwind().collect();
        let names: Vec<_> = unwound.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["reenter_liquidity", "return_pulled"]);
        assert!(unwound[0].pool().is_some());
        assert!(unwound[1].pool().is_none());
    }
}
