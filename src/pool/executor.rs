//! Dispatches pool instructions to the counterparty ledger

use super::instruction::{decode, Instruction, PoolCall};
use super::{CounterpartyLedger, PoolKeys, PoolState};
use crate::bridge::Custody;
use crate::error::{VaultError, VaultResult};
use crate::metrics;
use crate::types::{AccountKey, PoolId};

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// Observed change of one custodial token account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenDelta {
    pub mint: AccountKey,
    pub account: AccountKey,
    pub delta: i128,
}

/// What a dispatched instruction did to the vault's custodial accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// Change of the custodial LP balance
    pub lp_delta: i128,
    /// Change of the custodial native token balances
    pub token_deltas: Vec<TokenDelta>,
}

fn positive(delta: i128) -> u64 {
    if delta > 0 {
        delta.min(u64::MAX as i128) as u64
    } else {
        0
    }
}

impl ExecutionResult {
    /// LP tokens minted to custody
    pub fn lp_gained(&self) -> u64 {
        positive(self.lp_delta)
    }

    /// LP tokens burned from custody
    pub fn lp_spent(&self) -> u64 {
        positive(-self.lp_delta)
    }

    /// Native tokens of `mint` credited to custody
    pub fn token_received(&self, mint: &AccountKey) -> u64 {
        self.token_deltas
            .iter()
            .filter(|d| d.mint == *mint)
            .map(|d| positive(d.delta))
            .sum()
    }

    /// Native tokens of `mint` debited from custody
    pub fn token_spent(&self, mint: &AccountKey) -> u64 {
        self.token_deltas
            .iter()
            .filter(|d| d.mint == *mint)
            .map(|d| positive(-d.delta))
            .sum()
    }
}

/// Runs pool instructions against the counterparty ledger as the vault's
/// custodial owner
pub struct CrossLedgerExecutor {
    ledger: Arc<dyn CounterpartyLedger>,
    custody: Custody,
}

impl CrossLedgerExecutor {
    pub fn new(ledger: Arc<dyn CounterpartyLedger>, custody: Custody) -> Self {
        Self { ledger, custody }
    }

    /// Read pool state, failing if the pool does not exist
    pub async fn pool_state(&self, pool_id: &PoolId) -> VaultResult<PoolState> {
        self.ledger
            .pool_state(pool_id)
            .await?
            .ok_or_else(|| VaultError::PoolNotFound {
                pool_id: pool_id.to_string(),
            })
    }

    /// LP tokens held in custody for a pool
    pub async fn custodial_lp_balance(&self, pool: &PoolKeys) -> VaultResult<u64> {
        let account = self.custody.token_account(&pool.lp_mint);
        Ok(self.ledger.token_balance(&account).await?)
    }

    /// LP tokens the pool would currently mint for `amount`
    pub async fn expected_lp(&self, pool_id: &PoolId, amount: u64) -> VaultResult<u64> {
        Ok(self.pool_state(pool_id).await?.quote_add_liquidity(amount))
    }

    /// Native tokens the pool would currently return for `lp_amount`
    pub async fn expected_out(&self, pool_id: &PoolId, lp_amount: u64) -> VaultResult<u64> {
        Ok(self.pool_state(pool_id).await?.quote_remove_liquidity(lp_amount))
    }

    /// Dispatch `instruction` and report the custodial balance changes it caused
    #[instrument(skip(self, pool, instruction), fields(pool_id = %pool.id))]
    pub async fn execute(
        &self,
        pool: &PoolKeys,
        instruction: &Instruction,
    ) -> VaultResult<ExecutionResult> {
        let call = decode(&instruction.data).ok_or_else(|| {
            VaultError::Internal("Refusing to dispatch undecodable pool instruction".into())
        })?;
        let label = match call {
            PoolCall::AddLiquidity { .. } => "add_liquidity",
            PoolCall::RemoveLiquidity { .. } => "remove_liquidity",
        };

        let owner = self.custody.owner();
        let signers: Vec<_> = instruction.accounts.iter().filter(|m| m.is_signer).collect();
        if signers.len() != 1 || signers[0].pubkey != owner {
            return Err(VaultError::Internal(
                "Pool instruction must be signed by the custodial owner only".into(),
            ));
        }

        let token_account = self.custody.token_account(&pool.token_mint);
        let lp_account = self.custody.token_account(&pool.lp_mint);
        let token_before = self.ledger.token_balance(&token_account).await?;
        let lp_before = self.ledger.token_balance(&lp_account).await?;

        let start = Instant::now();
        let outcome = self.ledger.invoke(instruction, &owner).await;
        metrics::record_execution(label, outcome.is_ok(), start.elapsed().as_secs_f64());

        if let Err(e) = outcome {
            warn!("Pool {} {} rejected: {}", pool.id, label, e);
            return Err(e.into());
        }

        let token_after = self.ledger.token_balance(&token_account).await?;
        let lp_after = self.ledger.token_balance(&lp_account).await?;

        let result = ExecutionResult {
            lp_delta: lp_after as i128 - lp_before as i128,
            token_deltas: vec![TokenDelta {
                mint: pool.token_mint,
                account: token_account,
                delta: token_after as i128 - token_before as i128,
            }],
        };
        debug!(
            "Pool {} {}: lp {:+}, token {:+}",
            pool.id, label, result.lp_delta, result.token_deltas[0].delta
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForeignError;
    use crate::pool::instruction::PoolInstructionBuilder;
    use crate::pool::MockCounterpartyLedger;
    use alloy_primitives::Address;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn custody() -> Custody {
        Custody::new(Address::repeat_byte(0x55), "seed")
    }

    fn keys() -> PoolKeys {
        PoolKeys {
            id: PoolId::new([9u8; 32]),
            authority: AccountKey([1u8; 32]),
            token_mint: AccountKey([2u8; 32]),
            token_vault: AccountKey([3u8; 32]),
            lp_mint: AccountKey([4u8; 32]),
        }
    }

    fn builder() -> PoolInstructionBuilder {
        PoolInstructionBuilder::new(AccountKey([0xaa; 32]), AccountKey([0xbb; 32]), custody())
    }

    #[tokio::test]
    async fn test_execute_reports_balance_deltas() {
        let invoked = Arc::new(AtomicBool::new(false));
        let token_account = custody().token_account(&keys().token_mint);
        let lp_account = custody().token_account(&keys().lp_mint);

        let mut mock = MockCounterpartyLedger::new();
        let flag = invoked.clone();
        mock.expect_token_balance().returning(move |account| {
            let done = flag.load(Ordering::SeqCst);
            match (*account == token_account, *account == lp_account, done) {
                (true, _, false) => Ok(1_000),
                (true, _, true) => Ok(0),
                (_, true, false) => Ok(10),
                (_, true, true) => Ok(510),
                _ => Ok(0),
            }
        });
        let flag = invoked.clone();
        let owner = custody().owner();
        mock.expect_invoke()
            .withf(move |_, signer| *signer == owner)
            .times(1)
            .returning(move |_, _| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            });

        let executor = CrossLedgerExecutor::new(Arc::new(mock), custody());
        let ix = builder().build_add_liquidity(&keys(), 1_000, 400).unwrap();
        let result = executor.execute(&keys(), &ix).await.unwrap();

        assert_eq!(result.lp_delta, 500);
        assert_eq!(result.lp_gained(), 500);
        assert_eq!(result.lp_spent(), 0);
        assert_eq!(result.token_spent(&keys().token_mint), 1_000);
        assert_eq!(result.token_received(&keys().token_mint), 0);
    }

    #[tokio::test]
    async fn test_execute_propagates_foreign_error() {
        let mut mock = MockCounterpartyLedger::new();
        mock.expect_token_balance().returning(|_| Ok(0));
        mock.expect_invoke()
            .returning(|_, _| Err(ForeignError::Unavailable("rpc down".into())));

        let executor = CrossLedgerExecutor::new(Arc::new(mock), custody());
        let ix = builder().build_remove_liquidity(&keys(), 5, 0).unwrap();
        let err = executor.execute(&keys(), &ix).await.unwrap_err();

        assert!(matches!(
            err,
            VaultError::CrossLedgerExecution(ForeignError::Unavailable(_))
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_execute_refuses_foreign_signer() {
        let mut mock = MockCounterpartyLedger::new();
        mock.expect_invoke().never();

        let executor = CrossLedgerExecutor::new(Arc::new(mock), custody());
        let mut ix = builder().build_add_liquidity(&keys(), 10, 0).unwrap();
        ix.accounts[2].pubkey = AccountKey([0xee; 32]);

        assert!(matches!(
            executor.execute(&keys(), &ix).await,
            Err(VaultError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_pool() {
        let mut mock = MockCounterpartyLedger::new();
        mock.expect_pool_state().returning(|_| Ok(None));

        let executor = CrossLedgerExecutor::new(Arc::new(mock), custody());
        assert!(matches!(
            executor.pool_state(&PoolId::new([1u8; 32])).await,
            Err(VaultError::PoolNotFound { .. })
        ));
    }
}
