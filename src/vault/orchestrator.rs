//! Deposit and withdraw orchestration
//!
//! Each call holds its pool's lock from start to finish and journals a
//! compensation after every step that lands. A failure at any point unwinds
//! the journal, so the caller observes either the whole call or none of it.

use super::atomic::{AtomicScope, Compensation};
use super::call::{CallKind, CallState, PendingCall};
use crate::bridge::{Custody, TokenBridgeAdapter, WrappedTokenLedger};
use crate::config::Settings;
use crate::error::{VaultError, VaultResult};
use crate::events::{EventBus, VaultEvent};
use crate::ledger::{PoolTotals, ShareLedger};
use crate::metrics;
use crate::pool::{CounterpartyLedger, CrossLedgerExecutor, PoolInstructionBuilder, PoolKeys};
use crate::types::{apply_slippage, to_native_amount, PoolId, BPS_DENOMINATOR};

use alloy_primitives::{Address, U256};
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Outcome of a completed deposit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepositReceipt {
    pub call_id: Uuid,
    pub pool_id: PoolId,
    pub user: Address,
    pub amount: U256,
    pub shares_minted: U256,
    pub lp_added: u64,
}

/// Outcome of a completed withdraw
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WithdrawReceipt {
    pub call_id: Uuid,
    pub pool_id: PoolId,
    pub user: Address,
    pub shares_burned: U256,
    pub lp_removed: u64,
    pub amount_returned: U256,
}

/// The vault: user-facing deposit/withdraw plus read-only views
pub struct VaultOrchestrator {
    ledger: ShareLedger,
    bridge: TokenBridgeAdapter,
    builder: PoolInstructionBuilder,
    executor: CrossLedgerExecutor,
    max_slippage_bps: u64,
    pool_locks: DashMap<PoolId, Arc<Mutex<()>>>,
    events: EventBus,
}

impl VaultOrchestrator {
    pub fn new(
        ledger: ShareLedger,
        bridge: TokenBridgeAdapter,
        builder: PoolInstructionBuilder,
        executor: CrossLedgerExecutor,
        max_slippage_bps: u64,
    ) -> Self {
        Self {
            ledger,
            bridge,
            builder,
            executor,
            max_slippage_bps: max_slippage_bps.min(BPS_DENOMINATOR),
            pool_locks: DashMap::new(),
            events: EventBus::default(),
        }
    }

    /// Wire up every component from validated settings
    pub fn from_settings(
        settings: &Settings,
        tokens: Arc<dyn WrappedTokenLedger>,
        counterparty: Arc<dyn CounterpartyLedger>,
    ) -> anyhow::Result<Self> {
        let custody = Custody::new(settings.vault.host_address, &settings.counterparty.custody_seed);
        let bridge = TokenBridgeAdapter::new(settings.token_mapping()?, tokens, custody.clone());
        let builder = PoolInstructionBuilder::new(
            settings.pool_program_id()?,
            settings.token_program_id()?,
            custody.clone(),
        );
        let executor = CrossLedgerExecutor::new(counterparty, custody);

        Ok(Self::new(
            ShareLedger::new(),
            bridge,
            builder,
            executor,
            settings.vault.max_slippage_bps,
        ))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<VaultEvent> {
        self.events.subscribe()
    }

    pub fn ledger(&self) -> &ShareLedger {
        &self.ledger
    }

    pub fn custody(&self) -> &Custody {
        self.bridge.custody()
    }

    pub fn max_slippage_bps(&self) -> u64 {
        self.max_slippage_bps
    }

    /// Deposit `amount` wrapped tokens from `user` into `pool_id`'s liquidity
    /// and mint the corresponding shares
    #[instrument(skip(self, amount), fields(call_id))]
    pub async fn deposit(
        &self,
        user: Address,
        pool_id: PoolId,
        amount: U256,
        slippage_bps: u64,
    ) -> VaultResult<DepositReceipt> {
        self.check_slippage(slippage_bps)?;
        if amount.is_zero() {
            return Err(VaultError::ZeroLiquidity);
        }

        let lock = self.pool_lock(&pool_id);
        let _guard = lock.lock().await;

        let mut call = PendingCall::new(CallKind::Deposit, pool_id, user);
        tracing::Span::current().record("call_id", tracing::field::display(call.id));
        let mut scope = AtomicScope::new(call.id);

        match self.run_deposit(&mut call, &mut scope, amount, slippage_bps).await {
            Ok(receipt) => {
                scope.commit();
                metrics::record_deposit(&pool_id);
                metrics::record_pool_totals(&pool_id, &self.ledger.totals(&pool_id));
                self.events.publish(VaultEvent::Deposited {
                    user,
                    pool_id,
                    amount,
                    shares_minted: receipt.shares_minted,
                    lp_added: receipt.lp_added,
                    call_id: receipt.call_id,
                    timestamp: Utc::now(),
                });
                info!(
                    "Deposit {}: {} into pool {} -> {} shares ({} lp)",
                    call.id, amount, pool_id, receipt.shares_minted, receipt.lp_added
                );
                Ok(receipt)
            }
            Err(e) => Err(self.abort(&mut call, scope, e).await),
        }
    }

    async fn run_deposit(
        &self,
        call: &mut PendingCall,
        scope: &mut AtomicScope,
        amount: U256,
        slippage_bps: u64,
    ) -> VaultResult<DepositReceipt> {
        let pool = self.executor.pool_state(&call.pool_id).await?;
        let keys = &pool.keys;
        let wrapped = self.bridge.wrapped_for_mint(&keys.token_mint)?;

        let native = self.bridge.pull_and_convert(wrapped, call.user, amount).await?;
        scope.record(Compensation::ReturnPulled {
            mint: keys.token_mint,
            user: call.user,
            amount: native,
        });
        call.advance(CallState::TokenPulled)?;

        self.sync_pool(keys).await?;

        let expected_lp = self.executor.expected_lp(&call.pool_id, native).await?;
        let min_lp_out = apply_slippage(expected_lp, slippage_bps);
        // Refuse before touching the pool if the quote already rounds to zero shares
        if self
            .ledger
            .shares_for_deposit(&call.pool_id, U256::from(expected_lp))?
            .is_zero()
        {
            return Err(VaultError::ZeroShares);
        }

        let instruction = self.builder.build_add_liquidity(keys, native, min_lp_out)?;
        call.quote(expected_lp, min_lp_out);
        let result = self.executor.execute(keys, &instruction).await?;
        let lp_added = result.lp_gained();
        if lp_added > 0 {
            scope.record(Compensation::ExitLiquidity {
                pool: keys.clone(),
                lp_amount: lp_added,
            });
        }
        call.record_execution(result);
        call.check_minimum(lp_added)?;
        call.advance(CallState::LiquidityMutated)?;

        let liquidity = U256::from(lp_added);
        let shares = self.ledger.shares_for_deposit(&call.pool_id, liquidity)?;
        if shares.is_zero() {
            return Err(VaultError::ZeroShares);
        }
        scope.record(Compensation::RestoreShares(
            self.ledger.checkpoint(&call.pool_id, &call.user),
        ));
        self.ledger
            .apply_deposit(&call.pool_id, &call.user, liquidity, shares)?;
        call.advance(CallState::SharesSettled)?;
        call.advance(CallState::Done)?;

        Ok(DepositReceipt {
            call_id: call.id,
            pool_id: call.pool_id,
            user: call.user,
            amount,
            shares_minted: shares,
            lp_added,
        })
    }

    /// Burn `shares` of `user` in `pool_id`, remove the matching liquidity and
    /// return the proceeds as wrapped tokens
    #[instrument(skip(self, shares), fields(call_id))]
    pub async fn withdraw(
        &self,
        user: Address,
        pool_id: PoolId,
        shares: U256,
        slippage_bps: u64,
    ) -> VaultResult<WithdrawReceipt> {
        self.check_slippage(slippage_bps)?;
        if shares.is_zero() {
            return Err(VaultError::ZeroShares);
        }

        let lock = self.pool_lock(&pool_id);
        let _guard = lock.lock().await;

        let available = self.ledger.shares_of(&user, &pool_id);
        if available < shares {
            return Err(VaultError::InsufficientShares {
                requested: shares.to_string(),
                available: available.to_string(),
            });
        }

        let mut call = PendingCall::new(CallKind::Withdraw, pool_id, user);
        tracing::Span::current().record("call_id", tracing::field::display(call.id));
        let mut scope = AtomicScope::new(call.id);

        match self.run_withdraw(&mut call, &mut scope, shares, slippage_bps).await {
            Ok(receipt) => {
                scope.commit();
                metrics::record_withdrawal(&pool_id);
                metrics::record_pool_totals(&pool_id, &self.ledger.totals(&pool_id));
                self.events.publish(VaultEvent::Withdrawn {
                    user,
                    pool_id,
                    shares,
                    amount_returned: receipt.amount_returned,
                    lp_removed: receipt.lp_removed,
                    call_id: receipt.call_id,
                    timestamp: Utc::now(),
                });
                info!(
                    "Withdraw {}: {} shares from pool {} -> {} returned ({} lp)",
                    call.id, shares, pool_id, receipt.amount_returned, receipt.lp_removed
                );
                Ok(receipt)
            }
            Err(e) => Err(self.abort(&mut call, scope, e).await),
        }
    }

    async fn run_withdraw(
        &self,
        call: &mut PendingCall,
        scope: &mut AtomicScope,
        shares: U256,
        slippage_bps: u64,
    ) -> VaultResult<WithdrawReceipt> {
        let pool = self.executor.pool_state(&call.pool_id).await?;
        let keys = &pool.keys;
        // Fail on an unmapped mint before anything moves
        self.bridge.wrapped_for_mint(&keys.token_mint)?;

        self.sync_pool(keys).await?;

        let liquidity = self.ledger.liquidity_for_withdraw(&call.pool_id, shares)?;
        let lp_amount = to_native_amount(liquidity)?;
        if lp_amount == 0 {
            return Err(VaultError::ZeroLiquidity);
        }
        let expected_out = self.executor.expected_out(&call.pool_id, lp_amount).await?;
        let min_out = apply_slippage(expected_out, slippage_bps);

        let instruction = self.builder.build_remove_liquidity(keys, lp_amount, min_out)?;
        call.quote(expected_out, min_out);
        let result = self.executor.execute(keys, &instruction).await?;
        let received = result.token_received(&keys.token_mint);
        let lp_removed = result.lp_spent();
        if received > 0 {
            scope.record(Compensation::ReenterLiquidity {
                pool: keys.clone(),
                amount: received,
                lp_amount: lp_removed,
            });
        }
        call.record_execution(result);
        call.check_minimum(received)?;
        call.advance(CallState::LiquidityMutated)?;

        scope.record(Compensation::RestoreShares(
            self.ledger.checkpoint(&call.pool_id, &call.user),
        ));
        self.ledger.apply_withdraw(
            &call.pool_id,
            &call.user,
            U256::from(lp_removed),
            shares,
        )?;
        call.advance(CallState::SharesSettled)?;

        let amount_returned = self
            .bridge
            .convert_and_push(&keys.token_mint, call.user, received)
            .await?;
        call.advance(CallState::TokenPulled)?;
        call.advance(CallState::Done)?;

        Ok(WithdrawReceipt {
            call_id: call.id,
            pool_id: call.pool_id,
            user: call.user,
            shares_burned: shares,
            lp_removed,
            amount_returned,
        })
    }

    /// Shares held by `user` in `pool_id`
    pub fn get_user_shares(&self, user: &Address, pool_id: &PoolId) -> U256 {
        self.ledger.shares_of(user, pool_id)
    }

    /// Shares a deposit of `amount` wrapped tokens would mint right now.
    /// Reads live pool state; writes nothing.
    pub async fn calculate_shares(&self, pool_id: &PoolId, amount: U256) -> VaultResult<U256> {
        if amount.is_zero() {
            return Ok(U256::ZERO);
        }
        let pool = self.executor.pool_state(pool_id).await?;
        let native = to_native_amount(amount)?;
        let expected_lp = self.executor.expected_lp(pool_id, native).await?;
        if expected_lp == 0 {
            return Ok(U256::ZERO);
        }
        let observed = self.executor.custodial_lp_balance(&pool.keys).await?;
        self.ledger
            .preview_shares(pool_id, U256::from(expected_lp), U256::from(observed))
    }

    /// LP tokens the vault holds in custody for `pool_id`
    pub async fn get_total_lp_in_pool(&self, pool_id: &PoolId) -> VaultResult<U256> {
        let pool = self.executor.pool_state(pool_id).await?;
        let balance = self.executor.custodial_lp_balance(&pool.keys).await?;
        Ok(U256::from(balance))
    }

    /// Mirrored totals for `pool_id`
    pub fn pool_totals(&self, pool_id: &PoolId) -> PoolTotals {
        self.ledger.totals(pool_id)
    }

    fn check_slippage(&self, slippage_bps: u64) -> VaultResult<()> {
        if slippage_bps > self.max_slippage_bps {
            return Err(VaultError::InvalidSlippage {
                bps: slippage_bps,
                max: self.max_slippage_bps,
            });
        }
        Ok(())
    }

    fn pool_lock(&self, pool_id: &PoolId) -> Arc<Mutex<()>> {
        self.pool_locks
            .entry(*pool_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Pull the mirrored liquidity counter in line with custody
    async fn sync_pool(&self, pool: &PoolKeys) -> VaultResult<()> {
        let observed = self.executor.custodial_lp_balance(pool).await?;
        self.ledger.sync_liquidity(&pool.id, U256::from(observed))
    }

    async fn abort(&self, call: &mut PendingCall, scope: AtomicScope, cause: VaultError) -> VaultError {
        let reached = call.state();
        call.abort();
        warn!(
            "{} {} aborted at {} with {} compensation(s): {}",
            call.kind.as_str(),
            call.id,
            reached,
            scope.len(),
            cause
        );
        if let Some(observed) = call.observed() {
            debug!(
                "Call {} quoted {} (minimum {}), observed lp {:+}",
                call.id,
                call.expected(),
                call.minimum(),
                observed.lp_delta
            );
        }

        let mut failures = 0;
        let mut recovered = None;
        let mut moved_pool: Option<PoolKeys> = None;
        for compensation in scope.into_unwind() {
            if let Some(pool) = compensation.pool() {
                moved_pool = Some(pool.clone());
            }
            if let Err(e) = self.compensate(&compensation, &mut recovered).await {
                error!(
                    "Compensation {} for call {} failed: {}",
                    compensation.name(),
                    call.id,
                    e
                );
                metrics::record_compensation_failure(compensation.name());
                failures += 1;
            }
        }

        // Pool rounding can leave custody off the restored mirror
        if let Some(pool) = moved_pool {
            if let Err(e) = self.sync_pool(&pool).await {
                error!("Liquidity resync for call {} failed: {}", call.id, e);
                metrics::record_compensation_failure("resync_liquidity");
                failures += 1;
            }
        }

        let error = if failures == 0 {
            cause
        } else {
            VaultError::RollbackIncomplete {
                source: Box::new(cause),
                failures,
            }
        };
        metrics::record_call_aborted(call.kind.as_str(), &error);
        error
    }

    /// Replay one compensation and verify it restored what was journaled.
    ///
    /// `recovered` carries the native tokens an `ExitLiquidity` brought back
    /// into custody, for the `ReturnPulled` that follows it.
    async fn compensate(
        &self,
        compensation: &Compensation,
        recovered: &mut Option<u64>,
    ) -> VaultResult<()> {
        let step = compensation.name();
        match compensation {
            Compensation::RestoreShares(checkpoint) => {
                self.ledger.restore(checkpoint);
                Ok(())
            }
            Compensation::ExitLiquidity { pool, lp_amount } => {
                *recovered = Some(0);
                let instruction = self.builder.build_remove_liquidity(pool, *lp_amount, 0)?;
                let result = self.executor.execute(pool, &instruction).await?;
                *recovered = Some(result.token_received(&pool.token_mint));
                ensure_restored(step, *lp_amount, result.lp_spent())
            }
            Compensation::ReenterLiquidity {
                pool,
                amount,
                lp_amount,
            } => {
                let instruction = self.builder.build_add_liquidity(pool, *amount, 0)?;
                let result = self.executor.execute(pool, &instruction).await?;
                ensure_restored(step, *lp_amount, result.lp_gained())
            }
            Compensation::ReturnPulled { mint, user, amount } => {
                let available = recovered.take().unwrap_or(*amount);
                if available > 0 {
                    self.bridge.convert_and_push(mint, *user, available).await?;
                }
                ensure_restored(step, *amount, available)
            }
        }
    }
}

fn ensure_restored(step: &'static str, expected: u64, observed: u64) -> VaultResult<()> {
    if observed < expected {
        return Err(VaultError::CompensationShortfall {
            step,
            expected,
            observed,
        });
    }
    Ok(())
}
