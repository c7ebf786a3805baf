//! Per-call state tracking

use crate::error::{codes, ForeignError, VaultError, VaultResult};
use crate::pool::ExecutionResult;
use crate::types::PoolId;

use alloy_primitives::Address;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Deposit,
    Withdraw,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Deposit => "deposit",
            CallKind::Withdraw => "withdraw",
        }
    }

    /// Forward stages in the order this kind of call passes them.
    ///
    /// `TokenPulled` marks the host-token leg: tokens pulled in before a
    /// deposit touches the pool, tokens pushed out after a withdraw settles.
    fn stages(&self) -> &'static [CallState] {
        match self {
            CallKind::Deposit => &[
                CallState::Init,
                CallState::TokenPulled,
                CallState::LiquidityMutated,
                CallState::SharesSettled,
                CallState::Done,
            ],
            CallKind::Withdraw => &[
                CallState::Init,
                CallState::LiquidityMutated,
                CallState::SharesSettled,
                CallState::TokenPulled,
                CallState::Done,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Init,
    TokenPulled,
    LiquidityMutated,
    SharesSettled,
    Done,
    Aborted,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Init => "init",
            CallState::TokenPulled => "token_pulled",
            CallState::LiquidityMutated => "liquidity_mutated",
            CallState::SharesSettled => "shares_settled",
            CallState::Done => "done",
            CallState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Done | CallState::Aborted)
    }
}

/// One in-flight deposit or withdraw
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub id: Uuid,
    pub kind: CallKind,
    pub pool_id: PoolId,
    pub user: Address,
    state: CallState,
    /// Quoted output of the pool instruction
    expected: u64,
    /// Least acceptable output after slippage
    minimum: u64,
    observed: Option<ExecutionResult>,
}

impl PendingCall {
    pub fn new(kind: CallKind, pool_id: PoolId, user: Address) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            pool_id,
            user,
            state: CallState::Init,
            expected: 0,
            minimum: 0,
            observed: None,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Move to the next forward stage
    pub fn advance(&mut self, next: CallState) -> VaultResult<()> {
        let stages = self.kind.stages();
        let allowed = stages
            .iter()
            .position(|s| *s == self.state)
            .and_then(|i| stages.get(i + 1))
            .is_some_and(|s| *s == next);
        if !allowed {
            return Err(VaultError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Mark the call aborted. No-op once the call is terminal.
    pub fn abort(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = CallState::Aborted;
        true
    }

    /// Record the quoted bounds of the instruction about to be dispatched
    pub fn quote(&mut self, expected: u64, minimum: u64) {
        self.expected = expected;
        self.minimum = minimum;
    }

    pub fn expected(&self) -> u64 {
        self.expected
    }

    pub fn minimum(&self) -> u64 {
        self.minimum
    }

    pub fn record_execution(&mut self, result: ExecutionResult) {
        self.observed = Some(result);
    }

    pub fn observed(&self) -> Option<&ExecutionResult> {
        self.observed.as_ref()
    }

    /// Reject an observed output below the slippage floor
    pub fn check_minimum(&self, observed: u64) -> VaultResult<()> {
        if observed < self.minimum {
            return Err(VaultError::CrossLedgerExecution(
                ForeignError::SlippageExceeded {
                    code: codes::EXCEEDED_SLIPPAGE,
                },
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(kind: CallKind) -> PendingCall {
        PendingCall::new(kind, PoolId::new([1u8; 32]), Address::repeat_byte(2))
    }

    #[test]
    fn test_deposit_stage_order() {
        let mut c = call(CallKind::Deposit);
        assert!(c.advance(CallState::LiquidityMutated).is_err());
        c.advance(CallState::TokenPulled).unwrap();
        c.advance(CallState::LiquidityMutated).unwrap();
        c.advance(CallState::SharesSettled).unwrap();
        c.advance(CallState::Done).unwrap();

        assert!(!c.abort());
        assert_eq!(c.state(), CallState::Done);
    }

    #[test]
    fn test_withdraw_stage_order() {
        let mut c = call(CallKind::Withdraw);
        assert!(matches!(
            c.advance(CallState::TokenPulled),
            Err(VaultError::InvalidStateTransition { .. })
        ));
        c.advance(CallState::LiquidityMutated).unwrap();
        c.advance(CallState::SharesSettled).unwrap();
        c.advance(CallState::TokenPulled).unwrap();
        c.advance(CallState::Done).unwrap();
    }

    #[test]
    fn test_abort_from_any_live_state() {
        let mut c = call(CallKind::Deposit);
        c.advance(CallState::TokenPulled).unwrap();
        assert!(c.abort());
        assert_eq!(c.state(), CallState::Aborted);
        assert!(c.advance(CallState::LiquidityMutated).is_err());
        assert!(!c.abort());
    }

    #[test]
    fn test_minimum_guard() {
        let mut c = call(CallKind::Deposit);
        c.quote(1_000, 990);
        assert_eq!((c.expected(), c.minimum()), (1_000, 990));
        assert!(c.check_minimum(990).is_ok());
        let err = c.check_minimum(989).unwrap_err();
        assert_eq!(err.kind(), "slippage_exceeded");
    }
}
