//! Error types for the vault

use thiserror::Error;

/// Failure reported by the counterparty ledger for a dispatched instruction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ForeignError {
    #[error("Slippage guard tripped (code {code})")]
    SlippageExceeded { code: u32 },

    #[error("Insufficient pool liquidity (code {code})")]
    InsufficientLiquidity { code: u32 },

    #[error("Malformed account list (code {code})")]
    MalformedAccounts { code: u32 },

    #[error("Pool program failed with code {code}: {message}")]
    Program { code: u32, message: String },

    #[error("Counterparty ledger unavailable: {0}")]
    Unavailable(String),
}

/// Error codes surfaced by the counterparty pool program
pub mod codes {
    pub const INSUFFICIENT_FUNDS: u32 = 1;
    pub const MALFORMED_ACCOUNTS: u32 = 3;
    pub const MISSING_SIGNATURE: u32 = 8;
    pub const UNKNOWN_INSTRUCTION: u32 = 0x0c;
    pub const EXCEEDED_SLIPPAGE: u32 = 0x1771;
    pub const INSUFFICIENT_LIQUIDITY: u32 = 0x1772;
    pub const POOL_NOT_FOUND: u32 = 0x1773;
}

impl ForeignError {
    /// Classify a raw program error code
    pub fn from_code(code: u32, message: impl Into<String>) -> Self {
        match code {
            codes::EXCEEDED_SLIPPAGE => ForeignError::SlippageExceeded { code },
            codes::INSUFFICIENT_LIQUIDITY => ForeignError::InsufficientLiquidity { code },
            codes::MALFORMED_ACCOUNTS | codes::MISSING_SIGNATURE => {
                ForeignError::MalformedAccounts { code }
            }
            _ => ForeignError::Program {
                code,
                message: message.into(),
            },
        }
    }

    /// The foreign ledger's error code, when it reported one
    pub fn code(&self) -> Option<u32> {
        match self {
            ForeignError::SlippageExceeded { code }
            | ForeignError::InsufficientLiquidity { code }
            | ForeignError::MalformedAccounts { code }
            | ForeignError::Program { code, .. } => Some(*code),
            ForeignError::Unavailable(_) => None,
        }
    }
}

/// Main error type for the vault
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Liquidity amount must be non-zero")]
    ZeroLiquidity,

    #[error("Operation would mint or burn zero shares")]
    ZeroShares,

    #[error("Insufficient shares: requested {requested}, available {available}")]
    InsufficientShares { requested: String, available: String },

    #[error("No token mapping for {token}")]
    UnmappedToken { token: String },

    #[error("Token transfer failed: {0}")]
    TransferFailed(String),

    #[error("Cross-ledger execution failed: {0}")]
    CrossLedgerExecution(#[from] ForeignError),

    #[error("Slippage tolerance {bps} bps exceeds the allowed maximum {max} bps")]
    InvalidSlippage { bps: u64, max: u64 },

    #[error("Amount {amount} does not fit the counterparty token range")]
    AmountOutOfRange { amount: String },

    #[error("Arithmetic overflow in {operation}")]
    MathOverflow { operation: &'static str },

    #[error("Pool {pool_id} not found on counterparty ledger")]
    PoolNotFound { pool_id: String },

    #[error("Pool {pool_id} reports zero custodial liquidity with {shares} shares outstanding")]
    LiquidityDesync { pool_id: String, shares: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Compensation {step} restored {observed} of {expected}")]
    CompensationShortfall {
        step: &'static str,
        expected: u64,
        observed: u64,
    },

    #[error("Rollback incomplete after {failures} failed compensation(s): {source}")]
    RollbackIncomplete {
        #[source]
        source: Box<VaultError>,
        failures: usize,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Check if the caller may resubmit the same call
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VaultError::CrossLedgerExecution(ForeignError::Unavailable(_))
                | VaultError::CrossLedgerExecution(ForeignError::SlippageExceeded { .. })
        )
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            VaultError::RollbackIncomplete { .. }
                | VaultError::LiquidityDesync { .. }
                | VaultError::CompensationShortfall { .. }
        )
    }

    /// Stable label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            VaultError::Config(_) => "config",
            VaultError::ZeroLiquidity => "zero_liquidity",
            VaultError::ZeroShares => "zero_shares",
            VaultError::InsufficientShares { .. } => "insufficient_shares",
            VaultError::UnmappedToken { .. } => "unmapped_token",
            VaultError::TransferFailed(_) => "transfer_failed",
            VaultError::CrossLedgerExecution(ForeignError::SlippageExceeded { .. }) => {
                "slippage_exceeded"
            }
            VaultError::CrossLedgerExecution(_) => "cross_ledger_execution",
            VaultError::InvalidSlippage { .. } => "invalid_slippage",
            VaultError::AmountOutOfRange { .. } => "amount_out_of_range",
            VaultError::MathOverflow { .. } => "math_overflow",
            VaultError::PoolNotFound { .. } => "pool_not_found",
            VaultError::LiquidityDesync { .. } => "liquidity_desync",
            VaultError::InvalidStateTransition { .. } => "invalid_state_transition",
            VaultError::CompensationShortfall { .. } => "compensation_shortfall",
            VaultError::RollbackIncomplete { .. } => "rollback_incomplete",
            VaultError::Internal(_) => "internal",
        }
    }
}

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foreign_error_classification() {
        assert_eq!(
            ForeignError::from_code(codes::EXCEEDED_SLIPPAGE, "ignored"),
            ForeignError::SlippageExceeded {
                code: codes::EXCEEDED_SLIPPAGE
            }
        );
        assert!(matches!(
            ForeignError::from_code(codes::MISSING_SIGNATURE, ""),
            ForeignError::MalformedAccounts { .. }
        ));
        let other = ForeignError::from_code(42, "custom");
        assert_eq!(other.code(), Some(42));
        assert!(other.to_string().contains("custom"));
        assert_eq!(ForeignError::Unavailable("down".into()).code(), None);
    }

    #[test]
    fn test_retry_and_alert_flags() {
        let slippage = VaultError::from(ForeignError::SlippageExceeded {
            code: codes::EXCEEDED_SLIPPAGE,
        });
        assert!(slippage.is_retryable());
        assert_eq!(slippage.kind(), "slippage_exceeded");

        let rollback = VaultError::RollbackIncomplete {
            source: Box::new(VaultError::ZeroLiquidity),
            failures: 1,
        };
        assert!(rollback.should_alert());
        assert!(!rollback.is_retryable());
    }
}
