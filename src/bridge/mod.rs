//! Token bridge between the host ledger's wrapped representation and the
//! counterparty ledger's native mint
//!
//! The wrapped-token contract itself is an external collaborator reached
//! through [`WrappedTokenLedger`].

pub mod custody;

pub use custody::Custody;

use crate::error::{VaultError, VaultResult};
use crate::types::{to_native_amount, AccountKey, TokenMapping};

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Rejection reported by the wrapped-token contract
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: String, need: String },

    #[error("insufficient allowance: have {have}, need {need}")]
    InsufficientAllowance { have: String, need: String },

    #[error("unknown token {0}")]
    UnknownToken(String),

    #[error("{0}")]
    Rejected(String),
}

/// Host-ledger wrapped-token contract (one contract per mint)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WrappedTokenLedger: Send + Sync {
    /// Allowance-checked transfer of `amount` from `owner` to `to`
    async fn transfer_from(
        &self,
        token: Address,
        owner: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), TokenError>;

    /// Move `amount` of `from`'s wrapped balance into a counterparty token account
    async fn unwrap_to(
        &self,
        token: Address,
        from: Address,
        account: AccountKey,
        amount: u64,
    ) -> Result<(), TokenError>;

    /// Move `amount` out of a vault-controlled counterparty token account into
    /// `to`'s wrapped balance
    async fn wrap_from(
        &self,
        token: Address,
        account: AccountKey,
        to: Address,
        amount: u64,
    ) -> Result<(), TokenError>;

    /// Wrapped balance of `owner`
    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, TokenError>;
}

/// Converts between wrapped host tokens and custodial native tokens
pub struct TokenBridgeAdapter {
    mapping: TokenMapping,
    tokens: Arc<dyn WrappedTokenLedger>,
    custody: Custody,
}

impl TokenBridgeAdapter {
    pub fn new(mapping: TokenMapping, tokens: Arc<dyn WrappedTokenLedger>, custody: Custody) -> Self {
        Self {
            mapping,
            tokens,
            custody,
        }
    }

    pub fn custody(&self) -> &Custody {
        &self.custody
    }

    /// Wrapped host token for a counterparty mint
    pub fn wrapped_for_mint(&self, mint: &AccountKey) -> VaultResult<Address> {
        self.mapping
            .wrapped_for(mint)
            .ok_or_else(|| VaultError::UnmappedToken {
                token: mint.to_string(),
            })
    }

    /// Debit `amount` of `wrapped` from `from_user`, unwrap it and credit the
    /// vault's custodial account. Returns the native amount credited.
    ///
    /// Either both legs land or neither does: a failed unwrap refunds the
    /// host-side debit before returning.
    pub async fn pull_and_convert(
        &self,
        wrapped: Address,
        from_user: Address,
        amount: U256,
    ) -> VaultResult<u64> {
        let mint = self
            .mapping
            .mint_for(&wrapped)
            .ok_or_else(|| VaultError::UnmappedToken {
                token: wrapped.to_string(),
            })?;
        let native = to_native_amount(amount)?;
        let vault = self.custody.vault();

        self.tokens
            .transfer_from(wrapped, from_user, vault, amount)
            .await
            .map_err(|e| VaultError::TransferFailed(format!("pull from {}: {}", from_user, e)))?;

        let custody_account = self.custody.token_account(&mint);
        if let Err(e) = self
            .tokens
            .unwrap_to(wrapped, vault, custody_account, native)
            .await
        {
            warn!("Unwrap of {} {} failed, refunding {}: {}", native, wrapped, from_user, e);
            let cause = VaultError::TransferFailed(format!("unwrap to custody: {}", e));
            return match self.refund(wrapped, from_user, amount).await {
                Ok(()) => Err(cause),
                Err(refund_err) => {
                    error!("Refund to {} failed: {}", from_user, refund_err);
                    Err(VaultError::RollbackIncomplete {
                        source: Box::new(cause),
                        failures: 1,
                    })
                }
            };
        }

        debug!(
            "Pulled {} {} from {} into custody {}",
            native, wrapped, from_user, custody_account
        );
        Ok(native)
    }

    /// Wrap `amount` of custodial `native_mint` tokens back into the host
    /// representation and credit `to_user`. Returns the wrapped amount credited.
    pub async fn convert_and_push(
        &self,
        native_mint: &AccountKey,
        to_user: Address,
        amount: u64,
    ) -> VaultResult<U256> {
        let wrapped = self.wrapped_for_mint(native_mint)?;
        let custody_account = self.custody.token_account(native_mint);

        self.tokens
            .wrap_from(wrapped, custody_account, to_user, amount)
            .await
            .map_err(|e| VaultError::TransferFailed(format!("push to {}: {}", to_user, e)))?;

        debug!(
            "Pushed {} {} from custody {} to {}",
            amount, wrapped, custody_account, to_user
        );
        Ok(U256::from(amount))
    }

    /// Return wrapped tokens still held by the vault on the host side
    async fn refund(&self, wrapped: Address, to: Address, amount: U256) -> VaultResult<()> {
        self.tokens
            .transfer_from(wrapped, self.custody.vault(), to, amount)
            .await
            .map_err(|e| VaultError::TransferFailed(format!("refund to {}: {}", to, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    const SEED: &str = "test-vault";

    fn wrapped() -> Address {
        Address::repeat_byte(0xc7)
    }

    fn mint() -> AccountKey {
        AccountKey([0x06; 32])
    }

    fn vault() -> Address {
        Address::repeat_byte(0x55)
    }

    fn adapter(mock: MockWrappedTokenLedger) -> TokenBridgeAdapter {
        let mapping = TokenMapping::new([(wrapped(), mint())]).unwrap();
        TokenBridgeAdapter::new(mapping, Arc::new(mock), Custody::new(vault(), SEED))
    }

    #[tokio::test]
    async fn test_pull_and_convert_credits_custody() {
        let user = Address::repeat_byte(1);
        let custody_account = Custody::new(vault(), SEED).token_account(&mint());

        let mut mock = MockWrappedTokenLedger::new();
        mock.expect_transfer_from()
            .with(eq(wrapped()), eq(user), eq(vault()), eq(U256::from(500u64)))
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        mock.expect_unwrap_to()
            .with(eq(wrapped()), eq(vault()), eq(custody_account), eq(500u64))
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let native = adapter(mock)
            .pull_and_convert(wrapped(), user, U256::from(500u64))
            .await
            .unwrap();
        assert_eq!(native, 500);
    }

    #[tokio::test]
    async fn test_pull_unmapped_token() {
        let mock = MockWrappedTokenLedger::new();
        let result = adapter(mock)
            .pull_and_convert(Address::repeat_byte(0x99), Address::repeat_byte(1), U256::from(1u64))
            .await;
        assert!(matches!(result, Err(VaultError::UnmappedToken { .. })));
    }

    #[tokio::test]
    async fn test_pull_debit_failure_is_transfer_failed() {
        let mut mock = MockWrappedTokenLedger::new();
        mock.expect_transfer_from().returning(|_, _, _, _| {
            Err(TokenError::InsufficientAllowance {
                have: "0".into(),
                need: "10".into(),
            })
        });
        mock.expect_unwrap_to().never();

        let result = adapter(mock)
            .pull_and_convert(wrapped(), Address::repeat_byte(1), U256::from(10u64))
            .await;
        assert!(matches!(result, Err(VaultError::TransferFailed(_))));
    }

    #[tokio::test]
    async fn test_failed_unwrap_refunds_user() {
        let user = Address::repeat_byte(1);

        let mut mock = MockWrappedTokenLedger::new();
        mock.expect_transfer_from()
            .with(eq(wrapped()), eq(user), eq(vault()), eq(U256::from(10u64)))
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        mock.expect_unwrap_to()
            .returning(|_, _, _, _| Err(TokenError::Rejected("frozen".into())));
        mock.expect_transfer_from()
            .with(eq(wrapped()), eq(vault()), eq(user), eq(U256::from(10u64)))
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let result = adapter(mock)
            .pull_and_convert(wrapped(), user, U256::from(10u64))
            .await;
        assert!(matches!(result, Err(VaultError::TransferFailed(_))));
    }

    #[tokio::test]
    async fn test_pull_rejects_amount_beyond_native_range() {
        let mut mock = MockWrappedTokenLedger::new();
        mock.expect_transfer_from().never();

        let too_big = U256::from(u64::MAX) + U256::from(1u64);
        let result = adapter(mock)
            .pull_and_convert(wrapped(), Address::repeat_byte(1), too_big)
            .await;
        assert!(matches!(result, Err(VaultError::AmountOutOfRange { .. })));
    }

    #[tokio::test]
    async fn test_convert_and_push() {
        let user = Address::repeat_byte(2);
        let custody_account = Custody::new(vault(), SEED).token_account(&mint());

        let mut mock = MockWrappedTokenLedger::new();
        mock.expect_wrap_from()
            .with(eq(wrapped()), eq(custody_account), eq(user), eq(77u64))
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let pushed = adapter(mock).convert_and_push(&mint(), user, 77).await.unwrap();
        assert_eq!(pushed, U256::from(77u64));

        let unmapped = adapter(MockWrappedTokenLedger::new())
            .convert_and_push(&AccountKey([0xee; 32]), user, 1)
            .await;
        assert!(matches!(unmapped, Err(VaultError::UnmappedToken { .. })));
    }
}
