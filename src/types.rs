//! Shared identifiers and value types
//!
//! Host-ledger values use alloy primitives; counterparty-ledger keys are raw
//! 32-byte account addresses.

use crate::error::{VaultError, VaultResult};

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Basis point denominator for slippage tolerances
pub const BPS_DENOMINATOR: u64 = 10_000;

/// 32-byte counterparty-ledger account address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct AccountKey(pub [u8; 32]);

impl AccountKey {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for AccountKey {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw)
            .map_err(|e| VaultError::Config(format!("Invalid account key {}: {}", s, e)))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| VaultError::Config(format!("Account key {} is not 32 bytes", s)))?;
        Ok(Self(bytes))
    }
}

/// Pool identifier: the pool state account address on the counterparty ledger,
/// carried on the host ledger as a bytes32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct PoolId(pub B256);

impl PoolId {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(B256::from(bytes))
    }

    /// Build an id from a native address shorter than 32 bytes, left-zero-padded
    pub fn from_short(bytes: &[u8]) -> VaultResult<Self> {
        if bytes.len() > 32 {
            return Err(VaultError::Config(format!(
                "Pool id is {} bytes, at most 32 allowed",
                bytes.len()
            )));
        }
        let mut padded = [0u8; 32];
        padded[32 - bytes.len()..].copy_from_slice(bytes);
        Ok(Self::new(padded))
    }

    /// The pool state account this id addresses
    pub fn account(&self) -> AccountKey {
        AccountKey(self.0 .0)
    }
}

impl From<AccountKey> for PoolId {
    fn from(key: AccountKey) -> Self {
        Self::new(key.0)
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PoolId {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw)
            .map_err(|e| VaultError::Config(format!("Invalid pool id {}: {}", s, e)))?;
        Self::from_short(&bytes)
    }
}

/// Static wrapped-token ↔ native-mint registry
#[derive(Debug, Clone, Default)]
pub struct TokenMapping {
    to_mint: HashMap<Address, AccountKey>,
    to_wrapped: HashMap<AccountKey, Address>,
}

impl TokenMapping {
    pub fn new(pairs: impl IntoIterator<Item = (Address, AccountKey)>) -> VaultResult<Self> {
        let mut mapping = Self::default();
        for (wrapped, mint) in pairs {
            if mapping.to_mint.insert(wrapped, mint).is_some() {
                return Err(VaultError::Config(format!(
                    "Wrapped token {} mapped twice",
                    wrapped
                )));
            }
            if mapping.to_wrapped.insert(mint, wrapped).is_some() {
                return Err(VaultError::Config(format!("Mint {} mapped twice", mint)));
            }
        }
        Ok(mapping)
    }

    pub fn mint_for(&self, wrapped: &Address) -> Option<AccountKey> {
        self.to_mint.get(wrapped).copied()
    }

    pub fn wrapped_for(&self, mint: &AccountKey) -> Option<Address> {
        self.to_wrapped.get(mint).copied()
    }

    pub fn len(&self) -> usize {
        self.to_mint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_mint.is_empty()
    }
}

/// Narrow a host-ledger amount to the counterparty ledger's u64 token units
pub fn to_native_amount(amount: U256) -> VaultResult<u64> {
    u64::try_from(amount).map_err(|_| VaultError::AmountOutOfRange {
        amount: amount.to_string(),
    })
}

/// Apply a slippage tolerance to a quoted amount, flooring the result
pub fn apply_slippage(quoted: u64, slippage_bps: u64) -> u64 {
    let keep = BPS_DENOMINATOR.saturating_sub(slippage_bps) as u128;
    ((quoted as u128 * keep) / BPS_DENOMINATOR as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_pool_id_is_left_padded() {
        let id = PoolId::from_short(&[0xab, 0xcd]).unwrap();
        let bytes = id.0 .0;
        assert!(bytes[..30].iter().all(|b| *b == 0));
        assert_eq!(&bytes[30..], &[0xab, 0xcd]);

        assert!(PoolId::from_short(&[1u8; 33]).is_err());
    }

    #[test]
    fn test_pool_id_parses_hex() {
        let id: PoolId = "0x01".parse().unwrap();
        assert_eq!(id.account().0[31], 1);
        assert_eq!(id, PoolId::from(id.account()));
    }

    #[test]
    fn test_token_mapping_rejects_duplicates() {
        let wrapped = Address::repeat_byte(1);
        let mint = AccountKey([2u8; 32]);

        let mapping = TokenMapping::new([(wrapped, mint)]).unwrap();
        assert_eq!(mapping.mint_for(&wrapped), Some(mint));
        assert_eq!(mapping.wrapped_for(&mint), Some(wrapped));

        assert!(TokenMapping::new([(wrapped, mint), (wrapped, AccountKey([3u8; 32]))]).is_err());
        assert!(TokenMapping::new([(wrapped, mint), (Address::repeat_byte(9), mint)]).is_err());
    }

    #[test]
    fn test_apply_slippage_floors() {
        assert_eq!(apply_slippage(1000, 0), 1000);
        assert_eq!(apply_slippage(1000, 1), 999);
        assert_eq!(apply_slippage(999, 50), 994);
        assert_eq!(apply_slippage(1000, 10_000), 0);
    }

    #[test]
    fn test_native_amount_range() {
        assert_eq!(to_native_amount(U256::from(42u64)).unwrap(), 42);
        assert!(to_native_amount(U256::from(u64::MAX) + U256::from(1u64)).is_err());
    }
}
