//! Deterministic custodial account derivation
//!
//! The vault controls one counterparty-ledger owner key, derived from its host
//! address and a configured seed. Token accounts hang off (owner, mint) the
//! same way associated token accounts do.

use crate::types::AccountKey;

use alloy_primitives::Address;
use sha3::{Digest, Keccak256};

const CUSTODY_DOMAIN: &[u8] = b"xledger-vault/custody";
const TOKEN_ACCOUNT_DOMAIN: &[u8] = b"xledger-vault/token-account";

fn hash_seeds(seeds: &[&[u8]]) -> AccountKey {
    let mut hasher = Keccak256::new();
    for seed in seeds {
        hasher.update((seed.len() as u32).to_le_bytes());
        hasher.update(seed);
    }
    AccountKey(hasher.finalize().into())
}

/// Counterparty owner key controlled by the vault at `vault`
pub fn derive_custody_owner(vault: &Address, seed: &str) -> AccountKey {
    hash_seeds(&[CUSTODY_DOMAIN, seed.as_bytes(), vault.as_slice()])
}

/// Token account of `owner` for `mint`
pub fn derive_token_account(owner: &AccountKey, mint: &AccountKey) -> AccountKey {
    hash_seeds(&[TOKEN_ACCOUNT_DOMAIN, owner.as_bytes(), mint.as_bytes()])
}

/// The vault's custodial identity on the counterparty ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Custody {
    vault: Address,
    owner: AccountKey,
}

impl Custody {
    pub fn new(vault: Address, seed: &str) -> Self {
        Self {
            vault,
            owner: derive_custody_owner(&vault, seed),
        }
    }

    /// Host-ledger address of the vault
    pub fn vault(&self) -> Address {
        self.vault
    }

    /// Counterparty owner (signer) key
    pub fn owner(&self) -> AccountKey {
        self.owner
    }

    /// Custodial token account for `mint`
    pub fn token_account(&self, mint: &AccountKey) -> AccountKey {
        derive_token_account(&self.owner, mint)
    }
}
