//! Instruction encoding for the counterparty liquidity pool program
//!
//! The builder is pure: it only assembles account lists and instruction data
//! and never touches either ledger.

use crate::bridge::Custody;
use crate::error::{VaultError, VaultResult};
use crate::types::AccountKey;

use super::PoolKeys;

use serde::Serialize;

/// One account reference in an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccountMeta {
    pub pubkey: AccountKey,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn writable(pubkey: AccountKey) -> Self {
        Self {
            pubkey,
            is_signer: false,
            is_writable: true,
        }
    }

    pub fn readonly(pubkey: AccountKey) -> Self {
        Self {
            pubkey,
            is_signer: false,
            is_writable: false,
        }
    }

    pub fn readonly_signer(pubkey: AccountKey) -> Self {
        Self {
            pubkey,
            is_signer: true,
            is_writable: false,
        }
    }
}

/// Program invocation ready for dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instruction {
    pub program_id: AccountKey,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

impl Instruction {
    /// Account key at `index`, if present
    #[cfg(test)]
    pub fn account(&self, index: usize) -> Option<&AccountMeta> {
        self.accounts.get(index)
    }
}

/// Pool program instruction discriminators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PoolInstruction {
    AddLiquidity = 0,
    RemoveLiquidity = 1,
}

impl PoolInstruction {
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Decoded instruction arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolCall {
    AddLiquidity { amount: u64, min_lp_out: u64 },
    RemoveLiquidity { lp_amount: u64, min_out: u64 },
}

/// Instruction data length: discriminator plus two u64 arguments
pub const DATA_LEN: usize = 17;

/// Account indices shared by add and remove.
///
/// Account layout (8 accounts):
/// 0. pool_state (mut)
/// 1. pool_authority
/// 2. owner (signer) - custodial owner
/// 3. owner_token (mut) - custodial token account
/// 4. owner_lp (mut) - custodial LP account
/// 5. token_vault (mut) - pool reserve account
/// 6. lp_mint (mut)
/// 7. token_program
pub mod accounts {
    pub const POOL_STATE: usize = 0;
    pub const POOL_AUTHORITY: usize = 1;
    pub const OWNER: usize = 2;
    pub const OWNER_TOKEN: usize = 3;
    pub const OWNER_LP: usize = 4;
    pub const TOKEN_VAULT: usize = 5;
    pub const LP_MINT: usize = 6;
    pub const TOKEN_PROGRAM: usize = 7;
    pub const COUNT: usize = 8;
}

fn encode(discriminator: PoolInstruction, first: u64, second: u64) -> Vec<u8> {
    let mut data = vec![0u8; DATA_LEN];
    data[0] = discriminator.to_u8();
    data[1..9].copy_from_slice(&first.to_le_bytes());
    data[9..17].copy_from_slice(&second.to_le_bytes());
    data
}

/// Parse instruction data produced by [`PoolInstructionBuilder`]
pub fn decode(data: &[u8]) -> Option<PoolCall> {
    if data.len() != DATA_LEN {
        return None;
    }
    let first = u64::from_le_bytes(data[1..9].try_into().ok()?);
    let second = u64::from_le_bytes(data[9..17].try_into().ok()?);
    match data[0] {
        0 => Some(PoolCall::AddLiquidity {
            amount: first,
            min_lp_out: second,
        }),
        1 => Some(PoolCall::RemoveLiquidity {
            lp_amount: first,
            min_out: second,
        }),
        _ => None,
    }
}

/// Assembles pool program instructions on behalf of the vault's custody
#[derive(Debug, Clone)]
pub struct PoolInstructionBuilder {
    program_id: AccountKey,
    token_program_id: AccountKey,
    custody: Custody,
}

impl PoolInstructionBuilder {
    pub fn new(program_id: AccountKey, token_program_id: AccountKey, custody: Custody) -> Self {
        Self {
            program_id,
            token_program_id,
            custody,
        }
    }

    pub fn program_id(&self) -> AccountKey {
        self.program_id
    }

    /// Deposit `amount` native tokens from custody, requiring at least
    /// `min_lp_out` LP tokens back
    pub fn build_add_liquidity(
        &self,
        pool: &PoolKeys,
        amount: u64,
        min_lp_out: u64,
    ) -> VaultResult<Instruction> {
        if amount == 0 {
            return Err(VaultError::ZeroLiquidity);
        }
        Ok(Instruction {
            program_id: self.program_id,
            accounts: self.account_metas(pool),
            data: encode(PoolInstruction::AddLiquidity, amount, min_lp_out),
        })
    }

    /// Burn `lp_amount` custodial LP tokens, requiring at least `min_out`
    /// native tokens back
    pub fn build_remove_liquidity(
        &self,
        pool: &PoolKeys,
        lp_amount: u64,
        min_out: u64,
    ) -> VaultResult<Instruction> {
        if lp_amount == 0 {
            return Err(VaultError::ZeroLiquidity);
        }
        Ok(Instruction {
            program_id: self.program_id,
            accounts: self.account_metas(pool),
            data: encode(PoolInstruction::RemoveLiquidity, lp_amount, min_out),
        })
    }

    fn account_metas(&self, pool: &PoolKeys) -> Vec<AccountMeta> {
        vec![
            AccountMeta::writable(pool.id.account()),
            AccountMeta::readonly(pool.authority),
            AccountMeta::readonly_signer(self.custody.owner()),
            AccountMeta::writable(self.custody.token_account(&pool.token_mint)),
            AccountMeta::writable(self.custody.token_account(&pool.lp_mint)),
            AccountMeta::writable(pool.token_vault),
            AccountMeta::writable(pool.lp_mint),
            AccountMeta::readonly(self.token_program_id),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PoolId;
    use alloy_primitives::Address;

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
        PoolInstructionBuilder::new(
            AccountKey([0xaa; 32]),
            AccountKey([0xbb; 32]),
            Custody::new(Address::repeat_byte(0x55), "seed"),
        )
    }

    #[test]
    fn test_add_liquidity_layout() {
        let builder = builder();
        let ix = builder.build_add_liquidity(&keys(), 1_000, 990).unwrap();

        assert_eq!(ix.program_id, AccountKey([0xaa; 32]));
        assert_eq!(ix.accounts.len(), accounts::COUNT);
        assert_eq!(ix.data[0], PoolInstruction::AddLiquidity.to_u8());
        assert_eq!(
            decode(&ix.data),
            Some(PoolCall::AddLiquidity {
                amount: 1_000,
                min_lp_out: 990
            })
        );

        let owner = ix.account(accounts::OWNER).unwrap();
        assert!(owner.is_signer);
        assert!(!owner.is_writable);
        assert_eq!(owner.pubkey, builder.custody.owner());

        let signers = ix.accounts.iter().filter(|m| m.is_signer).count();
        assert_eq!(signers, 1);
        assert_eq!(
            ix.account(accounts::OWNER_LP).unwrap().pubkey,
            builder.custody.token_account(&keys().lp_mint)
        );
        assert!(!ix.account(accounts::TOKEN_PROGRAM).unwrap().is_writable);
    }

    #[test]
    fn test_remove_liquidity_layout() {
        let ix = builder().build_remove_liquidity(&keys(), 50, 0).unwrap();
        assert_eq!(ix.data[0], PoolInstruction::RemoveLiquidity.to_u8());
        assert_eq!(
            decode(&ix.data),
            Some(PoolCall::RemoveLiquidity {
                lp_amount: 50,
                min_out: 0
            })
        );
        assert_eq!(ix.account(accounts::POOL_STATE).unwrap().pubkey, keys().id.account());
    }

    #[test]
    fn test_zero_amounts_rejected() {
        assert!(matches!(
            builder().build_add_liquidity(&keys(), 0, 0),
            Err(VaultError::ZeroLiquidity)
        ));
        assert!(matches!(
            builder().build_remove_liquidity(&keys(), 0, 0),
            Err(VaultError::ZeroLiquidity)
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode(&[]), None);
        assert_eq!(decode(&[0u8; 5]), None);
        let mut data = vec![0u8; DATA_LEN];
        data[0] = 7;
        assert_eq!(decode(&data), None);
    }
}
